//! Chrome process launch and CDP endpoint discovery.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use trolley_core::config::BrowserConfig;
use trolley_core::{Error, Result};

/// A running Chrome instance with its debugging port.
pub struct ChromeProcess {
    child: Child,
    pub debug_port: u16,
    pub user_data_dir: PathBuf,
}

impl ChromeProcess {
    pub async fn launch(config: &BrowserConfig, user_data_dir: &Path) -> Result<Self> {
        let binary = find_chrome_binary()
            .ok_or_else(|| Error::Browser("Chrome not found. Please install it.".to_string()))?;

        std::fs::create_dir_all(user_data_dir)?;
        let debug_port = find_free_port().await?;
        let args = build_chrome_args(config, debug_port, user_data_dir);

        info!(
            port = debug_port,
            headless = config.headless,
            profile = %user_data_dir.display(),
            "Launching Chrome"
        );

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("Failed to launch Chrome: {}", e)))?;

        Ok(Self {
            child,
            debug_port,
            user_data_dir: user_data_dir.to_path_buf(),
        })
    }

    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

fn build_chrome_args(config: &BrowserConfig, debug_port: u16, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--window-size={},{}",
        config.viewport_width, config.viewport_height
    ));
    args.push("about:blank".to_string());
    args
}

pub fn find_chrome_binary() -> Option<String> {
    let candidates = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Browser(format!("Failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Browser(format!("Failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until Chrome answers with its browser WebSocket URL.
pub async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Browser(format!(
                "Chrome CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list. The
/// target may not appear immediately after createTarget, so retry briefly.
pub async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "target list fetch failed");
                continue;
            }
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("id").and_then(|v| v.as_str()) == Some(target_id)
                || target.get("targetId").and_then(|v| v.as_str()) == Some(target_id)
            {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(Error::Browser(format!(
        "No WebSocket URL found for targetId '{}' after retries",
        target_id
    )))
}
