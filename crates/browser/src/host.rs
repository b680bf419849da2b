//! Persistent Chrome host shared by all item workers. Every tab gets
//! request interception wired to the network policy; the policy can be
//! suspended only through the RAII guard returned by [`BrowserHost::unrestricted`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use trolley_core::config::BrowserConfig;
use trolley_core::Result;

use crate::actuator::TabActuator;
use crate::cdp::CdpClient;
use crate::chrome::{get_target_ws_url, wait_for_cdp_ready, ChromeProcess};
use crate::policy::{NetworkPolicy, Verdict};

pub struct BrowserHost {
    chrome: Mutex<ChromeProcess>,
    browser_cdp: Arc<CdpClient>,
    config: BrowserConfig,
    policy: Arc<NetworkPolicy>,
    restrictions: Arc<AtomicBool>,
}

impl BrowserHost {
    pub async fn launch(config: BrowserConfig, profile_dir: &Path) -> Result<Self> {
        let chrome = ChromeProcess::launch(&config, profile_dir).await?;
        let browser_ws_url = wait_for_cdp_ready(chrome.debug_port, 15).await?;
        let browser_cdp = Arc::new(CdpClient::connect(&browser_ws_url).await?);
        info!(port = chrome.debug_port, "browser host ready");

        let policy = Arc::new(NetworkPolicy::from_config(&config));
        Ok(Self {
            chrome: Mutex::new(chrome),
            browser_cdp,
            config,
            policy,
            restrictions: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Opens a new tab at the storefront with interception active and
    /// returns the actuator driving it.
    pub async fn new_tab(&self) -> Result<TabActuator> {
        let (cdp, target_id) = self.connect_tab(&self.config.start_url).await?;
        Ok(TabActuator::new(
            cdp,
            Arc::clone(&self.browser_cdp),
            target_id,
            self.config.viewport_width,
            self.config.viewport_height,
            self.config.auth_probe_selector.clone(),
        ))
    }

    /// Creates a target, connects a CDP client to it, and starts the
    /// interception task for that tab.
    async fn connect_tab(&self, url: &str) -> Result<(Arc<CdpClient>, String)> {
        let target_id = self.browser_cdp.create_target(url).await?;
        let port = self.chrome.lock().await.debug_port;
        let ws_url = get_target_ws_url(port, &target_id).await?;
        let cdp = Arc::new(CdpClient::connect(&ws_url).await?);

        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("Network").await?;
        cdp.set_viewport(self.config.viewport_width, self.config.viewport_height)
            .await?;

        cdp.enable_fetch(vec![json!({"urlPattern": "*", "requestStage": "Request"})])
            .await?;
        let mut paused = cdp.subscribe_event("Fetch.requestPaused").await;
        let task_cdp = Arc::clone(&cdp);
        let policy = Arc::clone(&self.policy);
        let restrictions = Arc::clone(&self.restrictions);
        tokio::spawn(async move {
            while let Some(params) = paused.recv().await {
                let request_id = match params.get("requestId").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                let url = params
                    .pointer("/request/url")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();

                let verdict = if restrictions.load(Ordering::SeqCst) {
                    policy.verdict(&url)
                } else {
                    Verdict::Forward
                };
                let result = match verdict {
                    Verdict::Forward => task_cdp.fetch_continue(&request_id).await,
                    Verdict::Abort { reason } => {
                        debug!(url = %url, reason = %reason, "blocking request");
                        task_cdp.fetch_fail(&request_id, "BlockedByClient").await
                    }
                };
                if let Err(e) = result {
                    debug!(error = %e, "fetch interception resume failed");
                    break;
                }
            }
        });

        Ok((cdp, target_id))
    }

    /// Probes whether the stored profile still carries a logged-in session.
    /// Any failure along the way reads as "not authenticated".
    pub async fn session_is_valid(&self) -> bool {
        let (cdp, target_id) = match self.connect_tab(&self.config.start_url).await {
            Ok(tab) => tab,
            Err(e) => {
                warn!(error = %e, "session probe tab failed to open");
                return false;
            }
        };
        let valid = probe_authenticated(&cdp, &self.config.auth_probe_selector).await;
        if let Err(e) = self.browser_cdp.close_target(&target_id).await {
            debug!(error = %e, "failed to close probe tab");
        }
        valid
    }

    /// Opens a tab for login flows. The caller is expected to hold an
    /// unrestricted guard; the tab still runs the interception task, which
    /// forwards everything while the guard is alive.
    pub async fn login_tab(&self) -> Result<(Arc<CdpClient>, String)> {
        self.connect_tab(&self.config.login_url).await
    }

    pub async fn close_tab(&self, target_id: &str) -> Result<()> {
        self.browser_cdp.close_target(target_id).await
    }

    /// Suspends request containment until the returned guard drops.
    pub fn unrestricted(&self) -> RestrictionsGuard {
        info!("removing network restrictions");
        self.restrictions.store(false, Ordering::SeqCst);
        RestrictionsGuard {
            restrictions: Arc::clone(&self.restrictions),
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.browser_cdp.send_command("Browser.close", json!({})).await {
            debug!(error = %e, "Browser.close failed (may already be closed)");
        }
        self.chrome.lock().await.kill().await;
    }
}

/// Restores restrictions on drop, so early returns and errors cannot leave
/// the browser unconstrained.
pub struct RestrictionsGuard {
    restrictions: Arc<AtomicBool>,
}

impl Drop for RestrictionsGuard {
    fn drop(&mut self) {
        info!("re-enabling network restrictions");
        self.restrictions.store(true, Ordering::SeqCst);
    }
}

/// Evaluates the authentication probe in the page. Errors read as false.
pub(crate) async fn probe_authenticated(cdp: &CdpClient, selector: &str) -> bool {
    let expression = format!(
        "!!document.querySelector({})",
        serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string())
    );
    match cdp.evaluate_js(&expression).await {
        Ok(result) => result
            .pointer("/result/value")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        Err(e) => {
            debug!(error = %e, "authentication probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restrictions_guard_restores_on_drop() {
        let restrictions = Arc::new(AtomicBool::new(true));
        {
            restrictions.store(false, Ordering::SeqCst);
            let _guard = RestrictionsGuard {
                restrictions: Arc::clone(&restrictions),
            };
            assert!(!restrictions.load(Ordering::SeqCst));
        }
        assert!(restrictions.load(Ordering::SeqCst));
    }
}
