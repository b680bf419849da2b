use std::path::PathBuf;
use std::sync::Arc;

use trolley_browser::{AuthEnsurer, AuthGate, BrowserHost, DeferredLoginFlow, HostAuthBackend};
use trolley_core::{Config, Paths};

pub async fn run(paths: &Paths, timeout: u64) -> anyhow::Result<()> {
    paths.ensure_dirs()?;
    let config = Config::load_or_default(paths)?;

    let profile_dir = match &config.browser.profile_dir {
        Some(dir) => PathBuf::from(dir),
        None => paths.profile_dir(),
    };
    let host = Arc::new(BrowserHost::launch(config.browser.clone(), &profile_dir).await?);

    if host.session_is_valid().await {
        println!("Already signed in.");
        host.close().await;
        return Ok(());
    }

    let flow = Arc::new(DeferredLoginFlow {
        timeout_secs: timeout,
    });
    let gate = AuthGate::new(HostAuthBackend::new(host.clone(), flow));

    println!("Opening the login page. Sign in within {timeout}s...");
    let result = gate.ensure_authenticated(false).await;
    host.close().await;
    result?;

    println!("Signed in. The session is stored in the browser profile.");
    Ok(())
}
