//! Authentication gating. Login flows are slow and must never run twice
//! concurrently, so all entry points funnel through the single-flight
//! [`AuthGate`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use trolley_core::{Error, Result};

use crate::actuator::{Actuator, TabActuator};
use crate::host::BrowserHost;

/// Where the run currently is. The stage only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationStage {
    PreShopAuth,
    Shopping,
}

/// What the orchestrator needs from authentication.
#[async_trait]
pub trait AuthEnsurer: Send + Sync {
    async fn ensure_authenticated(&self, force: bool) -> Result<()>;
}

/// Validity probing and the login flow itself, separated from the gating so
/// tests can count invocations.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn session_is_valid(&self) -> bool;
    async fn run_login_flow(&self) -> Result<()>;
}

/// Single-flight login coordination. Concurrent callers share one flow run;
/// the session is re-verified after the flow before declaring success.
pub struct AuthGate<B> {
    backend: B,
    lock: Mutex<()>,
}

impl<B: AuthBackend> AuthGate<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl<B: AuthBackend> AuthEnsurer for AuthGate<B> {
    async fn ensure_authenticated(&self, force: bool) -> Result<()> {
        if !force && self.backend.session_is_valid().await {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        if !force && self.backend.session_is_valid().await {
            debug!("session became valid while waiting for the auth gate");
            return Ok(());
        }
        info!("running login flow");
        self.backend.run_login_flow().await?;
        if !self.backend.session_is_valid().await {
            return Err(Error::Authentication(
                "login flow completed without a valid session".to_string(),
            ));
        }
        info!("login flow succeeded");
        Ok(())
    }
}

/// Gates the one-time pre-shop authentication pass, and funnels later
/// recovery attempts back through the same ensurer.
pub struct OrchestrationState {
    stage: Mutex<OrchestrationStage>,
}

impl OrchestrationState {
    pub fn new() -> Self {
        Self {
            stage: Mutex::new(OrchestrationStage::PreShopAuth),
        }
    }

    pub async fn stage(&self) -> OrchestrationStage {
        *self.stage.lock().await
    }

    /// Runs authentication exactly once before shopping starts. Workers that
    /// arrive after the promotion fall through without touching the gate.
    pub async fn ensure_pre_shop_auth(&self, auth: &dyn AuthEnsurer) -> Result<()> {
        let mut stage = self.stage.lock().await;
        if *stage == OrchestrationStage::Shopping {
            debug!("already shopping, skipping pre-shop auth");
            return Ok(());
        }
        auth.ensure_authenticated(false).await?;
        *stage = OrchestrationStage::Shopping;
        info!("promoted stage to shopping");
        Ok(())
    }

    /// Called after a mid-shopping session expiry. Forced, since the probe
    /// may still read valid off a stale page while requests already 401.
    pub async fn recover_auth(&self, auth: &dyn AuthEnsurer) -> Result<()> {
        auth.ensure_authenticated(true).await
    }
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Login flow strategy for a [`HostAuthBackend`].
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn run(&self, host: &BrowserHost) -> Result<()>;
}

/// Opens the login page and waits for a human to complete sign-in, polling
/// the session probe until it reads valid.
pub struct DeferredLoginFlow {
    pub timeout_secs: u64,
}

impl Default for DeferredLoginFlow {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

#[async_trait]
impl LoginFlow for DeferredLoginFlow {
    async fn run(&self, host: &BrowserHost) -> Result<()> {
        let (_cdp, target_id) = host.login_tab().await?;
        info!(
            timeout_secs = self.timeout_secs,
            "login page opened, waiting for manual sign-in"
        );
        let start = std::time::Instant::now();
        let result = loop {
            if start.elapsed() > Duration::from_secs(self.timeout_secs) {
                break Err(Error::Authentication(format!(
                    "manual login did not complete within {}s",
                    self.timeout_secs
                )));
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
            if host.session_is_valid().await {
                break Ok(());
            }
        };
        if let Err(e) = host.close_tab(&target_id).await {
            warn!(error = %e, "failed to close login tab");
        }
        result
    }
}

/// Backend wired to the real browser host. The login flow runs with the
/// network restrictions lifted, restored even when the flow errors.
pub struct HostAuthBackend {
    host: Arc<BrowserHost>,
    flow: Arc<dyn LoginFlow>,
}

impl HostAuthBackend {
    pub fn new(host: Arc<BrowserHost>, flow: Arc<dyn LoginFlow>) -> Self {
        Self { host, flow }
    }
}

#[async_trait]
impl AuthBackend for HostAuthBackend {
    async fn session_is_valid(&self) -> bool {
        self.host.session_is_valid().await
    }

    async fn run_login_flow(&self) -> Result<()> {
        let _unrestricted = self.host.unrestricted();
        self.flow.run(&self.host).await
    }
}

/// Hands out fresh tabs to item workers.
#[async_trait]
pub trait ActuatorSource: Send + Sync {
    async fn acquire_actuator(&self) -> Result<Box<dyn Actuator>>;
}

#[async_trait]
impl ActuatorSource for BrowserHost {
    async fn acquire_actuator(&self) -> Result<Box<dyn Actuator>> {
        let tab: TabActuator = self.new_tab().await?;
        Ok(Box::new(tab))
    }
}
