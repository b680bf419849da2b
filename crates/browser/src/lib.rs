//! Browser hosting: Chrome process management, the CDP wire client, the
//! network containment policy, and the per-tab actuator the agent drives.

pub mod actuator;
pub mod auth;
pub mod cdp;
pub mod chrome;
pub mod host;
pub mod policy;

pub use actuator::{Actuator, TabActuator};
pub use auth::{
    ActuatorSource, AuthBackend, AuthEnsurer, AuthGate, DeferredLoginFlow, HostAuthBackend,
    LoginFlow, OrchestrationStage, OrchestrationState,
};
pub use host::BrowserHost;
pub use policy::{NetworkPolicy, Verdict};
