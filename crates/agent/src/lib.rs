//! The shopping agent core: decision-service boundary, transcript handling,
//! motor-action dispatch, item reporting tools, and the run orchestrator.

pub mod decision;
pub mod motor;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod tools;
pub mod transcript;

pub use decision::{
    ActionRequest, DecisionResponse, DecisionService, SafetyConfirmer, SafetyDecision, ToolSchema,
};
pub use motor::MotorAction;
pub use orchestrator::{ItemExit, Orchestrator};
pub use session::{AgentSession, LoopStatus};
pub use tools::ShoppingItemSession;
pub use transcript::{ActionPayload, ActionRecord, Transcript, Turn, SNAPSHOT_RETENTION_TURNS};
