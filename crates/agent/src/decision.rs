//! The boundary to the external decision-making service. The agent loop only
//! sees transcripts going out and action requests coming back; wire formats
//! stay behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trolley_core::Result;

use crate::transcript::Transcript;

/// One declared tool the model may call. `parameters` is a JSON schema
/// object in whatever dialect the provider expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A single action the model asked for. `request_id` threads the eventual
/// result back into the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub request_id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    /// Set when the provider flagged the action for human confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_decision: Option<SafetyDecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub decision: String,
    #[serde(default)]
    pub explanation: String,
}

impl SafetyDecision {
    pub fn requires_confirmation(&self) -> bool {
        self.decision == "require_confirmation"
    }
}

/// What came back from one decision call.
#[derive(Debug, Clone, Default)]
pub struct DecisionResponse {
    pub reasoning: Option<String>,
    pub actions: Vec<ActionRequest>,
    /// Set when the provider could not produce a well-formed action. With no
    /// actions and no reasoning the loop asks again instead of completing.
    pub malformed: bool,
}

#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(
        &self,
        system_prompt: &str,
        transcript: &Transcript,
        tools: &[ToolSchema],
    ) -> Result<DecisionResponse>;
}

/// Human gate for actions the decision service flags. Deny ends the item.
#[async_trait]
pub trait SafetyConfirmer: Send + Sync {
    async fn confirm(&self, explanation: &str) -> bool;
}
