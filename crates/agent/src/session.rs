//! One decision-dispatch turn. The session owns no item state; it routes
//! requested actions to the item tools or the actuator and appends the
//! results to the transcript.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use trolley_browser::actuator::Actuator;
use trolley_core::config::DecisionConfig;
use trolley_core::{Error, Result};

use crate::decision::{ActionRequest, DecisionResponse, DecisionService, SafetyConfirmer, ToolSchema};
use crate::motor::MotorAction;
use crate::tools::ShoppingItemSession;
use crate::transcript::{ActionPayload, ActionRecord, Transcript};

/// Whether the dispatch loop should keep going after a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStatus {
    Continue,
    /// The service produced a malformed action; ask again. Nothing was
    /// dispatched, so this does not count against the turn budget.
    Reask,
    Complete { final_reasoning: Option<String> },
}

pub struct AgentSession {
    decision: Arc<dyn DecisionService>,
    confirmer: Arc<dyn SafetyConfirmer>,
    max_retries: u32,
    base_delay_ms: u64,
}

impl AgentSession {
    pub fn new(
        decision: Arc<dyn DecisionService>,
        confirmer: Arc<dyn SafetyConfirmer>,
        config: &DecisionConfig,
    ) -> Self {
        Self {
            decision,
            confirmer,
            max_retries: config.max_retries,
            base_delay_ms: config.retry_delay_ms,
        }
    }

    async fn decide_with_retry(
        &self,
        prompt: &str,
        transcript: &Transcript,
        tools: &[ToolSchema],
    ) -> Result<DecisionResponse> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay_ms = self.base_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, delay_ms, "retrying decision call");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match self.decision.decide(prompt, transcript, tools).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, "decision call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "decision call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::Transport("decision service unavailable".to_string())))
    }

    /// Runs one turn: ask the decision service, execute what it requested,
    /// append the results. Session-expiry, unknown action names, and other
    /// hard failures propagate; malformed arguments of known actions become
    /// error records the model sees.
    pub async fn run_one_turn(
        &self,
        prompt: &str,
        transcript: &mut Transcript,
        actuator: &dyn Actuator,
        item: &ShoppingItemSession,
        tools: &[ToolSchema],
    ) -> Result<LoopStatus> {
        let response = self.decide_with_retry(prompt, transcript, tools).await?;
        debug!(
            actions = response.actions.len(),
            has_reasoning = response.reasoning.is_some(),
            "decision received"
        );
        if response.malformed && response.actions.is_empty() && response.reasoning.is_none() {
            warn!("malformed action from decision service, asking again");
            return Ok(LoopStatus::Reask);
        }
        transcript.push_model(response.reasoning.clone(), response.actions.clone());

        if response.actions.is_empty() {
            return Ok(LoopStatus::Complete {
                final_reasoning: response.reasoning,
            });
        }

        let mut records = Vec::with_capacity(response.actions.len());
        for action in &response.actions {
            let mut safety_acknowledgement = None;
            if let Some(safety) = &action.safety_decision {
                if safety.requires_confirmation() {
                    info!(action = %action.name, "action flagged for confirmation");
                    if !self.confirmer.confirm(&safety.explanation).await {
                        records.push(error_record(action, "safety confirmation denied"));
                        transcript.push_results(records);
                        transcript.prune();
                        return Ok(LoopStatus::Complete {
                            final_reasoning: response.reasoning,
                        });
                    }
                    safety_acknowledgement = Some("confirmed by user".to_string());
                }
            }

            let mut record = self.execute(action, actuator, item).await?;
            record.safety_acknowledgement = safety_acknowledgement;
            records.push(record);
        }
        transcript.push_results(records);
        transcript.prune();

        if item.finished() {
            return Ok(LoopStatus::Complete {
                final_reasoning: response.reasoning,
            });
        }
        Ok(LoopStatus::Continue)
    }

    async fn execute(
        &self,
        action: &ActionRequest,
        actuator: &dyn Actuator,
        item: &ShoppingItemSession,
    ) -> Result<ActionRecord> {
        if let Some(result) = item.handle(&action.name, &action.args).await {
            return match result {
                Ok(value) => Ok(ActionRecord {
                    request_id: action.request_id.clone(),
                    action_name: action.name.clone(),
                    payload: ActionPayload::Tool { value },
                    safety_acknowledgement: None,
                }),
                Err(Error::UnsupportedAction(message)) => Ok(error_record(action, &message)),
                Err(e) => Err(e),
            };
        }

        match MotorAction::parse(&action.name, &action.args) {
            Some(Ok(motor)) => match motor.dispatch(actuator).await {
                Ok(observation) => Ok(ActionRecord {
                    request_id: action.request_id.clone(),
                    action_name: action.name.clone(),
                    payload: ActionPayload::Observation { observation },
                    safety_acknowledgement: None,
                }),
                Err(Error::UnsupportedAction(message)) => Ok(error_record(action, &message)),
                Err(e) => Err(e),
            },
            Some(Err(e)) => Ok(error_record(action, &e.to_string())),
            // An action name outside the declared tool set fails the item;
            // only malformed arguments of known actions are soft errors.
            None => Err(Error::UnsupportedAction(format!(
                "unknown action '{}'",
                action.name
            ))),
        }
    }
}

fn error_record(action: &ActionRequest, message: &str) -> ActionRecord {
    ActionRecord {
        request_id: action.request_id.clone(),
        action_name: action.name.clone(),
        payload: ActionPayload::Error {
            message: message.to_string(),
        },
        safety_acknowledgement: None,
    }
}
