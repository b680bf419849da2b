//! Conversation state for one item attempt. Screenshots dominate the payload,
//! so older turns keep only their url text once the retention window passes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trolley_core::types::Observation;

use crate::decision::ActionRequest;

/// How many of the newest observation-bearing turns keep snapshot bytes.
pub const SNAPSHOT_RETENTION_TURNS: usize = 3;

/// Result of one executed action, threaded back by request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub request_id: String,
    pub action_name: String,
    pub payload: ActionPayload,
    /// Present when a flagged action was confirmed by the human gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_acknowledgement: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    /// A motor action settled the page and produced an observation.
    Observation { observation: Observation },
    /// An item tool returned a structured value.
    Tool { value: Value },
    /// The action could not be executed; the text goes back to the model.
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    Goal {
        text: String,
    },
    Model {
        reasoning: Option<String>,
        actions: Vec<ActionRequest>,
    },
    Results {
        records: Vec<ActionRecord>,
    },
}

impl Turn {
    fn has_observation(&self) -> bool {
        match self {
            Turn::Results { records } => records
                .iter()
                .any(|r| matches!(r.payload, ActionPayload::Observation { .. })),
            _ => false,
        }
    }

    fn strip_snapshots(&mut self) {
        if let Turn::Results { records } = self {
            for record in records {
                if let ActionPayload::Observation { observation } = &mut record.payload {
                    observation.snapshot = None;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new(goal_text: &str) -> Self {
        Self {
            turns: vec![Turn::Goal {
                text: goal_text.to_string(),
            }],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn push_model(&mut self, reasoning: Option<String>, actions: Vec<ActionRequest>) {
        self.turns.push(Turn::Model { reasoning, actions });
    }

    pub fn push_results(&mut self, records: Vec<ActionRecord>) {
        self.turns.push(Turn::Results { records });
    }

    /// Drops snapshot bytes from all but the newest
    /// [`SNAPSHOT_RETENTION_TURNS`] observation-bearing turns. Counting is by
    /// turn, not by snapshot, so repeated pruning is a no-op.
    pub fn prune(&mut self) {
        let mut seen = 0usize;
        for turn in self.turns.iter_mut().rev() {
            if !turn.has_observation() {
                continue;
            }
            seen += 1;
            if seen > SNAPSHOT_RETENTION_TURNS {
                turn.strip_snapshots();
            }
        }
    }

    /// Serialized size in bytes, used to verify pruning keeps the transcript
    /// bounded.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(&self.turns).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation_turn(url: &str) -> Turn {
        Turn::Results {
            records: vec![ActionRecord {
                request_id: "r".to_string(),
                action_name: "click_at".to_string(),
                payload: ActionPayload::Observation {
                    observation: Observation {
                        url: url.to_string(),
                        snapshot: Some(vec![0u8; 64]),
                    },
                },
                safety_acknowledgement: None,
            }],
        }
    }

    fn snapshot_count(transcript: &Transcript) -> usize {
        transcript
            .turns()
            .iter()
            .filter(|t| match t {
                Turn::Results { records } => records.iter().any(|r| {
                    matches!(
                        &r.payload,
                        ActionPayload::Observation { observation } if observation.snapshot.is_some()
                    )
                }),
                _ => false,
            })
            .count()
    }

    #[test]
    fn test_prune_keeps_newest_three_snapshots() {
        let mut transcript = Transcript::new("buy milk");
        for i in 0..6 {
            transcript.push_model(None, vec![]);
            transcript.turns.push(observation_turn(&format!("page{i}")));
        }
        transcript.prune();

        assert_eq!(snapshot_count(&transcript), SNAPSHOT_RETENTION_TURNS);
        // Urls survive on stripped turns.
        match &transcript.turns()[2] {
            Turn::Results { records } => match &records[0].payload {
                ActionPayload::Observation { observation } => {
                    assert_eq!(observation.url, "page0");
                    assert!(observation.snapshot.is_none());
                }
                other => panic!("unexpected payload: {other:?}"),
            },
            other => panic!("unexpected turn: {other:?}"),
        }
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut transcript = Transcript::new("buy milk");
        for i in 0..8 {
            transcript.turns.push(observation_turn(&format!("page{i}")));
        }
        transcript.prune();
        let after_first = transcript.serialized_len();
        transcript.prune();
        assert_eq!(transcript.serialized_len(), after_first);
        assert_eq!(snapshot_count(&transcript), SNAPSHOT_RETENTION_TURNS);
    }

    #[test]
    fn test_tool_results_are_never_stripped() {
        let mut transcript = Transcript::new("buy milk");
        transcript.push_results(vec![ActionRecord {
            request_id: "t1".to_string(),
            action_name: "report_item_added".to_string(),
            payload: ActionPayload::Tool {
                value: serde_json::json!({"recorded": true}),
            },
            safety_acknowledgement: None,
        }]);
        for i in 0..5 {
            transcript.turns.push(observation_turn(&format!("page{i}")));
        }
        transcript.prune();
        match &transcript.turns()[1] {
            Turn::Results { records } => {
                assert!(matches!(records[0].payload, ActionPayload::Tool { .. }))
            }
            other => panic!("unexpected turn: {other:?}"),
        }
    }
}
