use serde::{Deserialize, Serialize};

use crate::currency::parse_price_cents;

/// Lifecycle state of a shopping-list entry. Only the list store mutates it,
/// in response to outcome reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    NeedsAction,
    Completed,
}

/// One entry of the shopping list. Identity is the `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub name: String,
    pub status: ItemStatus,
}

/// Details reported by the agent after it added a product to the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddedResult {
    pub item_name: String,
    pub price_text: String,
    pub url: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl AddedResult {
    /// Price in cents computed from the formatted price text; zero when the
    /// text cannot be parsed (a bad price must not sink the whole summary).
    pub fn price_cents(&self) -> i64 {
        parse_price_cents(&self.price_text).unwrap_or(0)
    }
}

/// Details reported by the agent when a product could not be located.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotFoundResult {
    pub item_name: String,
    pub explanation: String,
}

/// Environment state produced by every actuator call. The snapshot payload is
/// stripped by transcript pruning; the url metadata always survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub url: String,
    #[serde(with = "snapshot_base64")]
    pub snapshot: Option<Vec<u8>>,
}

mod snapshot_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(data) => serializer.serialize_some(&STANDARD.encode(data)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Terminal result of processing one item. Exactly one outcome is recorded
/// per item by run end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Added {
        result: AddedResult,
        used_default: bool,
        starred_default: bool,
    },
    NotFound {
        result: NotFoundResult,
    },
    Failed {
        item_id: String,
        error: String,
    },
}

/// One failed item in the end-of-run summary, traceable to its list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_id: String,
    pub error: String,
}

/// Run-level accumulator, owned exclusively by the orchestrator and updated
/// only through `record`.
#[derive(Debug, Clone, Default)]
pub struct ShoppingResults {
    pub added_items: Vec<AddedResult>,
    pub not_found_items: Vec<NotFoundResult>,
    pub failed_items: Vec<FailedItem>,
    pub default_filled_items: Vec<String>,
    pub new_default_items: Vec<String>,
    pub total_cost_cents: i64,
}

impl ShoppingResults {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Added {
                result,
                used_default,
                starred_default,
            } => {
                self.total_cost_cents += result.price_cents();
                if used_default {
                    self.default_filled_items.push(result.item_name.clone());
                }
                if starred_default {
                    self.new_default_items.push(result.item_name.clone());
                }
                self.added_items.push(result);
            }
            Outcome::NotFound { result } => self.not_found_items.push(result),
            Outcome::Failed { item_id, error } => {
                self.failed_items.push(FailedItem { item_id, error })
            }
        }
    }

    pub fn outcome_count(&self) -> usize {
        self.added_items.len() + self.not_found_items.len() + self.failed_items.len()
    }

    pub fn to_summary(&self) -> ShoppingSummary {
        ShoppingSummary {
            added_items: self.added_items.clone(),
            not_found_items: self.not_found_items.clone(),
            failed_items: self.failed_items.clone(),
            default_fills: self.default_filled_items.clone(),
            new_defaults: self.new_default_items.clone(),
            total_cost_cents: self.total_cost_cents,
            total_cost_text: format!("${:.2}", self.total_cost_cents as f64 / 100.0),
        }
    }
}

/// Immutable end-of-run summary handed to the list store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingSummary {
    pub added_items: Vec<AddedResult>,
    pub not_found_items: Vec<NotFoundResult>,
    pub failed_items: Vec<FailedItem>,
    pub default_fills: Vec<String>,
    pub new_defaults: Vec<String>,
    pub total_cost_cents: i64,
    pub total_cost_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(name: &str, price: &str) -> AddedResult {
        AddedResult {
            item_name: name.to_string(),
            price_text: price.to_string(),
            url: format!("https://store.example/p/{name}"),
            quantity: 1,
        }
    }

    #[test]
    fn test_record_added_accumulates_cost() {
        let mut results = ShoppingResults::default();
        results.record(Outcome::Added {
            result: added("milk", "$4.29"),
            used_default: false,
            starred_default: false,
        });
        results.record(Outcome::Added {
            result: added("bread", "$3.50"),
            used_default: true,
            starred_default: true,
        });

        assert_eq!(results.added_items.len(), 2);
        assert_eq!(results.total_cost_cents, 779);
        assert_eq!(results.default_filled_items, vec!["bread"]);
        assert_eq!(results.new_default_items, vec!["bread"]);
    }

    #[test]
    fn test_record_not_found_and_failed() {
        let mut results = ShoppingResults::default();
        results.record(Outcome::NotFound {
            result: NotFoundResult {
                item_name: "dragonfruit".to_string(),
                explanation: "no results".to_string(),
            },
        });
        results.record(Outcome::Failed {
            item_id: "7".to_string(),
            error: "max_turns_exceeded: 3".to_string(),
        });

        assert_eq!(results.outcome_count(), 2);
        assert_eq!(results.total_cost_cents, 0);
        assert_eq!(
            results.failed_items,
            vec![FailedItem {
                item_id: "7".to_string(),
                error: "max_turns_exceeded: 3".to_string(),
            }]
        );
    }

    #[test]
    fn test_summary_formats_total_cost() {
        let mut results = ShoppingResults::default();
        results.record(Outcome::Added {
            result: added("eggs", "$6.99"),
            used_default: false,
            starred_default: false,
        });
        let summary = results.to_summary();
        assert_eq!(summary.total_cost_text, "$6.99");
        assert_eq!(summary.added_items.len(), 1);
    }

    #[test]
    fn test_observation_snapshot_roundtrips_as_base64() {
        let obs = Observation {
            url: "https://www.metro.ca/en/home".to_string(),
            snapshot: Some(vec![1, 2, 3, 255]),
        };
        let json = serde_json::to_string(&obs).unwrap();
        assert!(json.contains("AQID/w=="));
        let back: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.snapshot.unwrap(), vec![1, 2, 3, 255]);
    }
}
