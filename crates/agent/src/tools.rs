//! Item-scoped reporting tools. Unlike motor actions these close over the
//! item being shopped: they write to the list store, touch the preference
//! session, and decide how the item's dispatch loop ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;
use tracing::info;

use trolley_core::types::{AddedResult, ListItem, NotFoundResult, Outcome};
use trolley_core::{Error, Result};
use trolley_list::ListStore;
use trolley_prefs::{
    ChoiceDecision, ItemPreferences, NormalizedGoal, OverrideRequest, ProductChoice,
};

use crate::decision::ToolSchema;

const SKIP_EXPLANATION: &str = "User chose to skip this item.";

/// Reporting surface for one item attempt. At most one outcome or one
/// override is recorded; whichever lands first ends the loop.
pub struct ShoppingItemSession {
    item: ListItem,
    goal: NormalizedGoal,
    prefs: ItemPreferences,
    list: Arc<dyn ListStore>,
    outcome: Mutex<Option<Outcome>>,
    override_request: Mutex<Option<OverrideRequest>>,
    excused_ms: AtomicU64,
}

impl ShoppingItemSession {
    pub fn new(
        item: ListItem,
        goal: NormalizedGoal,
        prefs: ItemPreferences,
        list: Arc<dyn ListStore>,
    ) -> Self {
        Self {
            item,
            goal,
            prefs,
            list,
            outcome: Mutex::new(None),
            override_request: Mutex::new(None),
            excused_ms: AtomicU64::new(0),
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome.lock().ok().and_then(|g| g.clone())
    }

    pub fn take_override(&self) -> Option<OverrideRequest> {
        self.override_request.lock().ok().and_then(|mut g| g.take())
    }

    pub fn finished(&self) -> bool {
        let reported = self.outcome.lock().map(|g| g.is_some()).unwrap_or(false);
        let overridden = self
            .override_request
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false);
        reported || overridden
    }

    /// Seconds spent waiting on a human reply, excused from the time budget.
    pub fn excused_secs(&self) -> f64 {
        self.excused_ms.load(Ordering::SeqCst) as f64 / 1000.0
    }

    fn set_outcome(&self, outcome: Outcome) {
        if let Ok(mut guard) = self.outcome.lock() {
            *guard = Some(outcome);
        }
    }

    /// Dispatches one tool call. `None` means the name is not an item tool.
    pub async fn handle(&self, name: &str, args: &Value) -> Option<Result<Value>> {
        match name {
            "report_item_added" => Some(self.report_added(args).await),
            "report_item_not_found" => Some(self.report_not_found(args).await),
            "request_product_choice" => Some(self.request_choice(args).await),
            _ => None,
        }
    }

    async fn report_added(&self, args: &Value) -> Result<Value> {
        let item_name = require_str(args, "item_name", "report_item_added")?;
        let price_text = require_str(args, "price_text", "report_item_added")?;
        let result = AddedResult {
            item_name,
            price_text,
            url: args
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            quantity: args
                .get("quantity")
                .and_then(Value::as_u64)
                .map(|q| q as u32)
                .unwrap_or(1),
        };
        self.list.mark_completed(&self.item.id, &result).await?;
        self.prefs.record_success(&result).await?;

        // A default "fills" the item only when the stored preference stood in
        // for asking the user.
        let used_default = self.prefs.has_existing_preference() && !self.prefs.prompted_user();
        let starred_default = self.prefs.make_default_pending();
        info!(
            item = %self.item.id,
            product = %result.item_name,
            used_default,
            "item added to cart"
        );
        self.set_outcome(Outcome::Added {
            result,
            used_default,
            starred_default,
        });
        Ok(serde_json::json!({"recorded": true}))
    }

    async fn report_not_found(&self, args: &Value) -> Result<Value> {
        let explanation = require_str(args, "explanation", "report_item_not_found")?;
        let result = NotFoundResult {
            item_name: self.goal.original_text.clone(),
            explanation,
        };
        self.list.mark_not_found(&self.item.id, &result).await?;
        info!(item = %self.item.id, "item reported not found");
        self.set_outcome(Outcome::NotFound { result });
        Ok(serde_json::json!({"recorded": true}))
    }

    async fn request_choice(&self, args: &Value) -> Result<Value> {
        let options = args
            .get("options")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::UnsupportedAction("request_product_choice: missing 'options'".to_string())
            })?;
        let mut choices = Vec::with_capacity(options.len());
        for option in options {
            let title = require_str(option, "title", "request_product_choice")?;
            let price_text = require_str(option, "price_text", "request_product_choice")?;
            choices.push(ProductChoice::new(title, price_text));
        }
        if choices.is_empty() {
            return Err(Error::UnsupportedAction(
                "request_product_choice: empty 'options'".to_string(),
            ));
        }

        let started = Instant::now();
        let decision = self.prefs.request_choice(choices).await?;
        self.excused_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::SeqCst);

        match decision {
            ChoiceDecision::Selected {
                index,
                choice,
                make_default,
            } => Ok(serde_json::json!({
                "selection": {
                    "index": index,
                    "title": choice.title,
                    "price_text": choice.price_text,
                },
                "make_default": make_default,
                "instruction":
                    "Add exactly this product to the cart, then call report_item_added.",
            })),
            ChoiceDecision::Alternate { text } => {
                info!(item = %self.item.id, "user supplied alternate instructions");
                if let Ok(mut guard) = self.override_request.lock() {
                    *guard = Some(OverrideRequest {
                        previous_text: self.goal.original_text.clone(),
                        override_text: text,
                        normalized: self.goal.clone(),
                        source: "choice_reply".to_string(),
                        supersedes_original: self.goal.original_text == self.item.name,
                    });
                }
                Ok(serde_json::json!({
                    "override": true,
                    "instruction": "The user replaced this item; stop working on it.",
                }))
            }
            ChoiceDecision::Skip { message } => {
                let result = NotFoundResult {
                    item_name: self.goal.original_text.clone(),
                    explanation: message.unwrap_or_else(|| SKIP_EXPLANATION.to_string()),
                };
                self.list.mark_not_found(&self.item.id, &result).await?;
                self.set_outcome(Outcome::NotFound { result });
                Ok(serde_json::json!({
                    "skipped": true,
                    "instruction": "The user skipped this item; stop working on it.",
                }))
            }
        }
    }
}

fn require_str(args: &Value, field: &str, name: &str) -> Result<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::UnsupportedAction(format!("{name}: missing '{field}'")))
}

/// Declarations for the item tools, appended to the motor set.
pub fn schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: "report_item_added".to_string(),
            description: "Report that the product was added to the cart.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "item_name": {"type": "string"},
                    "price_text": {"type": "string", "description": "e.g. $4.99"},
                    "url": {"type": "string"},
                    "quantity": {"type": "integer"},
                },
                "required": ["item_name", "price_text"],
            }),
        },
        ToolSchema {
            name: "report_item_not_found".to_string(),
            description: "Report that no suitable product exists.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"explanation": {"type": "string"}},
                "required": ["explanation"],
            }),
        },
        ToolSchema {
            name: "request_product_choice".to_string(),
            description: "Ask the user to pick between candidate products.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "options": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": {"type": "string"},
                                "price_text": {"type": "string"},
                            },
                            "required": ["title", "price_text"],
                        },
                    },
                },
                "required": ["options"],
            }),
        },
    ]
}
