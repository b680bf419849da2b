//! Run coordination: pre-shop authentication, per-item attempt series with
//! budget enforcement and auth-expiry recovery, and the fan-out across items.
//! Every pending item ends in exactly one recorded outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use trolley_browser::actuator::Actuator;
use trolley_browser::auth::{ActuatorSource, AuthEnsurer, OrchestrationState};
use trolley_core::config::{Config, ShoppingConfig};
use trolley_core::types::{ListItem, Outcome, ShoppingResults, ShoppingSummary};
use trolley_core::Result;
use trolley_list::ListStore;
use trolley_prefs::{NormalizedGoal, OverrideRequest, PreferenceCoordinator};

use crate::decision::{DecisionService, SafetyConfirmer};
use crate::motor;
use crate::prompt::{build_shopper_prompt, PromptContext};
use crate::session::{AgentSession, LoopStatus};
use crate::tools::{self, ShoppingItemSession};
use crate::transcript::{ActionPayload, ActionRecord, Transcript};

/// How one dispatch loop ended: a terminal outcome, or a user override that
/// restarts the item under new text.
#[derive(Debug)]
pub enum ItemExit {
    Outcome(Outcome),
    Override(OverrideRequest),
}

pub struct Orchestrator {
    shopping: ShoppingConfig,
    search_url_template: String,
    list: Arc<dyn ListStore>,
    prefs: Arc<PreferenceCoordinator>,
    agent: AgentSession,
    actuators: Arc<dyn ActuatorSource>,
    auth: Arc<dyn AuthEnsurer>,
    state: Arc<OrchestrationState>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        list: Arc<dyn ListStore>,
        prefs: Arc<PreferenceCoordinator>,
        decision: Arc<dyn DecisionService>,
        confirmer: Arc<dyn SafetyConfirmer>,
        actuators: Arc<dyn ActuatorSource>,
        auth: Arc<dyn AuthEnsurer>,
    ) -> Self {
        Self {
            shopping: config.shopping.clone(),
            search_url_template: config.browser.search_url_template.clone(),
            agent: AgentSession::new(decision, confirmer, &config.decision),
            list,
            prefs,
            actuators,
            auth,
            state: Arc::new(OrchestrationState::new()),
        }
    }

    /// Shops every pending item and delivers the summary. Only the initial
    /// authentication failure is fatal; item-level failures are recorded.
    pub async fn run(self: &Arc<Self>) -> Result<ShoppingSummary> {
        self.state.ensure_pre_shop_auth(self.auth.as_ref()).await?;

        let items = self.list.pending_items().await?;
        if items.is_empty() {
            info!("shopping list has no pending items");
            return Ok(ShoppingResults::default().to_summary());
        }

        let width = self.shopping.concurrency.resolve(items.len());
        info!(items = items.len(), width, "starting shopping run");

        let mut results = ShoppingResults::default();
        if width <= 1 {
            for item in items {
                let outcome = self.process_item(item).await;
                results.record(outcome);
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(width));
            let mut workers = JoinSet::new();
            let mut worker_items: HashMap<tokio::task::Id, String> = HashMap::new();
            for (index, item) in items.into_iter().enumerate() {
                let this = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let stagger = Duration::from_millis(self.shopping.stagger_ms * index as u64);
                let item_id = item.id.clone();
                let handle = workers.spawn(async move {
                    tokio::time::sleep(stagger).await;
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return this
                                .fail_item(&item.id, "worker pool shut down".to_string())
                                .await
                        }
                    };
                    this.process_item(item).await
                });
                worker_items.insert(handle.id(), item_id);
            }
            while let Some(joined) = workers.join_next_with_id().await {
                match joined {
                    Ok((_, outcome)) => results.record(outcome),
                    Err(e) => {
                        let item_id = worker_items.get(&e.id()).cloned().unwrap_or_default();
                        let outcome = self
                            .fail_item(&item_id, format!("worker_panicked: {e}"))
                            .await;
                        results.record(outcome);
                    }
                }
            }
        }

        let summary = results.to_summary();
        info!(
            added = summary.added_items.len(),
            not_found = summary.not_found_items.len(),
            failed = summary.failed_items.len(),
            total = %summary.total_cost_text,
            "shopping run finished"
        );
        self.list.send_summary(&summary).await?;
        Ok(summary)
    }

    /// Marks the list entry failed and builds the matching outcome.
    async fn fail_item(&self, item_id: &str, error: String) -> Outcome {
        if let Err(e) = self.list.mark_failed(item_id, &error).await {
            warn!(item = %item_id, error = %e, "failed to mark item failed");
        }
        Outcome::Failed {
            item_id: item_id.to_string(),
            error,
        }
    }

    /// Restart loop over overrides. The item keeps its identity; only the
    /// goal text changes, and it is normalized afresh each round.
    async fn process_item(&self, item: ListItem) -> Outcome {
        let mut goal_text = item.name.clone();
        loop {
            let normalized = match self.prefs.normalize_item(&goal_text).await {
                Ok(normalized) => normalized,
                Err(e) => {
                    return self
                        .fail_item(&item.id, format!("normalize_failed: {e}"))
                        .await
                }
            };
            match self.run_attempt_series(&item, &normalized).await {
                ItemExit::Outcome(outcome) => {
                    if let Outcome::Failed { error, .. } = &outcome {
                        if let Err(mark_err) = self.list.mark_failed(&item.id, error).await {
                            warn!(item = %item.id, error = %mark_err, "failed to mark item failed");
                        }
                    }
                    return outcome;
                }
                ItemExit::Override(request) => {
                    info!(
                        item = %item.id,
                        from = %request.previous_text,
                        to = %request.override_text,
                        superseded_category = %request.normalized.category,
                        supersedes_original = request.supersedes_original,
                        source = %request.source,
                        "restarting item under override text"
                    );
                    goal_text = request.override_text;
                }
            }
        }
    }

    /// Bounded retries on session expiry. Each attempt gets a fresh tab,
    /// transcript, and preference session; re-auth runs between attempts.
    async fn run_attempt_series(&self, item: &ListItem, normalized: &NormalizedGoal) -> ItemExit {
        let max_attempts = self.shopping.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                if let Err(e) = self.state.recover_auth(self.auth.as_ref()).await {
                    warn!(item = %item.id, error = %e, "auth recovery failed");
                    return ItemExit::Outcome(Outcome::Failed {
                        item_id: item.id.clone(),
                        error: format!("auth_recovery_failed: {e}"),
                    });
                }
                info!(item = %item.id, attempt, "session restored, retrying item");
            }
            match self.run_attempt(item, normalized).await {
                Ok(exit) => return exit,
                Err(e) if e.is_session_expired() => {
                    warn!(item = %item.id, attempt, "session expired mid-attempt");
                }
                Err(e) => {
                    return ItemExit::Outcome(Outcome::Failed {
                        item_id: item.id.clone(),
                        error: e.to_string(),
                    })
                }
            }
        }
        ItemExit::Outcome(Outcome::Failed {
            item_id: item.id.clone(),
            error: "auth_recovery_failed".to_string(),
        })
    }

    async fn run_attempt(&self, item: &ListItem, normalized: &NormalizedGoal) -> Result<ItemExit> {
        let actuator = self.actuators.acquire_actuator().await?;
        let exit = self.drive(item, normalized, actuator.as_ref()).await;
        if let Err(e) = actuator.close().await {
            debug!(item = %item.id, error = %e, "failed to close tab");
        }
        exit
    }

    async fn drive(
        &self,
        item: &ListItem,
        normalized: &NormalizedGoal,
        actuator: &dyn Actuator,
    ) -> Result<ItemExit> {
        let prefs_session = self.prefs.session(normalized.clone());

        // Brand or qualifier requests are explicit; stored defaults only
        // stand in for unqualified category asks.
        let preference = if normalized.is_specific_request() {
            None
        } else {
            prefs_session.existing_preference().await?
        };
        let choice_enabled = prefs_session.can_request_choice();
        let overridden_from =
            (normalized.original_text != item.name).then_some(item.name.as_str());

        let prompt = build_shopper_prompt(&PromptContext {
            goal: normalized,
            preference: preference.as_ref(),
            overridden_from,
            choice_enabled,
            search_url_template: &self.search_url_template,
        });

        let mut tool_schemas = motor::schemas();
        let mut item_tools = tools::schemas();
        if !choice_enabled {
            item_tools.retain(|t| t.name != "request_product_choice");
        }
        tool_schemas.extend(item_tools);

        let item_session = ShoppingItemSession::new(
            item.clone(),
            normalized.clone(),
            prefs_session,
            Arc::clone(&self.list),
        );

        let mut transcript =
            Transcript::new(&format!("Shop for: {}", normalized.original_text));
        let initial = actuator.open_web_browser().await?;
        transcript.push_results(vec![ActionRecord {
            request_id: "initial".to_string(),
            action_name: "open_web_browser".to_string(),
            payload: ActionPayload::Observation {
                observation: initial,
            },
            safety_acknowledgement: None,
        }]);

        let started = Instant::now();
        let budget_secs = self.shopping.time_budget_secs as f64;
        let mut turn = 0;
        while turn < self.shopping.max_turns {
            // Wall time minus the seconds spent waiting on the user.
            let spent = started.elapsed().as_secs_f64() - item_session.excused_secs();
            if spent > budget_secs {
                return Ok(ItemExit::Outcome(Outcome::Failed {
                    item_id: item.id.clone(),
                    error: format!("time_budget_exceeded: {spent:.0}s of {budget_secs:.0}s"),
                }));
            }
            debug!(item = %item.id, turn, "dispatching turn");
            match self
                .agent
                .run_one_turn(&prompt, &mut transcript, actuator, &item_session, &tool_schemas)
                .await?
            {
                LoopStatus::Continue => turn += 1,
                // A malformed response dispatched nothing; the re-ask is free.
                LoopStatus::Reask => {}
                LoopStatus::Complete { final_reasoning } => {
                    if let Some(outcome) = item_session.outcome() {
                        return Ok(ItemExit::Outcome(outcome));
                    }
                    if let Some(request) = item_session.take_override() {
                        return Ok(ItemExit::Override(request));
                    }
                    debug!(item = %item.id, reasoning = ?final_reasoning, "loop ended without a report");
                    return Ok(ItemExit::Outcome(Outcome::Failed {
                        item_id: item.id.clone(),
                        error: "completed_without_reporting".to_string(),
                    }));
                }
            }
        }
        Ok(ItemExit::Outcome(Outcome::Failed {
            item_id: item.id.clone(),
            error: format!("max_turns_exceeded: {}", self.shopping.max_turns),
        }))
    }
}
