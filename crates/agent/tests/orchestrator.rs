//! End-to-end orchestrator behavior against scripted collaborators: every
//! item gets an outcome, budgets fail the item and not the run, session
//! expiry recovers through the auth gate, and overrides restart the item.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use trolley_agent::decision::{
    ActionRequest, DecisionResponse, DecisionService, SafetyConfirmer, ToolSchema,
};
use trolley_agent::transcript::Transcript;
use trolley_agent::Orchestrator;
use trolley_browser::actuator::{Actuator, ScrollDirection};
use trolley_browser::auth::{ActuatorSource, AuthEnsurer};
use trolley_core::config::{Concurrency, Config};
use trolley_core::types::{
    AddedResult, FailedItem, ItemStatus, ListItem, NotFoundResult, Observation, ShoppingSummary,
};
use trolley_core::{Error, Result};
use trolley_list::ListStore;
use trolley_prefs::{
    ChoiceDecision, ChoiceMessenger, ChoiceRequest, PreferenceCoordinator, RuleNormalizer,
    YamlPreferenceStore,
};

fn observation() -> Result<Observation> {
    Ok(Observation {
        url: "https://www.metro.ca/en/home".to_string(),
        snapshot: Some(vec![0u8; 16]),
    })
}

struct FakeActuator {
    expired: bool,
}

#[async_trait]
impl Actuator for FakeActuator {
    fn screen_size(&self) -> (u32, u32) {
        (1440, 900)
    }
    async fn current_state(&self) -> Result<Observation> {
        observation()
    }
    async fn open_web_browser(&self) -> Result<Observation> {
        if self.expired {
            Err(Error::SessionExpired("login required".to_string()))
        } else {
            observation()
        }
    }
    async fn click_at(&self, _x: f64, _y: f64) -> Result<Observation> {
        observation()
    }
    async fn hover_at(&self, _x: f64, _y: f64) -> Result<Observation> {
        observation()
    }
    async fn type_text_at(
        &self,
        _x: f64,
        _y: f64,
        _text: &str,
        _press_enter: bool,
        _clear: bool,
    ) -> Result<Observation> {
        observation()
    }
    async fn scroll_document(&self, _d: ScrollDirection, _m: f64) -> Result<Observation> {
        observation()
    }
    async fn scroll_at(
        &self,
        _x: f64,
        _y: f64,
        _d: ScrollDirection,
        _m: f64,
    ) -> Result<Observation> {
        observation()
    }
    async fn wait_seconds(&self, _seconds: f64) -> Result<Observation> {
        observation()
    }
    async fn go_back(&self) -> Result<Observation> {
        observation()
    }
    async fn go_forward(&self) -> Result<Observation> {
        observation()
    }
    async fn navigate(&self, _url: &str) -> Result<Observation> {
        observation()
    }
    async fn key_combination(&self, _keys: &[String]) -> Result<Observation> {
        observation()
    }
    async fn drag_and_drop(&self, _x: f64, _y: f64, _dx: f64, _dy: f64) -> Result<Observation> {
        observation()
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Hands out fresh fake tabs; optionally the first tab has an expired session.
struct FakeSource {
    acquired: AtomicU32,
    expire_first: bool,
}

impl FakeSource {
    fn new(expire_first: bool) -> Self {
        Self {
            acquired: AtomicU32::new(0),
            expire_first,
        }
    }
}

#[async_trait]
impl ActuatorSource for FakeSource {
    async fn acquire_actuator(&self) -> Result<Box<dyn Actuator>> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeActuator {
            expired: self.expire_first && n == 0,
        }))
    }
}

struct CountingAuth {
    calls: AtomicU32,
    forced: AtomicU32,
    fail: bool,
}

impl CountingAuth {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            forced: AtomicU32::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            forced: AtomicU32::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl AuthEnsurer for CountingAuth {
    async fn ensure_authenticated(&self, force: bool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if force {
            self.forced.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail {
            Err(Error::Authentication("no credentials".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct RecordingList {
    pending: Vec<ListItem>,
    completed: Mutex<Vec<(String, AddedResult)>>,
    not_found: Mutex<Vec<(String, NotFoundResult)>>,
    failed: Mutex<Vec<(String, String)>>,
    summaries: Mutex<Vec<ShoppingSummary>>,
}

impl RecordingList {
    fn with_items(names: &[&str]) -> Self {
        Self {
            pending: names
                .iter()
                .enumerate()
                .map(|(i, name)| ListItem {
                    id: (i + 1).to_string(),
                    name: name.to_string(),
                    status: ItemStatus::NeedsAction,
                })
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ListStore for RecordingList {
    async fn pending_items(&self) -> Result<Vec<ListItem>> {
        Ok(self.pending.clone())
    }
    async fn mark_completed(&self, item_id: &str, result: &AddedResult) -> Result<()> {
        self.completed
            .lock()
            .unwrap()
            .push((item_id.to_string(), result.clone()));
        Ok(())
    }
    async fn mark_not_found(&self, item_id: &str, result: &NotFoundResult) -> Result<()> {
        self.not_found
            .lock()
            .unwrap()
            .push((item_id.to_string(), result.clone()));
        Ok(())
    }
    async fn mark_failed(&self, item_id: &str, error: &str) -> Result<()> {
        self.failed
            .lock()
            .unwrap()
            .push((item_id.to_string(), error.to_string()));
        Ok(())
    }
    async fn send_summary(&self, summary: &ShoppingSummary) -> Result<()> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

/// Pops one scripted response per decision call; once the script runs out it
/// keeps returning the fallback.
struct ScriptedDecision {
    script: Mutex<VecDeque<DecisionResponse>>,
    fallback: DecisionResponse,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedDecision {
    fn new(script: Vec<DecisionResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: DecisionResponse::default(),
            prompts: Mutex::new(vec![]),
        }
    }

    fn looping(fallback: DecisionResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            prompts: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl DecisionService for ScriptedDecision {
    async fn decide(
        &self,
        prompt: &str,
        _transcript: &Transcript,
        _tools: &[ToolSchema],
    ) -> Result<DecisionResponse> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut script = self.script.lock().unwrap();
        Ok(script.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

struct AllowAll;

#[async_trait]
impl SafetyConfirmer for AllowAll {
    async fn confirm(&self, _explanation: &str) -> bool {
        true
    }
}

fn call(name: &str, args: serde_json::Value) -> ActionRequest {
    ActionRequest {
        request_id: "r".to_string(),
        name: name.to_string(),
        args,
        safety_decision: None,
    }
}

fn added_response(product: &str) -> DecisionResponse {
    DecisionResponse {
        reasoning: None,
        actions: vec![call(
            "report_item_added",
            serde_json::json!({"item_name": product, "price_text": "$4.99"}),
        )],
        malformed: false,
    }
}

fn coordinator(
    dir: &tempfile::TempDir,
    messenger: Option<Arc<dyn ChoiceMessenger>>,
) -> Arc<PreferenceCoordinator> {
    Arc::new(PreferenceCoordinator::new(
        Arc::new(RuleNormalizer),
        Arc::new(YamlPreferenceStore::new(dir.path().join("prefs.yaml"))),
        messenger,
    ))
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.shopping.stagger_ms = 1;
    config.decision.retry_delay_ms = 1;
    config
}

struct FixedMessenger(ChoiceDecision);

#[async_trait]
impl ChoiceMessenger for FixedMessenger {
    async fn request_choice(&self, _request: &ChoiceRequest) -> Result<ChoiceDecision> {
        Ok(self.0.clone())
    }
}

fn orchestrator(
    config: Config,
    list: Arc<RecordingList>,
    prefs: Arc<PreferenceCoordinator>,
    decision: Arc<ScriptedDecision>,
    actuators: Arc<FakeSource>,
    auth: Arc<CountingAuth>,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        &config,
        list,
        prefs,
        decision,
        Arc::new(AllowAll),
        actuators,
        auth,
    ))
}

#[tokio::test]
async fn test_every_item_gets_an_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk", "bread", "eggs"]));
    let decision = Arc::new(ScriptedDecision::new(vec![
        added_response("Milk 2L"),
        added_response("Bread"),
        added_response("Eggs 12"),
    ]));

    let orch = orchestrator(
        test_config(),
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(summary.added_items.len(), 3);
    assert!(summary.not_found_items.is_empty());
    assert!(summary.failed_items.is_empty());
    assert_eq!(list.completed.lock().unwrap().len(), 3);
    assert_eq!(list.summaries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_fanout_loses_no_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk", "bread", "eggs", "jam"]));
    let decision = Arc::new(ScriptedDecision::looping(added_response("Something")));

    let mut config = test_config();
    config.shopping.concurrency = Concurrency::Len;

    let orch = orchestrator(
        config,
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(
        summary.added_items.len()
            + summary.not_found_items.len()
            + summary.failed_items.len(),
        4
    );
}

#[tokio::test]
async fn test_max_turns_budget_fails_item_not_run() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk"]));
    // The model clicks forever and never reports.
    let decision = Arc::new(ScriptedDecision::looping(DecisionResponse {
        reasoning: None,
        actions: vec![call("click_at", serde_json::json!({"x": 10, "y": 10}))],
        malformed: false,
    }));

    let mut config = test_config();
    config.shopping.max_turns = 3;

    let orch = orchestrator(
        config,
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(
        summary.failed_items,
        vec![FailedItem {
            item_id: "1".to_string(),
            error: "max_turns_exceeded: 3".to_string(),
        }]
    );
    assert_eq!(
        list.failed.lock().unwrap()[0],
        ("1".to_string(), "max_turns_exceeded: 3".to_string())
    );
}

#[tokio::test]
async fn test_completion_without_report_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk"]));
    // Empty fallback: the model immediately stops without reporting.
    let decision = Arc::new(ScriptedDecision::new(vec![]));

    let orch = orchestrator(
        test_config(),
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(
        summary.failed_items,
        vec![FailedItem {
            item_id: "1".to_string(),
            error: "completed_without_reporting".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_session_expiry_recovers_with_one_forced_reauth() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk"]));
    let decision = Arc::new(ScriptedDecision::new(vec![added_response("Milk 2L")]));
    let auth = Arc::new(CountingAuth::new());
    let source = Arc::new(FakeSource::new(true));

    let orch = orchestrator(
        test_config(),
        list.clone(),
        coordinator(&dir, None),
        decision,
        source.clone(),
        auth.clone(),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(summary.added_items.len(), 1);
    // Pre-shop auth plus exactly one forced recovery.
    assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    assert_eq!(auth.forced.load(Ordering::SeqCst), 1);
    assert_eq!(source.acquired.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pre_shop_auth_failure_is_run_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk"]));
    let decision = Arc::new(ScriptedDecision::new(vec![]));

    let orch = orchestrator(
        test_config(),
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::failing()),
    );
    let err = orch.run().await.unwrap_err();

    assert!(matches!(err, Error::Authentication(_)));
    assert!(list.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_responses_do_not_consume_turns() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk"]));
    let malformed = DecisionResponse {
        reasoning: None,
        actions: vec![],
        malformed: true,
    };
    // More malformed replies than the turn budget allows, then a report. The
    // item still succeeds because re-asks are free.
    let decision = Arc::new(ScriptedDecision::new(vec![
        malformed.clone(),
        malformed.clone(),
        malformed.clone(),
        malformed,
        added_response("Milk 2L"),
    ]));

    let mut config = test_config();
    config.shopping.max_turns = 2;

    let orch = orchestrator(
        config,
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(summary.added_items.len(), 1);
    assert!(summary.failed_items.is_empty());
}

#[tokio::test]
async fn test_unknown_action_name_fails_the_item() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk"]));
    let decision = Arc::new(ScriptedDecision::new(vec![DecisionResponse {
        reasoning: None,
        actions: vec![call("teleport_to_the_checkout", serde_json::json!({}))],
        malformed: false,
    }]));

    let orch = orchestrator(
        test_config(),
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(summary.failed_items.len(), 1);
    assert_eq!(summary.failed_items[0].item_id, "1");
    assert!(summary.failed_items[0]
        .error
        .contains("teleport_to_the_checkout"));
    assert_eq!(list.failed.lock().unwrap()[0].0, "1".to_string());
}

/// Panics while deciding items whose prompt mentions the trigger word.
struct PanickyDecision {
    trigger: &'static str,
    fallback: DecisionResponse,
}

#[async_trait]
impl DecisionService for PanickyDecision {
    async fn decide(
        &self,
        prompt: &str,
        _transcript: &Transcript,
        _tools: &[ToolSchema],
    ) -> Result<DecisionResponse> {
        assert!(!prompt.contains(self.trigger), "scripted worker crash");
        Ok(self.fallback.clone())
    }
}

#[tokio::test]
async fn test_worker_panic_fails_only_that_item_with_its_id() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk", "durian"]));
    let decision = Arc::new(PanickyDecision {
        trigger: "durian",
        fallback: added_response("Milk 2L"),
    });

    let mut config = test_config();
    config.shopping.concurrency = Concurrency::Len;
    config.decision.max_retries = 0;

    let orch = Arc::new(Orchestrator::new(
        &config,
        list.clone(),
        coordinator(&dir, None),
        decision,
        Arc::new(AllowAll),
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    ));
    let summary = orch.run().await.unwrap();

    assert_eq!(summary.added_items.len(), 1);
    assert_eq!(summary.failed_items.len(), 1);
    assert_eq!(summary.failed_items[0].item_id, "2");
    assert!(summary.failed_items[0].error.starts_with("worker_panicked"));
    // The crashed item's list entry was marked failed too.
    assert_eq!(list.failed.lock().unwrap()[0].0, "2".to_string());
}

#[tokio::test]
async fn test_override_restarts_item_with_new_text_and_same_id() {
    let dir = tempfile::tempdir().unwrap();
    let list = Arc::new(RecordingList::with_items(&["milk"]));
    let messenger: Arc<dyn ChoiceMessenger> = Arc::new(FixedMessenger(ChoiceDecision::Alternate {
        text: "sparkling water".to_string(),
    }));
    let decision = Arc::new(ScriptedDecision::new(vec![
        DecisionResponse {
            reasoning: None,
            actions: vec![call(
                "request_product_choice",
                serde_json::json!({"options": [
                    {"title": "Milk A", "price_text": "$4.00"},
                    {"title": "Milk B", "price_text": "$5.00"},
                ]}),
            )],
            malformed: false,
        },
        added_response("Sparkling Water 1L"),
    ]));

    let orch = orchestrator(
        test_config(),
        list.clone(),
        coordinator(&dir, Some(messenger)),
        decision.clone(),
        Arc::new(FakeSource::new(false)),
        Arc::new(CountingAuth::new()),
    );
    let summary = orch.run().await.unwrap();

    assert_eq!(summary.added_items.len(), 1);
    assert_eq!(summary.added_items[0].item_name, "Sparkling Water 1L");

    // The restarted attempt kept the item id and shopped the new text.
    let completed = list.completed.lock().unwrap();
    assert_eq!(completed[0].0, "1");
    let prompts = decision.prompts.lock().unwrap();
    assert!(prompts.last().unwrap().contains("sparkling water"));
    assert!(prompts
        .last()
        .unwrap()
        .contains("replaced the earlier request \"milk\""));
}
