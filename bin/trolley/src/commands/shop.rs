use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use trolley_agent::{Orchestrator, SafetyConfirmer};
use trolley_browser::{
    ActuatorSource, AuthEnsurer, AuthGate, BrowserHost, DeferredLoginFlow, HostAuthBackend,
};
use trolley_core::config::Concurrency;
use trolley_core::types::ShoppingSummary;
use trolley_core::{Config, Paths};
use trolley_list::{ListStore, YamlListStore};
use trolley_prefs::{
    ChoiceMessenger, PreferenceCoordinator, RuleNormalizer, TelegramMessenger,
    YamlPreferenceStore,
};
use trolley_providers::GeminiDecisionService;

/// Asks the operator on the terminal before a flagged action runs.
struct StdinConfirmer;

#[async_trait]
impl SafetyConfirmer for StdinConfirmer {
    async fn confirm(&self, explanation: &str) -> bool {
        let prompt = format!("The agent wants to proceed with: {explanation}\nAllow? [y/N] ");
        let answer = tokio::task::spawn_blocking(move || {
            print!("{prompt}");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(_) => line,
                Err(_) => String::new(),
            }
        })
        .await
        .unwrap_or_default();
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

fn parse_concurrency(value: &str) -> anyhow::Result<Concurrency> {
    if value.eq_ignore_ascii_case("len") {
        return Ok(Concurrency::Len);
    }
    let n: u32 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("concurrency must be a number or \"len\", got {value:?}"))?;
    Ok(Concurrency::Fixed(n))
}

pub async fn run(
    paths: &Paths,
    list: Option<PathBuf>,
    headless: bool,
    concurrency: Option<String>,
) -> anyhow::Result<()> {
    paths.ensure_dirs()?;
    let mut config = Config::load_or_default(paths)?;

    if config.decision.api_key.is_empty() {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.decision.api_key = key;
        }
    }
    config.require_api_key()?;

    if headless {
        config.browser.headless = true;
    }
    if let Some(value) = concurrency {
        config.shopping.concurrency = parse_concurrency(&value)?;
    }

    let list_path = list.unwrap_or_else(|| paths.list_file());
    let list: Arc<dyn ListStore> = Arc::new(YamlListStore::new(list_path));

    let prefs_path = match &config.preferences.file {
        Some(file) => PathBuf::from(file),
        None => paths.preferences_file(),
    };
    let messenger: Option<Arc<dyn ChoiceMessenger>> = match &config.preferences.telegram {
        Some(telegram) => match TelegramMessenger::new(telegram) {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                warn!(error = %e, "telegram misconfigured, choice prompts disabled");
                None
            }
        },
        None => None,
    };
    let prefs = Arc::new(PreferenceCoordinator::new(
        Arc::new(RuleNormalizer),
        Arc::new(YamlPreferenceStore::new(prefs_path)),
        messenger,
    ));

    let profile_dir = match &config.browser.profile_dir {
        Some(dir) => PathBuf::from(dir),
        None => paths.profile_dir(),
    };
    let host = Arc::new(BrowserHost::launch(config.browser.clone(), &profile_dir).await?);
    let auth: Arc<dyn AuthEnsurer> = Arc::new(AuthGate::new(HostAuthBackend::new(
        host.clone(),
        Arc::new(DeferredLoginFlow::default()),
    )));

    let decision = Arc::new(GeminiDecisionService::new(&config.decision));
    let confirmer = Arc::new(StdinConfirmer);
    let actuators: Arc<dyn ActuatorSource> = host.clone();

    let orchestrator = Arc::new(Orchestrator::new(
        &config, list, prefs, decision, confirmer, actuators, auth,
    ));
    let result = orchestrator.run().await;
    host.close().await;

    let summary = result?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ShoppingSummary) {
    println!();
    println!("Shopping Summary");
    println!("================");
    for item in &summary.added_items {
        println!("  + {} x{} @ {}", item.item_name, item.quantity, item.price_text);
    }
    for nf in &summary.not_found_items {
        println!("  ? {}: {}", nf.item_name, nf.explanation);
    }
    for failure in &summary.failed_items {
        println!("  ! item {}: {}", failure.item_id, failure.error);
    }
    if !summary.default_fills.is_empty() {
        println!("  Filled from household defaults: {}", summary.default_fills.join(", "));
    }
    if !summary.new_defaults.is_empty() {
        println!("  New defaults saved: {}", summary.new_defaults.join(", "));
    }
    println!("  Total: {}", summary.total_cost_text);
}
