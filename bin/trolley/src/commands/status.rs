use trolley_core::{Config, Paths};
use trolley_list::{ListStore, YamlListStore};

pub async fn run(paths: &Paths) -> anyhow::Result<()> {
    println!("trolley status");
    println!("==============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:      {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found)" }
    );

    let list_path = paths.list_file();
    println!(
        "List:        {} {}",
        list_path.display(),
        if list_path.exists() { "✓" } else { "✗ (not found)" }
    );

    let prefs_path = paths.preferences_file();
    println!(
        "Preferences: {} {}",
        prefs_path.display(),
        if prefs_path.exists() { "✓" } else { "✗ (not found)" }
    );

    if !config_exists {
        println!();
        println!("Run `trolley init` to initialize.");
        return Ok(());
    }

    let config = Config::load_or_default(paths)?;

    println!();
    println!("Model:       {}", config.decision.model);
    let has_key =
        !config.decision.api_key.is_empty() || std::env::var("GEMINI_API_KEY").is_ok();
    println!(
        "API key:     {}",
        if has_key { "✓ configured" } else { "✗ missing" }
    );
    println!(
        "Telegram:    {}",
        match &config.preferences.telegram {
            Some(t) if !t.bot_token.is_empty() => "✓ configured",
            _ => "✗ not configured (choice prompts disabled)",
        }
    );

    if list_path.exists() {
        let store = YamlListStore::new(list_path);
        let pending = store.pending_items().await?;
        println!();
        println!("Pending items: {}", pending.len());
        for item in &pending {
            println!("  - {}", item.name);
        }
    }

    Ok(())
}
