use trolley_core::{Config, Paths};

const STARTER_LIST: &str = r#"# Trolley shopping list.
# Each item needs a name; ids are optional and default to the name.
# Remove the examples below and add your own.
items:
  - id: "1"
    name: 2L 2% milk
  - id: "2"
    name: bananas
"#;

pub async fn run(paths: &Paths, force: bool) -> anyhow::Result<()> {
    paths.ensure_dirs()?;

    let config_path = paths.config_file();
    if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    let config = Config::default();
    config.save(&config_path)?;
    println!("Wrote {}", config_path.display());

    let list_path = paths.list_file();
    if !list_path.exists() {
        std::fs::write(&list_path, STARTER_LIST)?;
        println!("Wrote {}", list_path.display());
    }

    println!();
    println!("Next steps:");
    println!("  1. Put your Gemini API key in the config (decision.api_key)");
    println!("     or export GEMINI_API_KEY.");
    println!("  2. Edit {} with your items.", list_path.display());
    println!("  3. Run `trolley auth` to sign in to the store once.");
    println!("  4. Run `trolley shop`.");

    Ok(())
}
