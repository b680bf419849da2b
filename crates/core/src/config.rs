use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Fan-out width for the shopping run. `Len` sizes the pool to the item
/// count; either form is clamped to [1, 20] at resolve time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Fixed(u32),
    Len,
}

impl Concurrency {
    pub const MAX: u32 = 20;

    pub fn resolve(&self, item_count: usize) -> usize {
        let requested = match self {
            Concurrency::Fixed(n) => *n,
            Concurrency::Len => item_count.min(Self::MAX as usize) as u32,
        };
        requested.clamp(1, Self::MAX) as usize
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Fixed(1)
    }
}

impl Serialize for Concurrency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Concurrency::Fixed(n) => serializer.serialize_u32(*n),
            Concurrency::Len => serializer.serialize_str("len"),
        }
    }
}

impl<'de> Deserialize<'de> for Concurrency {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) if n >= 1 => Ok(Concurrency::Fixed(n.min(i64::from(Concurrency::MAX)) as u32)),
            Raw::Number(n) => Err(serde::de::Error::custom(format!(
                "concurrency must be at least 1, got {n}"
            ))),
            Raw::Text(s) if s.trim().eq_ignore_ascii_case("len") => Ok(Concurrency::Len),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "concurrency must be an integer or \"len\", got {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub concurrency: Concurrency,
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
}

fn default_max_turns() -> u32 {
    40
}

fn default_time_budget_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    2
}

fn default_stagger_ms() -> u64 {
    800
}

impl Default for ShoppingConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            time_budget_secs: default_time_budget_secs(),
            max_attempts: default_max_attempts(),
            concurrency: Concurrency::default(),
            stagger_ms: default_stagger_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_start_url")]
    pub start_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_auth_probe_selector")]
    pub auth_probe_selector: String,
    /// Search page template; `{QUERY}` is replaced by the url-encoded item.
    #[serde(default = "default_search_url_template")]
    pub search_url_template: String,
    #[serde(default = "default_allow_hosts")]
    pub allow_hosts: Vec<String>,
    #[serde(default = "default_blocked_path_prefixes")]
    pub blocked_path_prefixes: Vec<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// Chrome user data dir; falls back to `Paths::profile_dir` when unset.
    #[serde(default)]
    pub profile_dir: Option<String>,
}

fn default_start_url() -> String {
    "https://www.metro.ca".to_string()
}

fn default_login_url() -> String {
    "https://www.metro.ca/en/my-account/login".to_string()
}

fn default_auth_probe_selector() -> String {
    "#authenticatedButton".to_string()
}

fn default_search_url_template() -> String {
    "https://www.metro.ca/en/online-grocery/search?filter={QUERY}".to_string()
}

fn default_allow_hosts() -> Vec<String> {
    [
        "www.metro.ca",
        "product-images.metro.ca",
        "d94qwxh6czci4.cloudfront.net",
        "static.cloud.coveo.com",
        "use.typekit.net",
        "p.typekit.net",
        "cdn.cookielaw.org",
        "cdn.dialoginsight.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_blocked_path_prefixes() -> Vec<String> {
    [
        "/checkout",
        "/payment",
        "/billing",
        "/login",
        "/logout",
        "/signup",
        "/register",
        "/account/settings",
        "/account/edit",
        "/password",
        "/password-reset",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_viewport_width() -> u32 {
    1440
}

fn default_viewport_height() -> u32 {
    900
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            start_url: default_start_url(),
            login_url: default_login_url(),
            auth_probe_selector: default_auth_probe_selector(),
            search_url_template: default_search_url_template(),
            allow_hosts: default_allow_hosts(),
            blocked_path_prefixes: default_blocked_path_prefixes(),
            headless: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            profile_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_model() -> String {
    "gemini-2.5-computer-use-preview-10-2025".to_string()
}

// Five decision attempts in total, starting from a one-second delay.
fn default_max_retries() -> u32 {
    4
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: String::new(),
            api_base: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default = "default_nag_minutes")]
    pub nag_minutes: u64,
}

fn default_nag_minutes() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreferencesConfig {
    /// Preference store path; falls back to `Paths::preferences_file` when unset.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub shopping: ShoppingConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The decision API key must be present before any run starts.
    pub fn require_api_key(&self) -> Result<&str> {
        if self.decision.api_key.is_empty() {
            return Err(Error::Config(
                "decision.api_key is not set; add it to config.yaml or set GEMINI_API_KEY"
                    .to_string(),
            ));
        }
        Ok(&self.decision.api_key)
    }
}
