use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("List store error: {0}")]
    ListStore(String),

    #[error("Preference error: {0}")]
    Preference(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error should trigger a gated re-auth and a fresh attempt
    /// for the current item instead of failing it outright.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
