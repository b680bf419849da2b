//! Household preference handling: shopping-list text normalization, the
//! YAML-backed default-product store, and the Telegram choice flow.

pub mod messenger;
pub mod normalizer;
pub mod session;
pub mod store;
pub mod types;

pub use messenger::{ChoiceMessenger, TelegramMessenger};
pub use normalizer::{Normalizer, RuleNormalizer};
pub use session::{ItemPreferences, PreferenceCoordinator};
pub use store::YamlPreferenceStore;
pub use types::{
    ChoiceDecision, ChoiceRequest, NormalizedGoal, OverrideRequest, PreferenceMetadata,
    PreferenceRecord, ProductChoice,
};
