use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use trolley_core::types::AddedResult;
use trolley_core::Result;

use crate::messenger::ChoiceMessenger;
use crate::normalizer::Normalizer;
use crate::store::YamlPreferenceStore;
use crate::types::{
    ChoiceDecision, ChoiceRequest, NormalizedGoal, PreferenceMetadata, PreferenceRecord,
    ProductChoice,
};

/// Shared entry point for preference work. One coordinator serves the whole
/// run; each item gets its own [`ItemPreferences`] session.
pub struct PreferenceCoordinator {
    normalizer: Arc<dyn Normalizer>,
    store: Arc<YamlPreferenceStore>,
    messenger: Option<Arc<dyn ChoiceMessenger>>,
}

impl PreferenceCoordinator {
    pub fn new(
        normalizer: Arc<dyn Normalizer>,
        store: Arc<YamlPreferenceStore>,
        messenger: Option<Arc<dyn ChoiceMessenger>>,
    ) -> Self {
        Self {
            normalizer,
            store,
            messenger,
        }
    }

    pub async fn normalize_item(&self, item_text: &str) -> Result<NormalizedGoal> {
        self.normalizer.normalize(item_text).await
    }

    pub fn session(&self, normalized: NormalizedGoal) -> ItemPreferences {
        ItemPreferences {
            normalized,
            store: Arc::clone(&self.store),
            messenger: self.messenger.clone(),
            cached: Mutex::new(None),
            has_existing_preference: AtomicBool::new(false),
            prompted_user: AtomicBool::new(false),
            make_default_pending: AtomicBool::new(false),
        }
    }
}

/// Per-item preference state. The flags feed outcome bookkeeping: an item
/// counts as default-filled when a stored preference existed and the user was
/// never prompted.
pub struct ItemPreferences {
    normalized: NormalizedGoal,
    store: Arc<YamlPreferenceStore>,
    messenger: Option<Arc<dyn ChoiceMessenger>>,
    cached: Mutex<Option<Option<PreferenceRecord>>>,
    has_existing_preference: AtomicBool,
    prompted_user: AtomicBool,
    make_default_pending: AtomicBool,
}

impl ItemPreferences {
    pub fn can_request_choice(&self) -> bool {
        self.messenger.is_some()
    }

    pub fn has_existing_preference(&self) -> bool {
        self.has_existing_preference.load(Ordering::SeqCst)
    }

    pub fn prompted_user(&self) -> bool {
        self.prompted_user.load(Ordering::SeqCst)
    }

    pub fn make_default_pending(&self) -> bool {
        self.make_default_pending.load(Ordering::SeqCst)
    }

    pub async fn existing_preference(&self) -> Result<Option<PreferenceRecord>> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            let record = self.store.get(&self.normalized.canonical_key()).await?;
            if record.is_some() {
                self.has_existing_preference.store(true, Ordering::SeqCst);
            }
            *cached = Some(record);
        }
        Ok(cached.as_ref().and_then(|r| r.clone()))
    }

    pub async fn request_choice(&self, choices: Vec<ProductChoice>) -> Result<ChoiceDecision> {
        let messenger = match &self.messenger {
            Some(messenger) => Arc::clone(messenger),
            None => {
                return Ok(ChoiceDecision::Skip {
                    message: Some(
                        "Preference prompting is disabled; proceeding without selection."
                            .to_string(),
                    ),
                })
            }
        };
        self.prompted_user.store(true, Ordering::SeqCst);
        let request = ChoiceRequest::new(
            self.normalized.category_label(),
            self.normalized.original_text.clone(),
            choices,
        );
        let decision = messenger.request_choice(&request).await?;
        if let ChoiceDecision::Selected { make_default, .. } = &decision {
            if *make_default {
                self.make_default_pending.store(true, Ordering::SeqCst);
            }
        }
        Ok(decision)
    }

    /// Stores the added product as the default for this canonical key.
    pub async fn record_success(&self, added: &AddedResult) -> Result<()> {
        let key = self.normalized.canonical_key();
        info!(key = %key, product = %added.item_name, "recording product preference");
        let record = PreferenceRecord {
            product_name: added.item_name.clone(),
            metadata: PreferenceMetadata {
                category_label: Some(self.normalized.category_label().to_string()),
                brand: self.normalized.brand.clone(),
                updated_at_iso: None,
            },
        };
        self.store.set(&key, record).await?;
        let mut cached = self.cached.lock().await;
        *cached = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::normalizer::RuleNormalizer;

    struct FixedMessenger {
        decision: ChoiceDecision,
    }

    #[async_trait]
    impl ChoiceMessenger for FixedMessenger {
        async fn request_choice(&self, _request: &ChoiceRequest) -> Result<ChoiceDecision> {
            Ok(self.decision.clone())
        }
    }

    fn coordinator(
        dir: &TempDir,
        messenger: Option<Arc<dyn ChoiceMessenger>>,
    ) -> PreferenceCoordinator {
        PreferenceCoordinator::new(
            Arc::new(RuleNormalizer),
            Arc::new(YamlPreferenceStore::new(dir.path().join("prefs.yaml"))),
            messenger,
        )
    }

    #[tokio::test]
    async fn test_existing_preference_sets_flag_and_caches() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, None);
        let normalized = coordinator.normalize_item("milk").await.unwrap();

        let session = coordinator.session(normalized.clone());
        assert!(session.existing_preference().await.unwrap().is_none());
        assert!(!session.has_existing_preference());

        let added = AddedResult {
            item_name: "Lactantia 1% Milk 2L".to_string(),
            price_text: "$5.49".to_string(),
            url: "https://www.metro.ca/p/milk".to_string(),
            quantity: 1,
        };
        session.record_success(&added).await.unwrap();

        let session = coordinator.session(normalized);
        let record = session.existing_preference().await.unwrap().unwrap();
        assert_eq!(record.product_name, "Lactantia 1% Milk 2L");
        assert!(session.has_existing_preference());
    }

    #[tokio::test]
    async fn test_request_choice_without_messenger_skips() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, None);
        let normalized = coordinator.normalize_item("milk").await.unwrap();
        let session = coordinator.session(normalized);

        let decision = session
            .request_choice(vec![ProductChoice::new("Milk", "$4.99")])
            .await
            .unwrap();
        assert!(matches!(decision, ChoiceDecision::Skip { message: Some(_) }));
        assert!(!session.prompted_user());
    }

    #[tokio::test]
    async fn test_starred_selection_marks_default_pending() {
        let dir = TempDir::new().unwrap();
        let choice = ProductChoice::new("Oat Milk 2L", "$4.99");
        let messenger = Arc::new(FixedMessenger {
            decision: ChoiceDecision::Selected {
                index: 1,
                choice: choice.clone(),
                make_default: true,
            },
        });
        let coordinator = coordinator(&dir, Some(messenger));
        let normalized = coordinator.normalize_item("oat milk").await.unwrap();
        let session = coordinator.session(normalized);

        let decision = session.request_choice(vec![choice]).await.unwrap();
        assert!(matches!(decision, ChoiceDecision::Selected { .. }));
        assert!(session.prompted_user());
        assert!(session.make_default_pending());
    }
}
