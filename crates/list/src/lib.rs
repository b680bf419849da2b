//! Shopping-list storage. The orchestrator only talks to the [`ListStore`]
//! trait; the YAML-file implementation is the baseline backend.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use trolley_core::types::{AddedResult, ItemStatus, ListItem, NotFoundResult, ShoppingSummary};
use trolley_core::{Error, Result};

#[async_trait]
pub trait ListStore: Send + Sync {
    /// Items still waiting to be shopped, in list order.
    async fn pending_items(&self) -> Result<Vec<ListItem>>;

    async fn mark_completed(&self, item_id: &str, result: &AddedResult) -> Result<()>;

    async fn mark_not_found(&self, item_id: &str, result: &NotFoundResult) -> Result<()>;

    async fn mark_failed(&self, item_id: &str, error: &str) -> Result<()>;

    async fn send_summary(&self, summary: &ShoppingSummary) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ListDocument {
    #[serde(default)]
    items: Vec<ListEntry>,
}

/// On-disk shape of one list entry. Outcome annotations are written in place
/// so the file stays human-editable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListEntry {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default = "default_status")]
    status: ItemStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn default_status() -> ItemStatus {
    ItemStatus::NeedsAction
}

impl ListEntry {
    /// Entries without an explicit id fall back to the name, matching how
    /// hand-written list files usually look.
    fn effective_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    fn push_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }
}

pub struct YamlListStore {
    path: PathBuf,
    // Serializes read-modify-write cycles across concurrent item workers.
    lock: Mutex<()>,
}

impl YamlListStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read_document(&self) -> Result<ListDocument> {
        if !self.path.exists() {
            return Ok(ListDocument::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let doc: ListDocument = serde_yaml::from_str(&content)?;
        Ok(doc)
    }

    fn write_document(&self, doc: &ListDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(doc)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn update_entry<F>(&self, item_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ListEntry),
    {
        let mut doc = self.read_document()?;
        let entry = doc
            .items
            .iter_mut()
            .find(|e| e.effective_id() == item_id)
            .ok_or_else(|| Error::ListStore(format!("no list entry with id {item_id:?}")))?;
        apply(entry);
        self.write_document(&doc)
    }
}

#[async_trait]
impl ListStore for YamlListStore {
    async fn pending_items(&self) -> Result<Vec<ListItem>> {
        let _guard = self.lock.lock().await;
        let doc = self.read_document()?;
        let items = doc
            .items
            .iter()
            .filter(|e| e.status == ItemStatus::NeedsAction)
            .map(|e| ListItem {
                id: e.effective_id().to_string(),
                name: e.name.clone(),
                status: ItemStatus::NeedsAction,
            })
            .collect();
        Ok(items)
    }

    async fn mark_completed(&self, item_id: &str, result: &AddedResult) -> Result<()> {
        let _guard = self.lock.lock().await;
        debug!(item_id = %item_id, "marking list entry completed");
        self.update_entry(item_id, |entry| {
            entry.status = ItemStatus::Completed;
            entry.price_text = Some(result.price_text.clone());
            entry.price_cents = Some(result.price_cents());
            entry.url = Some(result.url.clone());
            entry.quantity = Some(result.quantity);
        })
    }

    async fn mark_not_found(&self, item_id: &str, result: &NotFoundResult) -> Result<()> {
        let _guard = self.lock.lock().await;
        debug!(item_id = %item_id, "marking list entry not found");
        self.update_entry(item_id, |entry| {
            entry.push_tag("#404");
            entry.explanation = Some(result.explanation.clone());
        })
    }

    async fn mark_failed(&self, item_id: &str, error: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        debug!(item_id = %item_id, error = %error, "marking list entry failed");
        self.update_entry(item_id, |entry| {
            entry.push_tag("#failed");
            entry.error = Some(error.to_string());
        })
    }

    async fn send_summary(&self, summary: &ShoppingSummary) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut lines = vec!["Shopping Summary".to_string(), String::new(), "Added:".to_string()];
        for item in &summary.added_items {
            lines.push(format!(
                "- {} x{} @ {}",
                item.item_name, item.quantity, item.price_text
            ));
        }
        lines.push(String::new());
        lines.push("Not Found:".to_string());
        for nf in &summary.not_found_items {
            lines.push(format!("- {}: {}", nf.item_name, nf.explanation));
        }
        lines.push(String::new());
        lines.push("Failed:".to_string());
        for failure in &summary.failed_items {
            lines.push(format!("- item {}: {}", failure.item_id, failure.error));
        }
        lines.push(String::new());
        lines.push(format!("Total: {}", summary.total_cost_text));

        let out = self.path.with_extension("summary.txt");
        std::fs::write(&out, lines.join("\n"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(content: &str) -> (TempDir, YamlListStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.yaml");
        std::fs::write(&path, content).unwrap();
        (dir, YamlListStore::new(path))
    }

    const SAMPLE: &str = r#"
items:
  - id: "1"
    name: oat milk
  - id: "2"
    name: sourdough bread
    status: completed
  - name: butter
"#;

    #[tokio::test]
    async fn test_pending_items_skips_completed() {
        let (_dir, store) = store_with(SAMPLE);
        let items = store.pending_items().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "1");
        assert_eq!(items[1].id, "butter");
    }

    #[tokio::test]
    async fn test_mark_completed_annotates_entry() {
        let (_dir, store) = store_with(SAMPLE);
        let result = AddedResult {
            item_name: "Oat Milk 2L".to_string(),
            price_text: "$4.99".to_string(),
            url: "https://www.metro.ca/p/oat-milk".to_string(),
            quantity: 1,
        };
        store.mark_completed("1", &result).await.unwrap();

        let items = store.pending_items().await.unwrap();
        assert!(items.iter().all(|i| i.id != "1"));

        let raw = std::fs::read_to_string(store.path.clone()).unwrap();
        assert!(raw.contains("price_cents: 499"));
        assert!(raw.contains("status: completed"));
    }

    #[tokio::test]
    async fn test_mark_not_found_keeps_item_pending() {
        let (_dir, store) = store_with(SAMPLE);
        let result = NotFoundResult {
            item_name: "butter".to_string(),
            explanation: "no stock".to_string(),
        };
        store.mark_not_found("butter", &result).await.unwrap();

        let raw = std::fs::read_to_string(store.path.clone()).unwrap();
        assert!(raw.contains("'#404'"));
        assert!(raw.contains("no stock"));
        // Not-found items stay on the list for the next run.
        let items = store.pending_items().await.unwrap();
        assert!(items.iter().any(|i| i.id == "butter"));
    }

    #[tokio::test]
    async fn test_mark_failed_is_idempotent_on_tag() {
        let (_dir, store) = store_with(SAMPLE);
        store.mark_failed("1", "max_turns_exceeded: 40").await.unwrap();
        store.mark_failed("1", "time_budget_exceeded: 300s").await.unwrap();

        let raw = std::fs::read_to_string(store.path.clone()).unwrap();
        assert_eq!(raw.matches("#failed").count(), 1);
        assert!(raw.contains("time_budget_exceeded"));
    }

    #[tokio::test]
    async fn test_unknown_item_id_errors() {
        let (_dir, store) = store_with(SAMPLE);
        let err = store.mark_failed("missing", "boom").await.unwrap_err();
        assert!(matches!(err, Error::ListStore(_)));
    }

    #[tokio::test]
    async fn test_missing_file_yields_empty_list() {
        let dir = TempDir::new().unwrap();
        let store = YamlListStore::new(dir.path().join("absent.yaml"));
        assert!(store.pending_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_summary_writes_text_file() {
        let (dir, store) = store_with(SAMPLE);
        let mut results = trolley_core::types::ShoppingResults::default();
        results.record(trolley_core::types::Outcome::Added {
            result: AddedResult {
                item_name: "oat milk".to_string(),
                price_text: "$4.99".to_string(),
                url: "https://www.metro.ca/p/oat-milk".to_string(),
                quantity: 2,
            },
            used_default: false,
            starred_default: false,
        });
        results.record(trolley_core::types::Outcome::Failed {
            item_id: "3".to_string(),
            error: "max_turns_exceeded: 40".to_string(),
        });
        store.send_summary(&results.to_summary()).await.unwrap();

        let summary_path = dir.path().join("list.summary.txt");
        let text = std::fs::read_to_string(summary_path).unwrap();
        assert!(text.contains("oat milk x2 @ $4.99"));
        assert!(text.contains("item 3: max_turns_exceeded: 40"));
        assert!(text.contains("Total: $4.99"));
    }
}
