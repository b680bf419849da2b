use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use trolley_core::Result;

use crate::types::{PreferenceMetadata, PreferenceRecord};

/// YAML-backed store of default products, keyed by canonical item key.
/// Writes re-stamp `updated_at_iso`; unparseable entries are skipped on read
/// so one bad record never poisons the file.
pub struct YamlPreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlPreferenceStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, canonical_key: &str) -> Result<Option<PreferenceRecord>> {
        let _guard = self.lock.lock().await;
        let data = self.read()?;
        Ok(data.get(canonical_key).cloned())
    }

    pub async fn set(&self, canonical_key: &str, record: PreferenceRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.read()?;
        let sanitized = PreferenceRecord {
            product_name: record.product_name,
            metadata: PreferenceMetadata {
                category_label: record.metadata.category_label,
                brand: record.metadata.brand,
                updated_at_iso: Some(Utc::now().to_rfc3339()),
            },
        };
        debug!(key = %canonical_key, product = %sanitized.product_name, "storing preference");
        data.insert(canonical_key.to_string(), sanitized);
        self.write(&data)
    }

    fn read(&self) -> Result<BTreeMap<String, PreferenceRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let raw: BTreeMap<String, serde_yaml::Value> = match serde_yaml::from_str(&content) {
            Ok(map) => map,
            Err(_) => return Ok(BTreeMap::new()),
        };
        let mut records = BTreeMap::new();
        for (key, value) in raw {
            if let Ok(record) = serde_yaml::from_value::<PreferenceRecord>(value) {
                records.insert(key, record);
            }
        }
        Ok(records)
    }

    fn write(&self, data: &BTreeMap<String, PreferenceRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(data)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
