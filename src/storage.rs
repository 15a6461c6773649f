use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub const FILES_KEY: &str = "docintel_files";
pub const FOLDERS_KEY: &str = "docintel_folders";
pub const USAGE_KEY: &str = "docintel_usage";
pub const ORGANIZATION_KEY: &str = "docintel_organization";
pub const ANALYTICS_KEY: &str = "docintel_analytics";
pub const CHAT_MESSAGES_KEY: &str = "docintel_chat_messages";
pub const API_KEYS_KEY: &str = "docIntelApiKeys";

/// String-keyed slots holding serialized JSON documents.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
}

/// One `<key>.json` file per slot inside a data directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.slot_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(data))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.slot_path(key);
        fs::write(&path, value)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Recursively overlays `stored` onto `base`. Nested objects are merged key by
/// key so a partial record keeps the defaults it does not mention; arrays,
/// scalars and explicit nulls from `stored` replace the base value.
pub fn deep_merge(base: Value, stored: Value) -> Value {
    match (base, stored) {
        (Value::Object(mut base), Value::Object(stored)) => {
            for (key, value) in stored {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, stored) => stored,
    }
}

/// Reads an object slot, deep-merging the stored value onto `default`. Falls
/// back to `default` when the slot is absent, unreadable or no longer matches
/// the expected shape. Date strings are revived by the typed `DateTime`
/// fields during deserialization. List slots go through [`load_list_slot`].
pub fn load_slot<T>(store: &dyn KeyValueStore, key: &str, default: T) -> T
where
    T: Serialize + DeserializeOwned,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return default,
        Err(e) => {
            warn!(key, error = %e, "Failed to load slot, using defaults");
            return default;
        }
    };

    let stored: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Stored slot is not valid JSON, using defaults");
            return default;
        }
    };

    let base = match serde_json::to_value(&default) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Failed to serialize slot defaults");
            return default;
        }
    };

    match serde_json::from_value(deep_merge(base, stored)) {
        Ok(value) => {
            debug!(key, "Loaded slot");
            value
        }
        Err(e) => {
            warn!(key, error = %e, "Stored slot does not match schema, using defaults");
            default
        }
    }
}

/// Reads a list slot element by element. The slot falls back to `default`
/// only when it is absent, unreadable or not a list; a record that no longer
/// decodes is dropped with a warning and the rest of the list is kept.
pub fn load_list_slot<T>(store: &dyn KeyValueStore, key: &str, default: Vec<T>) -> Vec<T>
where
    T: DeserializeOwned,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return default,
        Err(e) => {
            warn!(key, error = %e, "Failed to load slot, using defaults");
            return default;
        }
    };

    let items = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!(key, "Stored slot is not a list, using defaults");
            return default;
        }
        Err(e) => {
            warn!(key, error = %e, "Stored slot is not valid JSON, using defaults");
            return default;
        }
    };

    let total = items.len();
    let records: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, index, error = %e, "Dropping stored record that does not match schema");
                None
            }
        })
        .collect();
    debug!(key, kept = records.len(), total, "Loaded list slot");
    records
}

/// Serializes and writes a slot. Failures are logged and swallowed; the
/// in-memory state stays authoritative.
pub fn save_slot<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let result = serde_json::to_string_pretty(value)
        .context("Failed to serialize slot")
        .and_then(|json| store.set(key, &json));
    if let Err(e) = result {
        warn!(key, error = %e, "Failed to save slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiEngine, DocumentFile, Folder, Organization, Plan};
    use serde_json::json;

    #[test]
    fn deep_merge_keeps_nested_defaults() {
        let base = json!({"a": 1, "nested": {"x": 1, "y": 2}, "list": [1, 2]});
        let stored = json!({"nested": {"y": 5}, "list": [9], "extra": true});
        let merged = deep_merge(base, stored);
        assert_eq!(
            merged,
            json!({"a": 1, "nested": {"x": 1, "y": 5}, "list": [9], "extra": true})
        );
    }

    #[test]
    fn deep_merge_lets_null_clear_a_default() {
        let base = json!({"theme": "dark", "language": "en"});
        let merged = deep_merge(base, json!({"theme": null}));
        assert_eq!(merged, json!({"theme": null, "language": "en"}));
    }

    #[test]
    fn missing_slot_yields_default() {
        let store = MemoryStore::new();
        let folders = load_list_slot(&store, FOLDERS_KEY, vec![Folder::root()]);
        assert_eq!(folders.len(), 1);
        assert!(folders[0].is_root());
    }

    #[test]
    fn corrupt_slot_yields_default() {
        let store = MemoryStore::new();
        store.set(ORGANIZATION_KEY, "{not json").unwrap();
        let org = load_slot(&store, ORGANIZATION_KEY, Organization::default());
        assert_eq!(org, Organization::default());
    }

    #[test]
    fn list_slot_holding_an_object_yields_default() {
        let store = MemoryStore::new();
        store.set(FOLDERS_KEY, r#"{"id": "root"}"#).unwrap();
        let folders = load_list_slot(&store, FOLDERS_KEY, vec![Folder::root()]);
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].path, "/");
    }

    #[test]
    fn undecodable_records_are_dropped_individually() {
        let store = MemoryStore::new();
        let good = serde_json::to_value(DocumentFile::new(
            "1".to_string(),
            "contract.pdf".to_string(),
            "application/pdf".to_string(),
            10,
            "root".to_string(),
            AiEngine::Qwen,
        ))
        .unwrap();
        let mut broken = good.clone();
        broken["id"] = json!("2");
        broken.as_object_mut().unwrap().remove("downloadUrl");
        store
            .set(FILES_KEY, &json!([good, broken, "not a record"]).to_string())
            .unwrap();

        let files: Vec<DocumentFile> = load_list_slot(&store, FILES_KEY, Vec::new());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "1");
    }

    #[test]
    fn list_slot_with_no_decodable_records_is_empty() {
        let store = MemoryStore::new();
        store.set(FOLDERS_KEY, r#"[{"name": "orphan"}]"#).unwrap();
        let folders = load_list_slot(&store, FOLDERS_KEY, vec![Folder::root()]);
        assert!(folders.is_empty());
    }

    #[test]
    fn partial_organization_is_repaired_from_defaults() {
        let store = MemoryStore::new();
        store
            .set(
                ORGANIZATION_KEY,
                &json!({
                    "name": "Acme",
                    "plan": "pro",
                    "usage": {"uploadsUsed": 7},
                    "settings": {"language": "de"}
                })
                .to_string(),
            )
            .unwrap();

        let org = load_slot(&store, ORGANIZATION_KEY, Organization::default());
        assert_eq!(org.name, "Acme");
        assert_eq!(org.plan, Plan::Pro);
        assert_eq!(org.usage.uploads_used, 7);
        assert_eq!(org.usage.uploads_limit, 100);
        assert_eq!(org.settings.language, "de");
        assert_eq!(org.settings.retention_days, 365);
    }

    #[test]
    fn file_store_persists_slots_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data")).unwrap();
        assert!(store.get(USAGE_KEY).unwrap().is_none());

        save_slot(&store, USAGE_KEY, &json!({"uploadsUsed": 3}));
        assert!(store.dir().join("docintel_usage.json").exists());

        let reopened = JsonFileStore::new(dir.path().join("data")).unwrap();
        let raw = reopened.get(USAGE_KEY).unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["uploadsUsed"], 3);
    }
}
