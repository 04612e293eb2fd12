//! Settings Storage as a JSON document

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{SettingsStore, StorageGateway},
};
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Name of the document holding every setting.
pub const SETTINGS_DOCUMENT: &str = "settings.json";

/// JSON-backed settings store implementation
///
/// Keeps every setting in one flat JSON object persisted through the
/// [`StorageGateway`]. The document is loaded lazily on first access and
/// rewritten in full on every change.
pub struct JsonSettingsStore {
    storage: Arc<dyn StorageGateway>,
    values: Mutex<Option<BTreeMap<String, Value>>>,
}

impl JsonSettingsStore {
    pub fn new(storage: Arc<dyn StorageGateway>) -> Self {
        Self {
            storage,
            values: Mutex::new(None),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, Value>> {
        match self.storage.read_document(SETTINGS_DOCUMENT).await? {
            Some(data) => {
                let values: BTreeMap<String, Value> = serde_json::from_slice(&data)?;
                debug!(count = values.len(), "Loaded settings");
                Ok(values)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let mut guard = self.values.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|values| values.get(key).cloned()))
    }

    async fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, Value>) + Send,
    {
        let mut guard = self.values.lock().await;
        let mut values = match guard.take() {
            Some(values) => values,
            None => self.load().await?,
        };
        change(&mut values);

        let data = serde_json::to_vec_pretty(&values);
        let result = match data {
            Ok(data) => {
                self.storage
                    .write_document(SETTINGS_DOCUMENT, Bytes::from(data))
                    .await
            }
            Err(e) => Err(e.into()),
        };
        *guard = Some(values);
        result
    }

    fn type_mismatch(key: &str, expected: &str, actual: &Value) -> BridgeError {
        error!(key = key, expected = expected, "Type mismatch");
        BridgeError::OperationFailed(format!(
            "Type mismatch for {}: expected {}, got {}",
            key, expected, actual
        ))
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let value = Value::String(value.to_string());
        self.modify(|values| {
            values.insert(key.to_string(), value);
        })
        .await?;
        debug!(key = key, "Stored string setting");
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get_value(key).await? {
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(Self::type_mismatch(key, "string", &other)),
            None => Ok(None),
        }
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.modify(|values| {
            values.insert(key.to_string(), Value::Bool(value));
        })
        .await?;
        debug!(key = key, value = value, "Stored bool setting");
        Ok(())
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get_value(key).await? {
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(Self::type_mismatch(key, "bool", &other)),
            None => Ok(None),
        }
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.modify(|values| {
            values.insert(key.to_string(), Value::from(value));
        })
        .await?;
        debug!(key = key, value = value, "Stored integer setting");
        Ok(())
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get_value(key).await? {
            Some(value) => match value.as_i64() {
                Some(i) => Ok(Some(i)),
                None => Err(Self::type_mismatch(key, "i64", &value)),
            },
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.modify(|values| {
            values.remove(key);
        })
        .await
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_value(key).await?.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut guard = self.values.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard
            .as_ref()
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokioStorageGateway;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> JsonSettingsStore {
        let gateway = TokioStorageGateway::with_data_dir(dir.path().to_path_buf());
        JsonSettingsStore::new(Arc::new(gateway))
    }

    #[tokio::test]
    async fn test_bool_setting() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert_eq!(store.get_bool("auto_delete_after_playback").await.unwrap(), None);
        store.set_bool("auto_delete_after_playback", true).await.unwrap();
        assert_eq!(
            store.get_bool("auto_delete_after_playback").await.unwrap(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_settings_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = store(&dir);
            store.set_string("quality", "high").await.unwrap();
            store.set_i64("limit", 42).await.unwrap();
        }

        let reopened = store(&dir);
        assert_eq!(
            reopened.get_string("quality").await.unwrap(),
            Some("high".to_string())
        );
        assert_eq!(reopened.get_i64("limit").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.set_string("flag", "yes").await.unwrap();
        assert!(store.get_bool("flag").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.set_bool("a", true).await.unwrap();
        store.set_bool("b", false).await.unwrap();
        store.delete("a").await.unwrap();

        assert!(!store.has_key("a").await.unwrap());
        assert_eq!(store.list_keys().await.unwrap(), vec!["b".to_string()]);
    }
}
