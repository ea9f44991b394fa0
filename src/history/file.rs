use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::path::{ Path, PathBuf };
use tokio::fs;
use tokio::sync::Mutex;

use super::KeyValueStore;
use crate::error::StoreError;

/// All keys live in one JSON object on disk, rewritten whole on every `set`.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value.to_string());

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        // Write-then-rename so a crash mid-write leaves the previous state intact.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&entries)?).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("Wrote '{}' to {}", key, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        assert_eq!(store.get("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_survive_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStore::new(&path);
        store.set("ollama_selected_model", "llama3.2").await.unwrap();
        store.set("ollama_chat_messages", "[]").await.unwrap();
        store.set("ollama_selected_model", "mistral").await.unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("ollama_selected_model").await.unwrap().as_deref(), Some("mistral"));
        assert_eq!(reopened.get("ollama_chat_messages").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileStore::new(&path);
        assert!(matches!(store.get("k").await, Err(StoreError::JsonError(_))));
    }
}
