use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::io::Storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailRecord {
    pub image_url: String,
    pub prompt: String,
    pub title: String,
    #[serde(default)]
    pub created_at: u64,
}

impl ThumbnailRecord {
    pub fn new(image_url: &str, prompt: &str, title: &str) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            image_url: image_url.to_string(),
            prompt: prompt.to_string(),
            title: title.to_string(),
            created_at,
        }
    }
}

#[async_trait]
pub trait ThumbnailStore: Send + Sync {
    async fn save_thumbnail(&self, record: &ThumbnailRecord) -> Result<()>;
}

/// Appends one JSON line per record.
pub struct JsonlThumbnailStore {
    storage: Arc<dyn Storage>,
    path: String,
}

impl JsonlThumbnailStore {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }
}

#[async_trait]
impl ThumbnailStore for JsonlThumbnailStore {
    async fn save_thumbnail(&self, record: &ThumbnailRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.storage.append(&self.path, &line).await
    }
}

/// Records the image; a failure is logged and never propagated, since the
/// in-memory result is already committed.
pub async fn record_quietly(store: &dyn ThumbnailStore, record: ThumbnailRecord) {
    if let Err(e) = store.save_thumbnail(&record).await {
        warn!("Failed to save thumbnail {}: {:#}", record.image_url, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    #[tokio::test]
    async fn test_records_are_appended_as_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("thumbnails.jsonl").to_string_lossy().to_string();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let store = JsonlThumbnailStore::new(storage.clone(), path.clone());

        store
            .save_thumbnail(&ThumbnailRecord::new("https://img/1.png", "p1", "衝撃の結果"))
            .await?;
        record_quietly(&store, ThumbnailRecord::new("https://img/2.png", "p2", "衝撃の結果")).await;

        let content = String::from_utf8(storage.read(&path).await?)?;
        let records: Vec<ThumbnailRecord> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].image_url, "https://img/2.png");
        assert_eq!(records[0].title, "衝撃の結果");
        Ok(())
    }
}
