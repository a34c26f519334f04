//! Uploaded materials and the preview files shown for them.
//!
//! A preview exists exactly as long as its [`MaterialItem`]: the handle
//! releases it on drop, so removing an item or discarding the whole state
//! releases every preview once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::utils::data_url;

pub trait PreviewBackend: Send + Sync {
    fn create(&self, id: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf>;
    fn release(&self, location: &Path);
}

/// Writes previews as files under one directory.
#[derive(Debug)]
pub struct FsPreviewBackend {
    dir: PathBuf,
}

impl FsPreviewBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PreviewBackend for FsPreviewBackend {
    fn create(&self, id: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create preview dir {}", self.dir.display()))?;
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let path = self.dir.join(format!("{}.{}", id, ext));
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write preview {}", path.display()))?;
        Ok(path)
    }

    fn release(&self, location: &Path) {
        if let Err(e) = std::fs::remove_file(location) {
            warn!("Failed to release preview {}: {}", location.display(), e);
        }
    }
}

pub struct PreviewHandle {
    location: PathBuf,
    backend: Arc<dyn PreviewBackend>,
}

impl PreviewHandle {
    pub fn location(&self) -> &Path {
        &self.location
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        debug!("releasing preview {}", self.location.display());
        self.backend.release(&self.location);
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PreviewHandle").field(&self.location).finish()
    }
}

#[derive(Debug)]
pub struct MaterialItem {
    pub id: String,
    pub file_name: String,
    pub raw: Vec<u8>,
    pub preview: PreviewHandle,
    pub description: String,
}

impl MaterialItem {
    pub fn data_url(&self) -> String {
        data_url::encode(&self.file_name, &self.raw)
    }
}

pub struct MaterialManager {
    backend: Arc<dyn PreviewBackend>,
}

impl MaterialManager {
    pub fn new(backend: Arc<dyn PreviewBackend>) -> Self {
        Self { backend }
    }

    pub fn create(&self, file_name: &str, raw: Vec<u8>, description: &str) -> Result<MaterialItem> {
        let id = format!("mat-{:08x}", rand::random::<u32>());
        let location = self.backend.create(&id, file_name, &raw)?;
        Ok(MaterialItem {
            id,
            file_name: file_name.to_string(),
            raw,
            preview: PreviewHandle {
                location,
                backend: self.backend.clone(),
            },
            description: description.to_string(),
        })
    }

    /// Removes the item with `id`, releasing its preview. Returns false when
    /// no such item exists.
    pub fn remove(&self, materials: &mut Vec<MaterialItem>, id: &str) -> bool {
        match materials.iter().position(|m| m.id == id) {
            Some(pos) => {
                drop(materials.remove(pos));
                true
            }
            None => false,
        }
    }

    pub fn release_all(&self, materials: &mut Vec<MaterialItem>) {
        materials.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every create/release so tests can count them.
    #[derive(Debug, Default)]
    pub(crate) struct CountingBackend {
        pub created: Mutex<Vec<PathBuf>>,
        pub released: Mutex<Vec<PathBuf>>,
    }

    impl CountingBackend {
        pub(crate) fn release_count(&self, location: &Path) -> usize {
            self.released
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.as_path() == location)
                .count()
        }
    }

    impl PreviewBackend for CountingBackend {
        fn create(&self, id: &str, _file_name: &str, _bytes: &[u8]) -> Result<PathBuf> {
            let path = PathBuf::from(format!("mem://{}", id));
            self.created.lock().unwrap().push(path.clone());
            Ok(path)
        }

        fn release(&self, location: &Path) {
            self.released.lock().unwrap().push(location.to_path_buf());
        }
    }

    #[test]
    fn test_remove_releases_exactly_once() {
        let backend = Arc::new(CountingBackend::default());
        let manager = MaterialManager::new(backend.clone());
        let mut materials = vec![
            manager.create("face.png", vec![1, 2, 3], "本人の顔").unwrap(),
            manager.create("bg.jpg", vec![4], "背景").unwrap(),
        ];
        let first_id = materials[0].id.clone();
        let first_loc = materials[0].preview.location().to_path_buf();

        assert!(manager.remove(&mut materials, &first_id));
        assert!(!manager.remove(&mut materials, &first_id));
        assert_eq!(backend.release_count(&first_loc), 1);
        assert_eq!(materials.len(), 1);
    }

    #[test]
    fn test_release_all_and_drop_release_remaining() {
        let backend = Arc::new(CountingBackend::default());
        let manager = MaterialManager::new(backend.clone());
        let mut materials: Vec<_> = (0..3)
            .map(|i| manager.create(&format!("{}.png", i), vec![i], "").unwrap())
            .collect();

        manager.release_all(&mut materials);
        assert_eq!(backend.released.lock().unwrap().len(), 3);

        let kept = manager.create("late.png", vec![9], "").unwrap();
        drop(kept);
        assert_eq!(backend.released.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_fs_backend_writes_and_deletes_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = MaterialManager::new(Arc::new(FsPreviewBackend::new(dir.path())));
        let item = manager.create("logo.png", b"png-bytes".to_vec(), "ロゴ")?;
        let location = item.preview.location().to_path_buf();

        assert!(location.exists());
        assert_eq!(location.extension().and_then(|e| e.to_str()), Some("png"));
        assert!(item.data_url().starts_with("data:image/png;base64,"));

        drop(item);
        assert!(!location.exists());
        Ok(())
    }
}
