use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One enrolled face: the key of its reference image and its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub identity_key: String,
    pub embedding: Vec<f32>,
}

impl EnrollmentRecord {
    pub fn new(identity_key: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            identity_key: identity_key.into(),
            embedding,
        }
    }
}

impl AsRef<[f32]> for EnrollmentRecord {
    fn as_ref(&self) -> &[f32] {
        &self.embedding
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt enrollment document {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },
    #[error("identity key {0:?} cannot be stored")]
    InvalidKey(String),
    #[error("identity key {0:?} is already enrolled")]
    DuplicateKey(String),
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read side of the enrollment document store.
pub trait EnrollmentStore {
    /// Full snapshot of enrolled records. Empty when nothing is enrolled.
    fn load_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError>;
}

/// Blob side: reference images by identity key.
pub trait ImageStore {
    fn load_image(&self, identity_key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

impl<S: EnrollmentStore + ?Sized> EnrollmentStore for &S {
    fn load_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        (**self).load_all()
    }
}

impl<S: EnrollmentStore + ?Sized> EnrollmentStore for Arc<S> {
    fn load_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        (**self).load_all()
    }
}

impl<S: ImageStore + ?Sized> ImageStore for &S {
    fn load_image(&self, identity_key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load_image(identity_key)
    }
}

impl<S: ImageStore + ?Sized> ImageStore for Arc<S> {
    fn load_image(&self, identity_key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load_image(identity_key)
    }
}

/// Keys double as blob file names.
fn check_key(key: &str) -> Result<(), StoreError> {
    let unsafe_key = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0'])
        || key.starts_with('.');
    if unsafe_key {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Directory-backed store:
///
/// ```text
/// <root>/records.bin        postcard-encoded Vec<EnrollmentRecord>
/// <root>/images/<key>       reference image bytes
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn records_path(&self) -> PathBuf {
        self.root.join("records.bin")
    }

    fn image_path(&self, key: &str) -> PathBuf {
        self.root.join("images").join(key)
    }

    fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, data).map_err(|e| StoreError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
    }

    fn save_records(&self, records: &[EnrollmentRecord]) -> Result<(), StoreError> {
        let path = self.records_path();
        let data = postcard::to_allocvec(records).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        Self::write_atomic(&path, &data)
    }

    /// Add a record and, optionally, its reference image.
    pub fn enroll(
        &self,
        record: EnrollmentRecord,
        image: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        check_key(&record.identity_key)?;
        let mut records = self.load_all()?;
        if records.iter().any(|r| r.identity_key == record.identity_key) {
            return Err(StoreError::DuplicateKey(record.identity_key));
        }
        let image_path = self.image_path(&record.identity_key);
        if let Some(bytes) = image {
            Self::write_atomic(&image_path, bytes)?;
        }
        records.push(record);
        let saved = self.save_records(&records);
        if saved.is_err() && image.is_some() {
            if let Err(e) = std::fs::remove_file(&image_path) {
                log::warn!("leaving orphan image {}: {}", image_path.display(), e);
            }
        }
        saved
    }

    /// Remove a record and its image. Returns whether the key was enrolled.
    pub fn remove(&self, identity_key: &str) -> Result<bool, StoreError> {
        check_key(identity_key)?;
        let mut records = self.load_all()?;
        let before = records.len();
        records.retain(|r| r.identity_key != identity_key);
        if records.len() == before {
            return Ok(false);
        }
        self.save_records(&records)?;
        let image = self.image_path(identity_key);
        match std::fs::remove_file(&image) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&image, e)),
        }
        Ok(true)
    }

    /// Delete every record and image.
    pub fn purge(&self) -> Result<(), StoreError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        }
        Ok(())
    }
}

impl EnrollmentStore for FileStore {
    fn load_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let path = self.records_path();
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        postcard::from_bytes(&data).map_err(|source| StoreError::Corrupt { path, source })
    }
}

impl ImageStore for FileStore {
    fn load_image(&self, identity_key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(identity_key)?;
        let path = self.image_path(identity_key);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<EnrollmentRecord>,
    images: HashMap<String, Vec<u8>>,
}

/// In-process store; records keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(
        &self,
        record: EnrollmentRecord,
        image: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        if inner
            .records
            .iter()
            .any(|r| r.identity_key == record.identity_key)
        {
            return Err(StoreError::DuplicateKey(record.identity_key));
        }
        if let Some(bytes) = image {
            inner.images.insert(record.identity_key.clone(), bytes);
        }
        inner.records.push(record);
        Ok(())
    }

    pub fn remove(&self, identity_key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let before = inner.records.len();
        inner.records.retain(|r| r.identity_key != identity_key);
        inner.images.remove(identity_key);
        Ok(inner.records.len() != before)
    }
}

impl FromIterator<EnrollmentRecord> for MemoryStore {
    fn from_iter<T: IntoIterator<Item = EnrollmentRecord>>(iter: T) -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                records: iter.into_iter().collect(),
                images: HashMap::new(),
            }),
        }
    }
}

impl EnrollmentStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.records.clone())
    }
}

impl ImageStore for MemoryStore {
    fn load_image(&self, identity_key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.images.get(identity_key).cloned())
    }
}

/// Keeps the last snapshot of the wrapped store until [`CachedStore::invalidate`].
#[derive(Debug)]
pub struct CachedStore<S> {
    inner: S,
    snapshot: RwLock<Option<Arc<Vec<EnrollmentRecord>>>>,
}

impl<S: EnrollmentStore> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            snapshot: RwLock::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop the cached snapshot; the next load reads the wrapped store.
    pub fn invalidate(&self) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn cached(&self) -> Result<Arc<Vec<EnrollmentRecord>>, StoreError> {
        if let Some(snapshot) = self
            .snapshot
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .as_ref()
        {
            return Ok(Arc::clone(snapshot));
        }
        let fresh = Arc::new(self.inner.load_all()?);
        log::debug!("cached enrollment snapshot of {} record(s)", fresh.len());
        *self.snapshot.write().map_err(|_| StoreError::Poisoned)? = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}

impl<S: EnrollmentStore> EnrollmentStore for CachedStore<S> {
    fn load_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        Ok(self.cached()?.as_ref().clone())
    }
}

impl<S: ImageStore> ImageStore for CachedStore<S> {
    fn load_image(&self, identity_key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.load_image(identity_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_key() {
        for bad in ["", ".", "..", "a/b", "a\\b", ".hidden"] {
            assert!(matches!(check_key(bad), Err(StoreError::InvalidKey(_))), "{bad}");
        }
        check_key("alice.jpg").unwrap();
        check_key("5f1c2a9e-0000-4000-8000-000000000000").unwrap();
    }

    #[test]
    fn test_memory_store_keeps_order_and_rejects_duplicates() {
        let store = MemoryStore::new();
        store
            .enroll(EnrollmentRecord::new("b", vec![1.0]), None)
            .unwrap();
        store
            .enroll(EnrollmentRecord::new("a", vec![2.0]), Some(vec![1, 2, 3]))
            .unwrap();
        let err = store
            .enroll(EnrollmentRecord::new("a", vec![3.0]), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(k) if k == "a"));

        let keys: Vec<_> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.identity_key)
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(store.load_image("a").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.load_image("b").unwrap(), None);

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.load_image("a").unwrap(), None);
    }

    #[test]
    fn test_cached_store_serves_stale_until_invalidated() {
        let backing = MemoryStore::new();
        let cached = CachedStore::new(&backing);
        assert!(cached.load_all().unwrap().is_empty());

        backing
            .enroll(EnrollmentRecord::new("late", vec![0.0]), None)
            .unwrap();
        assert!(cached.load_all().unwrap().is_empty());

        cached.invalidate();
        assert_eq!(cached.load_all().unwrap().len(), 1);
    }
}
