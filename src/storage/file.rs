use super::*;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Storage kept in a single JSON document on disk
///
/// The whole map is held in memory and rewritten on every mutation through
/// a temporary file and a rename, so a crash mid-write leaves the previous
/// document intact. The in-memory copy only changes once the write went
/// through.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    inner: Mutex<BTreeMap<Key, StoredValue>>,
}

impl FileStorage {
    /// Open (or create on first write) the storage file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_owned();
        let map = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = map.len(), "opened storage file");

        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    pub fn open_shared(path: impl AsRef<Path>) -> Result<SharedStorage, StorageError> {
        Ok(Arc::new(Self::open(path)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, map: &BTreeMap<Key, StoredValue>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&serde_json::to_vec(map)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: KeyRef) -> Result<Option<StoredValue>, StorageError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn set(&self, key: KeyRef, value: StoredValue) -> Result<(), StorageError> {
        let mut map = self.inner.lock();
        let mut next = map.clone();
        next.insert(key.to_owned(), value);
        self.flush(&next)?;
        *map = next;
        Ok(())
    }

    fn delete(&self, key: KeyRef) -> Result<(), StorageError> {
        let mut map = self.inner.lock();
        if !map.contains_key(key) {
            return Ok(());
        }
        let mut next = map.clone();
        next.remove(key);
        self.flush(&next)?;
        *map = next;
        Ok(())
    }
}
