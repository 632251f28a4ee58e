//! File-based backend for persistent storage.
//!
//! Each database lives in a single image file under the backend's base
//! directory:
//!
//! ```text
//! <base_dir>/
//! ├─ <name>.sofa        # CBOR store image
//! ├─ <name>.sofa.tmp    # next image, renamed over the old one on commit
//! └─ <name>.lock        # advisory lock held while a connection is open
//! ```

use crate::backend::{Backend, KvEngine};
use crate::error::{StorageError, StorageResult};
use crate::store::{PersistedImage, SharedStore, StoreImage};
use crate::transaction::{KvTransaction, TxnMode};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const IMAGE_EXT: &str = "sofa";
const TEMP_EXT: &str = "sofa.tmp";
const LOCK_EXT: &str = "lock";

/// A backend storing each database as one file in a base directory.
///
/// # Example
///
/// ```no_run
/// use sofadb_storage::{Backend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::new(Path::new("data"));
/// let engine = backend.open("inventory").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `base_dir`. The directory is created lazily.
    #[must_use]
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, db_name: &str, ext: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.{ext}", sanitize(db_name)))
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn valid(&self) -> bool {
        fs::create_dir_all(&self.base_dir).is_ok()
    }

    fn open(&self, db_name: &str) -> StorageResult<Arc<dyn KvEngine>> {
        fs::create_dir_all(&self.base_dir)?;
        let engine = FileEngine::open(
            db_name,
            self.path_for(db_name, IMAGE_EXT),
            self.path_for(db_name, TEMP_EXT),
            self.path_for(db_name, LOCK_EXT),
        )?;
        Ok(Arc::new(engine))
    }

    fn destroy(&self, db_name: &str) -> StorageResult<()> {
        for ext in [IMAGE_EXT, TEMP_EXT, LOCK_EXT] {
            let path = self.path_for(db_name, ext);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// A connection to a file-backed store.
///
/// The whole image is loaded on open. Every commit writes the next image to
/// a temporary file, syncs it, and renames it over the previous one, so a
/// crash leaves either the old or the new image in place.
#[derive(Debug)]
pub struct FileEngine {
    name: String,
    path: PathBuf,
    temp_path: PathBuf,
    store: SharedStore,
    closed: AtomicBool,
    lock_file: File,
}

impl FileEngine {
    /// Opens the image at `path`, taking an exclusive lock on `lock_path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another connection holds the lock,
    /// or a corruption error if the image cannot be decoded.
    pub fn open(
        name: &str,
        path: PathBuf,
        temp_path: PathBuf,
        lock_path: PathBuf,
    ) -> StorageResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked(lock_path.display().to_string()))?;

        let image = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let persisted: PersistedImage = ciborium::de::from_reader(reader)
                .map_err(|e| StorageError::corrupted(format!("{}: {e}", path.display())))?;
            StoreImage::from_persisted(persisted)
        } else {
            StoreImage::default()
        };
        debug!(path = %path.display(), version = image.version, "opened file store");

        Ok(Self {
            name: name.to_string(),
            path,
            temp_path,
            store: SharedStore::with_image(image),
            closed: AtomicBool::new(false),
            lock_file,
        })
    }

    /// Returns the path of the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn persist(&self, image: &StoreImage) -> StorageResult<()> {
        let file = File::create(&self.temp_path)?;
        let mut writer = BufWriter::new(file);
        ciborium::ser::into_writer(&image.to_persisted(), &mut writer)
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| StorageError::from(e.into_error()))?
            .sync_all()?;
        fs::rename(&self.temp_path, &self.path)?;
        Ok(())
    }
}

impl KvEngine for FileEngine {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema_version(&self) -> StorageResult<u32> {
        self.ensure_open()?;
        Ok(self.store.version())
    }

    fn collection_names(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.store.collection_names())
    }

    fn begin(&self, mode: TxnMode, collections: &[&str]) -> StorageResult<KvTransaction> {
        self.ensure_open()?;
        self.store.begin(mode, collections)
    }

    fn begin_upgrade(&self, target_version: u32) -> StorageResult<KvTransaction> {
        self.ensure_open()?;
        self.store.begin_upgrade(target_version)
    }

    fn commit(&self, txn: KvTransaction) -> StorageResult<()> {
        self.ensure_open()?;
        self.store.commit(txn, |image| self.persist(image))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(e) = FileExt::unlock(&self.lock_file) {
                debug!(path = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Maps a database name to a file stem. Bytes outside `[A-Za-z0-9_-]`
/// become `%XX`, so distinct names never share files.
fn sanitize(db_name: &str) -> String {
    let mut stem = String::with_capacity(db_name.len());
    for byte in db_name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => stem.push(char::from(byte)),
            _ => stem.push_str(&format!("%{byte:02X}")),
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init(engine: &dyn KvEngine) {
        let mut upgrade = engine.begin_upgrade(1).unwrap();
        upgrade.create_collection("docs").unwrap();
        engine.commit(upgrade).unwrap();
    }

    #[test]
    fn file_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        {
            let engine = backend.open("db").unwrap();
            init(engine.as_ref());
            let mut txn = engine.begin(TxnMode::ReadWrite, &["docs"]).unwrap();
            txn.put("docs", b"k".to_vec(), b"v".to_vec()).unwrap();
            txn.add_auto("docs", b"auto".to_vec()).unwrap();
            engine.commit(txn).unwrap();
        }

        let engine = backend.open("db").unwrap();
        assert_eq!(engine.schema_version().unwrap(), 1);
        let txn = engine.begin(TxnMode::ReadOnly, &["docs"]).unwrap();
        assert_eq!(txn.get("docs", b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(txn.last_auto_key("docs").unwrap(), 1);
    }

    #[test]
    fn file_second_connection_is_locked() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let _first = backend.open("db").unwrap();
        assert!(matches!(backend.open("db"), Err(StorageError::Locked(_))));
    }

    #[test]
    fn file_close_releases_lock() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let first = backend.open("db").unwrap();
        first.close();
        assert!(backend.open("db").is_ok());
    }

    #[test]
    fn file_destroy_removes_image() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        {
            let engine = backend.open("db").unwrap();
            init(engine.as_ref());
        }
        backend.destroy("db").unwrap();
        let engine = backend.open("db").unwrap();
        assert_eq!(engine.schema_version().unwrap(), 0);
    }

    #[test]
    fn file_corrupt_image_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("db.sofa"), b"\xff\x00garbage").unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(matches!(backend.open("db"), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn sanitize_escapes_reserved_bytes() {
        assert_eq!(sanitize("a/b c"), "a%2Fb%20c");
        assert_eq!(sanitize("ok-name_1.x"), "ok-name_1%2Ex");
        assert_eq!(sanitize("50%"), "50%25");
        assert_ne!(sanitize("a/b"), sanitize("a_b"));
        assert_ne!(sanitize("a%2Fb"), sanitize("a/b"));
    }

    #[test]
    fn similar_names_open_separate_stores() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let slashed = backend.open("a/b").unwrap();
        init(slashed.as_ref());
        let mut txn = slashed.begin(TxnMode::ReadWrite, &["docs"]).unwrap();
        txn.put("docs", b"k".to_vec(), b"slashed".to_vec()).unwrap();
        slashed.commit(txn).unwrap();

        let underscored = backend.open("a_b").unwrap();
        init(underscored.as_ref());
        let txn = underscored.begin(TxnMode::ReadOnly, &["docs"]).unwrap();
        assert_eq!(txn.get("docs", b"k").unwrap(), None);
    }
}
