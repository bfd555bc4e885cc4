//! File-based disk backend for restart durability.
//!
//! Directory layout:
//!
//! ```text
//! <disk_path>/
//! ├─ LOCK                  # Advisory lock, one cache per directory
//! └─ records/
//!    ├─ <sha256(key)>.rec  # One record per key
//!    └─ <sha256(key)>.tmp  # In-flight write, renamed over .rec
//! ```

use crate::backend::DiskBackend;
use crate::error::{CacheError, CacheResult};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const RECORDS_DIR: &str = "records";
const RECORD_EXT: &str = "rec";
const TEMP_EXT: &str = "tmp";

/// A disk backend storing one file per key.
///
/// File names are the SHA-256 of the key, so arbitrary keys map to safe
/// names. Writes go to a temporary file that is synced and then renamed
/// over the record, so a crash never leaves a torn record behind.
///
/// # Thread Safety
///
/// The backend holds an exclusive advisory lock on its directory for its
/// whole lifetime; a second cache opening the same directory fails with
/// [`CacheError::Locked`].
///
/// # Example
///
/// ```no_run
/// use tiersync_cache::{DiskBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("cache-dir")).unwrap();
/// backend.write("user:1", b"record bytes").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a backend rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or
    /// [`CacheError::Locked`] if another cache holds it.
    pub fn open(path: &Path) -> CacheResult<Self> {
        fs::create_dir_all(path.join(RECORDS_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CacheError::Locked(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn records_dir(&self) -> PathBuf {
        self.path.join(RECORDS_DIR)
    }

    fn file_stem(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        let mut stem = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(stem, "{byte:02x}");
        }
        stem
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.records_dir()
            .join(Self::file_stem(key))
            .with_extension(RECORD_EXT)
    }

    fn record_files(&self) -> CacheResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir_entry in fs::read_dir(self.records_dir())? {
            let path = dir_entry?.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXT) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl DiskBackend for FileBackend {
    fn write(&self, key: &str, record: &[u8]) -> CacheResult<()> {
        let final_path = self.record_path(key);
        let temp_path = final_path.with_extension(TEMP_EXT);

        let mut file = File::create(&temp_path)?;
        file.write_all(record)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    fn read(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all(&self) -> CacheResult<Vec<Vec<u8>>> {
        self.record_files()?
            .into_iter()
            .map(|path| fs::read(path).map_err(CacheError::from))
            .collect()
    }

    fn clear(&self) -> CacheResult<()> {
        for path in self.record_files()? {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
