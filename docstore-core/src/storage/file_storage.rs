// docstore-core/src/storage/file_storage.rs
//! File-based storage backend
//!
//! ```text
//! FileStorage (Storage trait implementation)
//!      ↓
//! <path>       one JSON document: {"collections": [...]}
//! <path>.tmp   written and fsynced first, then renamed over <path>
//! ```
//!
//! A crash mid-save leaves either the old or the new snapshot, never a
//! partial file.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::storage::{Storage, StoreSnapshot};

/// File-based storage backend
///
/// # Examples
///
/// ```ignore
/// use docstore_core::storage::FileStorage;
///
/// let storage = FileStorage::open("university.json")?;
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Use `path` as the snapshot file. The file need not exist yet, but
    /// its parent directory must.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("directory {} does not exist", parent.display()),
                )
                .into());
            }
        }
        Ok(FileStorage { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Result<StoreSnapshot> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot yet, starting empty");
                return Ok(StoreSnapshot::default());
            }
            Err(err) => return Err(err.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(StoreSnapshot::default());
        }
        let snapshot: StoreSnapshot = serde_json::from_reader(BufReader::new(file))?;
        debug!(
            path = %self.path.display(),
            collections = snapshot.collections.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let temp_path = self.temp_path();
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
