//! Directory-backed file store shared by every connection.
//!
//! Names are flat: one path component, validated here and nowhere else.
//! Writes land in a temporary file inside the root and are renamed over the
//! final path, so readers see either the old or the new content in full.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::FileEntry;
use crate::error::StoreError;

/// Prefix of in-flight upload files. Names starting with it are reserved.
pub const TEMP_PREFIX: &str = ".fxfer-upload-";

const MODIFIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct FileStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[cfg(windows)]
fn lock_key(name: &str) -> String {
    name.to_ascii_lowercase()
}
#[cfg(not(windows))]
fn lock_key(name: &str) -> String {
    name.to_string()
}

fn format_modified(meta: &fs::Metadata) -> String {
    match meta.modified() {
        Ok(t) => DateTime::<Local>::from(t).format(MODIFIED_FORMAT).to_string(),
        Err(_) => String::new(),
    }
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| StoreError::io(&root.display().to_string(), e))?;
        let root = root
            .canonicalize()
            .map_err(|e| StoreError::io(&root.display().to_string(), e))?;
        Ok(Self {
            root,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject anything that is not a single plain path component.
    pub fn validate_name(name: &str) -> Result<(), StoreError> {
        let bad = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
            || name.starts_with(TEMP_PREFIX);
        // Windows: ':' selects drive letters and alternate data streams
        #[cfg(windows)]
        let bad = bad || name.contains(':');
        if bad {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Map a name to its path under the root. Existing entries are
    /// canonicalized so a symlink cannot lead outside the root.
    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        Self::validate_name(name)?;
        let joined = self.root.join(name);
        match fs::symlink_metadata(&joined) {
            Ok(_) => {
                let canon = joined.canonicalize().map_err(|e| match e.kind() {
                    ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
                    _ => StoreError::io(name, e),
                })?;
                if !canon.starts_with(&self.root) {
                    return Err(StoreError::InvalidName(name.to_string()));
                }
                Ok(joined)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(joined),
            Err(e) => Err(StoreError::io(name, e)),
        }
    }

    /// All regular files, sorted by name. Symlinks are listed when they
    /// resolve to a regular file inside the root, matching what `read` serves.
    pub fn list(&self) -> Result<Vec<FileEntry>, StoreError> {
        let rd = fs::read_dir(&self.root).map_err(|e| StoreError::io(".", e))?;
        let mut files = Vec::new();
        for dent in rd {
            let dent = dent.map_err(|e| StoreError::io(".", e))?;
            let Ok(name) = dent.file_name().into_string() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            // Entries can vanish between readdir and stat
            let meta = match dent.file_type() {
                Ok(ft) if ft.is_symlink() => self
                    .resolve(&name)
                    .ok()
                    .and_then(|path| fs::metadata(path).ok()),
                Ok(_) => dent.metadata().ok(),
                Err(_) => None,
            };
            let Some(meta) = meta else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            files.push(FileEntry {
                name,
                size: meta.len(),
                modified: format_modified(&meta),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Metadata for a single file.
    pub fn stat(&self, name: &str) -> Result<FileEntry, StoreError> {
        let path = self.resolve(name)?;
        let meta = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StoreError::NotFound(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(StoreError::io(name, e)),
        };
        Ok(FileEntry {
            name: name.to_string(),
            size: meta.len(),
            modified: format_modified(&meta),
        })
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(name)?;
        if path.is_dir() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
            _ => StoreError::io(name, e),
        })
    }

    /// Create or atomically replace `name` with `bytes`.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<FileEntry, StoreError> {
        let path = self.resolve(name)?;
        let lock = self.write_lock(name);
        let result = {
            let _guard = lock.lock();
            self.write_locked(name, &path, bytes)
        };
        self.release_lock(name, lock);
        result
    }

    fn write_locked(&self, name: &str, path: &Path, bytes: &[u8]) -> Result<FileEntry, StoreError> {
        if path.is_dir() {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| StoreError::io(name, e))?;
        tmp.write_all(bytes).map_err(|e| StoreError::io(name, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(name, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644));
        }
        tmp.persist(path).map_err(|e| StoreError::io(name, e.error))?;
        self.stat(name)
    }

    fn write_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .entry(lock_key(name))
            .or_default()
            .clone()
    }

    fn release_lock(&self, name: &str, lock: Arc<Mutex<()>>) {
        let key = lock_key(name);
        let mut table = self.write_locks.lock();
        drop(lock);
        if table.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            table.remove(&key);
        }
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.write_locks.lock().len()
    }
}
