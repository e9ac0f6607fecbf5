use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;

/// Owns the file samples submitted for analysis.
///
/// Blobs are addressed by a path relative to the store root, so the root can
/// be moved (or shared over NFS) without rewriting job rows.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `content` under a fresh name and returns its relative path.
    ///
    /// Names are `<shard>/<uuid>[.ext]`, sharded by the first two characters
    /// of the uuid. `extension` is taken from the original file name.
    pub fn store(&self, content: &[u8], original_name: &str) -> Result<PathBuf, StorageError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let shard = &id[..2];
        let file_name = match Path::new(original_name).extension().and_then(|e| e.to_str()) {
            Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
                format!("{}.{}", id, ext.to_ascii_lowercase())
            }
            _ => id.clone(),
        };

        let dir_path = self.root.join(shard);
        self.ensure_directory(&dir_path)?;

        let full_path = dir_path.join(&file_name);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .map_err(|e| StorageError::WriteFile {
                path: full_path.clone(),
                source: e,
            })?;
        file.write_all(content)
            .map_err(|e| StorageError::WriteFile {
                path: full_path.clone(),
                source: e,
            })?;

        Ok(PathBuf::from(shard).join(file_name))
    }

    /// Absolute location of a stored blob.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf, StorageError> {
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || relative.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath(relative.to_path_buf()));
        }
        Ok(self.root.join(relative))
    }

    pub fn read(&self, relative: &Path) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(relative)?;
        std::fs::read(&path).map_err(|e| StorageError::ReadFile { path, source: e })
    }

    /// Deletes a blob. Returns `false` when it was already gone.
    pub fn remove(&self, relative: &Path) -> Result<bool, StorageError> {
        let path = self.resolve(relative)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::RemoveFile { path, source: e }),
        }
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Returns the default blob root: `~/.sift/media`.
pub fn default_media_root() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".sift").join("media"))
}
