use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::StorageError;

/// Upload root that every stored path is relative to.
///
/// Rows in the store only ever hold relative paths with `/` separators;
/// this type is the single place that turns them into filesystem paths.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a stored relative path to an absolute one under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let candidate = Path::new(relative);
        let escapes = candidate.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || relative.is_empty() {
            return Err(StorageError::Traversal(relative.to_string()));
        }
        Ok(self.root.join(candidate))
    }

    /// Converts an absolute path under the root into its stored form.
    pub fn relative(&self, path: &Path) -> Result<String, StorageError> {
        let stripped = path
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::OutsideRoot(path.to_path_buf()))?;
        let parts: Vec<String> = stripped
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }

    /// Writes `content` to `path`, replacing any previous file.
    ///
    /// The bytes land in a sibling temp file first and are renamed into
    /// place, so readers never observe a half-written image.
    pub fn write(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            self.ensure_directory(parent)?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.tmp", file_name));
        std::fs::write(&tmp, content).map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Deletes a file. Returns false when it was already gone.
    pub fn delete(&self, path: &Path) -> Result<bool, StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Deletes a file given its stored relative path.
    pub fn delete_relative(&self, relative: &str) -> Result<bool, StorageError> {
        let path = self.resolve(relative)?;
        self.delete(&path)
    }

    /// Lists every regular file below the root.
    pub fn list_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    /// Verifies that the root accepts writes by creating and removing a probe.
    pub fn check_writable(&self) -> Result<(), StorageError> {
        self.ensure_directory(&self.root)?;
        let probe = self
            .root
            .join(format!(".health-{}", uuid::Uuid::new_v4()));
        std::fs::write(&probe, b"ok").map_err(|e| StorageError::WriteFile {
            path: probe.clone(),
            source: e,
        })?;
        self.delete(&probe)?;
        Ok(())
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
