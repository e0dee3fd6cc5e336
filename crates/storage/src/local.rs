//! Local filesystem backend.
//!
//! Writes go to a hidden temp file next to the target and are published
//! with a rename, so readers never observe a partially written file.

use std::path::{Component, Path, PathBuf};

use polyslim_core::storage_ref::StorageRef;

use crate::error::StorageError;

/// Blob storage rooted at a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a logical name under the root.
    pub fn path_for(&self, logical_name: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(logical_name);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || logical_name.is_empty() {
            return Err(StorageError::InvalidKey(logical_name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Write `bytes` under `logical_name`, replacing any existing file.
    pub async fn put(&self, bytes: &[u8], logical_name: &str) -> Result<PathBuf, StorageError> {
        let target = self.path_for(logical_name)?;
        publish_bytes(bytes, &target).await?;
        Ok(target)
    }

    /// Find the on-disk file a reference points at, if it exists locally.
    ///
    /// Remote keys are checked against the local root too, so references
    /// written while the remote backend was down still resolve.
    pub async fn resolve(&self, reference: &StorageRef) -> Option<PathBuf> {
        let candidates = match reference {
            StorageRef::Local(path) if path.is_absolute() => vec![path.clone()],
            StorageRef::Local(path) => vec![path.clone(), self.root.join(path)],
            StorageRef::Remote(key) => self.path_for(key).ok().into_iter().collect(),
        };
        for candidate in candidates {
            if matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
                return Some(candidate);
            }
        }
        None
    }

    /// Path of `path` relative to the root, with `/` separators.
    ///
    /// `None` when the file lies outside the root.
    pub fn public_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }
}

/// Write `bytes` to `target` through a sibling temp file and a rename.
pub async fn publish_bytes(bytes: &[u8], target: &Path) -> Result<(), StorageError> {
    let tmp = temp_sibling(target).await?;
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    rename_into_place(&tmp, target).await
}

/// Copy `source` to `target` through a sibling temp file and a rename.
pub async fn publish_copy(source: &Path, target: &Path) -> Result<(), StorageError> {
    let tmp = temp_sibling(target).await?;
    if let Err(e) = tokio::fs::copy(source, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    rename_into_place(&tmp, target).await
}

/// Ensure the target directory exists and pick a unique temp name inside it.
async fn temp_sibling(target: &Path) -> Result<PathBuf, StorageError> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidKey(target.display().to_string()))?;
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(parent).await?;
    Ok(parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4())))
}

async fn rename_into_place(tmp: &Path, target: &Path) -> Result<(), StorageError> {
    if let Err(e) = tokio::fs::rename(tmp, target).await {
        let _ = tokio::fs::remove_file(tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn put_creates_parents_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());

        let path = backend.put(b"glb", "uploads/anonymous/a.glb").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"glb");

        let mut entries = tokio::fs::read_dir(path.parent().unwrap()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().into_string().unwrap());
        }
        assert_eq!(names, vec!["a.glb".to_string()]);
    }

    #[tokio::test]
    async fn put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.put(b"one", "outputs/x/1.glb").await.unwrap();
        let path = backend.put(b"two", "outputs/x/1.glb").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
    }

    #[test]
    fn keys_cannot_escape_root() {
        let backend = LocalBackend::new("/srv/storage");
        assert_matches!(backend.path_for("../etc/passwd"), Err(StorageError::InvalidKey(_)));
        assert_matches!(backend.path_for("/etc/passwd"), Err(StorageError::InvalidKey(_)));
        assert_matches!(backend.path_for(""), Err(StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn remote_keys_resolve_against_local_root() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.put(b"x", "uploads/u/k.glb").await.unwrap();

        let hit = backend
            .resolve(&StorageRef::Remote("uploads/u/k.glb".into()))
            .await;
        assert!(hit.is_some());
        let miss = backend
            .resolve(&StorageRef::Remote("uploads/u/missing.glb".into()))
            .await;
        assert!(miss.is_none());
    }

    #[test]
    fn public_path_is_root_relative() {
        let backend = LocalBackend::new("/srv/storage");
        assert_eq!(
            backend
                .public_path(Path::new("/srv/storage/uploads/anonymous/a.glb"))
                .as_deref(),
            Some("uploads/anonymous/a.glb")
        );
        assert_eq!(backend.public_path(Path::new("/etc/passwd")), None);
        assert_eq!(backend.public_path(Path::new("../up.glb")), None);
    }
}
