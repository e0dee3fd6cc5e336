//! Backend-tagged blob references and logical key naming.
//!
//! A [`StorageRef`] never embeds credentials. It is persisted on the job
//! record as a prefixed string (`local:<path>` / `remote:<key>`) and
//! resolved only by the file store.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// Persisted prefix for local-path references.
const LOCAL_PREFIX: &str = "local:";

/// Persisted prefix for remote object-key references.
const REMOTE_PREFIX: &str = "remote:";

/// Logical prefix for uploaded input models.
pub const UPLOADS_PREFIX: &str = "uploads";

/// Logical prefix for optimizer outputs.
pub const OUTPUTS_PREFIX: &str = "outputs";

/// Sentinel owner string for unauthenticated (preview) submissions.
pub const ANONYMOUS: &str = "anonymous";

// ---------------------------------------------------------------------------
// StorageRef
// ---------------------------------------------------------------------------

/// An opaque pointer to a blob held by one of the file-store backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "backend", content = "location", rename_all = "snake_case")]
pub enum StorageRef {
    /// A file on the local filesystem backend.
    Local(PathBuf),
    /// An object key in the remote bucket.
    Remote(String),
}

impl StorageRef {
    /// Parse the persisted form. Unprefixed legacy values are remote keys.
    pub fn parse(raw: &str) -> Self {
        if let Some(path) = raw.strip_prefix(LOCAL_PREFIX) {
            Self::Local(PathBuf::from(path))
        } else if let Some(key) = raw.strip_prefix(REMOTE_PREFIX) {
            Self::Remote(key.to_string())
        } else {
            Self::Remote(raw.to_string())
        }
    }

    /// Encode for persistence on the job record.
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Local(path) => format!("{LOCAL_PREFIX}{}", path.display()),
            Self::Remote(key) => format!("{REMOTE_PREFIX}{key}"),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// File extension of the referenced blob, lowercased and including the dot.
    pub fn extension(&self) -> Option<String> {
        let path = match self {
            Self::Local(path) => path.as_path(),
            Self::Remote(key) => Path::new(key.as_str()),
        };
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_db_string())
    }
}

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

/// Job ownership, resolved by the identity layer before submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    Anonymous,
    User(String),
}

impl Owner {
    /// Parse the persisted owner column.
    pub fn from_db(raw: &str) -> Self {
        if raw.is_empty() || raw == ANONYMOUS {
            Self::Anonymous
        } else {
            Self::User(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Anonymous => ANONYMOUS,
            Self::User(identity) => identity,
        }
    }

    /// The owner rendered as a single safe key segment.
    pub fn key_segment(&self) -> String {
        sanitize_segment(self.as_str())
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Key naming
// ---------------------------------------------------------------------------

/// Logical name for a freshly uploaded input: `uploads/{owner}/{uuid}{ext}`.
pub fn upload_key(owner: &Owner, extension: &str) -> String {
    format!(
        "{UPLOADS_PREFIX}/{}/{}{}",
        owner.key_segment(),
        uuid::Uuid::new_v4(),
        extension.to_ascii_lowercase()
    )
}

/// Logical name for an optimizer output: `outputs/{owner}/{job_id}.glb`.
pub fn output_key(owner: &Owner, job_id: DbId) -> String {
    format!("{OUTPUTS_PREFIX}/{}/{job_id}.glb", owner.key_segment())
}

/// Replace characters that would let an identity escape its key prefix.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.replace("..", "_");
    if cleaned.trim().is_empty() {
        ANONYMOUS.to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_form_is_backend_qualified() {
        let local = StorageRef::Local(PathBuf::from("/srv/storage/uploads/a.glb"));
        let remote = StorageRef::Remote("outputs/bob/7.glb".into());
        assert_eq!(local.to_db_string(), "local:/srv/storage/uploads/a.glb");
        assert_eq!(remote.to_db_string(), "remote:outputs/bob/7.glb");
        assert_eq!(StorageRef::parse(&local.to_db_string()), local);
        assert_eq!(StorageRef::parse(&remote.to_db_string()), remote);
    }

    #[test]
    fn unprefixed_values_are_remote_keys() {
        assert_eq!(
            StorageRef::parse("uploads/x.glb"),
            StorageRef::Remote("uploads/x.glb".into())
        );
    }

    #[test]
    fn extension_is_lowercased() {
        let r = StorageRef::Remote("uploads/anonymous/abc.GLB".into());
        assert_eq!(r.extension().as_deref(), Some(".glb"));
        assert_eq!(StorageRef::Remote("noext".into()).extension(), None);
    }

    #[test]
    fn owner_round_trips_sentinel() {
        assert_eq!(Owner::from_db("anonymous"), Owner::Anonymous);
        assert_eq!(Owner::from_db(""), Owner::Anonymous);
        assert_eq!(
            Owner::from_db("ada@example.com"),
            Owner::User("ada@example.com".into())
        );
        assert_eq!(Owner::Anonymous.as_str(), "anonymous");
    }

    #[test]
    fn keys_are_namespaced_by_owner() {
        let owner = Owner::User("ada@example.com".into());
        let key = upload_key(&owner, ".GLB");
        assert!(key.starts_with("uploads/ada@example.com/"));
        assert!(key.ends_with(".glb"));
        assert_eq!(output_key(&owner, 12), "outputs/ada@example.com/12.glb");
    }

    #[test]
    fn hostile_owner_cannot_escape_prefix() {
        let owner = Owner::User("../../etc/passwd".into());
        let key = output_key(&owner, 1);
        assert!(!key.contains(".."));
        assert_eq!(key.matches('/').count(), 2);
    }
}
