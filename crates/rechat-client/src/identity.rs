//! Persistent peer identity.
//!
//! The client keeps its id and display name in a small TOML file so a
//! peer reappears under the same identity across restarts. A missing
//! file is not an error, it just means this is a first run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// The identity a peer presents in its hello frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable machine-oriented id.
    pub id: String,
    /// Human-facing display name; becomes the routing identity when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to access identity file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity file {path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize identity: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Where identities are loaded from and saved to.
///
/// A trait so the chat binary can be driven by an in-memory store in
/// tests.
pub trait IdentityStore {
    /// Returns the stored identity, or `None` when none has been saved.
    fn load(&self) -> Result<Option<Identity>, IdentityError>;

    fn save(&self, identity: &Identity) -> Result<(), IdentityError>;
}

/// Identity storage in a TOML file.
pub struct TomlIdentityStore {
    path: PathBuf,
}

impl TomlIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for TomlIdentityStore {
    fn load(&self) -> Result<Option<Identity>, IdentityError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no identity file, starting fresh");
                return Ok(None);
            }
            Err(e) => {
                return Err(IdentityError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        let identity = toml::from_str(&raw).map_err(|e| IdentityError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(Some(identity))
    }

    fn save(&self, identity: &Identity) -> Result<(), IdentityError> {
        let raw = toml::to_string_pretty(identity)?;
        std::fs::write(&self.path, raw).map_err(|e| IdentityError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// A scratch file path that is cleaned up on drop.
    struct ScratchFile(PathBuf);

    impl ScratchFile {
        fn new(tag: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "rechat-identity-{tag}-{}.toml",
                std::process::id()
            ));
            let _ = std::fs::remove_file(&path);
            Self(path)
        }
    }

    impl Drop for ScratchFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let scratch = ScratchFile::new("missing");
        let store = TomlIdentityStore::new(&scratch.0);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let scratch = ScratchFile::new("roundtrip");
        let store = TomlIdentityStore::new(&scratch.0);
        let identity = Identity {
            id: "alice@pc".to_string(),
            name: Some("alice".to_string()),
        };
        store.save(&identity).unwrap();
        assert_eq!(store.load().unwrap(), Some(identity));
    }

    #[test]
    fn test_identity_without_name_round_trips() {
        let scratch = ScratchFile::new("noname");
        let store = TomlIdentityStore::new(&scratch.0);
        let identity = Identity {
            id: "bob@pc".to_string(),
            name: None,
        };
        store.save(&identity).unwrap();
        assert_eq!(store.load().unwrap(), Some(identity));
    }

    #[test]
    fn test_garbage_file_is_a_parse_error() {
        let scratch = ScratchFile::new("garbage");
        std::fs::write(&scratch.0, "this is { not toml").unwrap();
        let store = TomlIdentityStore::new(&scratch.0);
        assert!(matches!(store.load(), Err(IdentityError::Parse { .. })));
    }
}
