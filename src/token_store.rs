//! Token storage: trait plus in-memory and file-backed implementations

use crate::error::{ClientError, Result};
use papaya::HashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Durable holder for the session's access and refresh tokens
///
/// Reads and `clear_tokens` must be safe to call when the underlying medium is
/// unavailable: failures degrade to "no token" rather than erroring.
/// `set_tokens` surfaces failure so a failed persist is never mistaken for
/// success.
pub trait TokenStore: Send + Sync + 'static {
    /// Get the stored access token
    fn access_token(&self) -> Option<String>;

    /// Get the stored refresh token
    fn refresh_token(&self) -> Option<String>;

    /// Overwrite both tokens
    fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()>;

    /// Remove both tokens
    fn clear_tokens(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TokenSlot {
    Access,
    Refresh,
}

/// Thread-safe in-memory token store using Papaya HashMap
///
/// Cloning the store clones a handle to the same underlying slots.
#[derive(Clone)]
pub struct MemoryTokenStore {
    slots: Arc<HashMap<TokenSlot, String>>,
}

impl MemoryTokenStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            slots: Arc::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl MemoryTokenStore {
    /// Seed only the access slot, simulating a half-persisted session
    pub(crate) fn set_access_only(&self, access_token: &str) {
        self.slots
            .pin()
            .insert(TokenSlot::Access, access_token.to_string());
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.slots.pin().get(&TokenSlot::Access).cloned()
    }

    fn refresh_token(&self) -> Option<String> {
        self.slots.pin().get(&TokenSlot::Refresh).cloned()
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        let slots = self.slots.pin();
        slots.insert(TokenSlot::Access, access_token.to_string());
        slots.insert(TokenSlot::Refresh, refresh_token.to_string());
        Ok(())
    }

    fn clear_tokens(&self) {
        self.slots.pin().clear();
    }
}

/// On-disk token file contents
#[derive(Debug, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: String,
}

/// File-backed token store
///
/// Persists tokens as JSON with restricted permissions (0600) on Unix.
/// A missing, unreadable, or corrupt file reads as "no tokens".
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn load(&self) -> Option<StoredTokens> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(tokens) => Some(tokens),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Token file is corrupt; treating as empty");
                None
            }
        }
    }

    fn save(&self, tokens: &StoredTokens) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let contents = serde_json::to_string_pretty(tokens)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .map_err(|e| ClientError::Storage(format!("open {}: {e}", self.path.display())))?;
            file.write_all(contents.as_bytes())
                .map_err(|e| ClientError::Storage(format!("write {}: {e}", self.path.display())))?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&self.path, contents)
                .map_err(|e| ClientError::Storage(format!("write {}: {e}", self.path.display())))?;
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.load().map(|t| t.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.load().map(|t| t.refresh_token)
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.save(&StoredTokens {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        })
    }

    fn clear_tokens(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "Failed to remove token file");
            }
        }
    }
}
