//! File-backed fallback token storage
//!
//! Used when no OS credential vault is available. Tokens live in a JSON
//! object keyed by the same literal names the secure store uses. All writes
//! go through an atomic temp-file + rename and a tokio Mutex serializes
//! concurrent writers. The file is created 0600 on unix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BoxFuture, StoreKind, TokenStore, token_entries, token_set_from};
use crate::error::{Error, Result};
use crate::token::TokenSet;

/// Less-secure persistent store: a JSON file readable only by the owner.
pub struct FallbackTokenStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FallbackTokenStore {
    /// Open the store at `path`, reading existing entries.
    ///
    /// A missing file is a cold start with no tokens; it is created as `{}`
    /// so later loads skip this path.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading token file: {e}")))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing token file: {e}")))?;
            info!(path = %path.display(), entries = entries.len(), "opened fallback token store");
            entries
        } else {
            info!(path = %path.display(), "token file not found, starting empty");
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| Error::Storage(format!("creating token directory: {e}")))?;
            }
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FallbackTokenStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Fallback
    }

    fn save<'a>(&'a self, tokens: &'a TokenSet) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            for (key, value) in token_entries(tokens) {
                match value {
                    Some(value) => {
                        next.insert(key.to_string(), value);
                    }
                    None => {
                        next.remove(key);
                    }
                }
            }
            // Memory follows the file only once the write lands
            write_atomic(&self.path, &next).await?;
            *state = next;
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, Result<Option<TokenSet>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(token_set_from(|key| state.get(key).cloned()))
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.is_empty() {
                return Ok(());
            }
            write_atomic(&self.path, &HashMap::new()).await?;
            state.clear();
            debug!("cleared fallback token store");
            Ok(())
        })
    }
}

/// Write entries to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target, so a crash mid-write never leaves a truncated token file.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("token path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted tokens");
    Ok(())
}
