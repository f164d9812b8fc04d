// SPDX-License-Identifier: MPL-2.0

//! Persistent file access tokens and the live grants derived from them.
//!
//! A token is minted once when a video is imported and persisted with its
//! entry. Every use of the file activates the token into a [`LiveGrant`],
//! which releases its activation when dropped, so activations and releases
//! always balance.

use std::{
    collections::HashMap,
    fmt, fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use deskvid_config::VideoEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::AccessError;

/// Outcome of resolving a token to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    /// The token still points at a file, but should be re-minted.
    pub stale: bool,
}

/// Platform service minting, resolving and activating access tokens.
pub trait AccessProvider: Send + Sync {
    fn create_token(&self, path: &Path) -> Result<Vec<u8>, AccessError>;

    fn resolve_token(&self, token: &[u8]) -> Result<Resolved, AccessError>;

    /// Begin access to `path`. Returns `false` if access was refused.
    fn start_access(&self, path: &Path) -> bool;

    /// End one activation of `path`. Ending an activation that never began is a no-op.
    fn stop_access(&self, path: &Path);
}

/// Where refreshed tokens are written back to.
pub trait EntryStore {
    fn entry(&self, id: Uuid) -> Option<VideoEntry>;

    fn store_token(&mut self, id: Uuid, token: Vec<u8>);
}

/// An activated access token. Dropping it releases the activation.
#[must_use]
pub struct LiveGrant {
    provider: Arc<dyn AccessProvider>,
    path: PathBuf,
}

impl LiveGrant {
    fn activate(provider: &Arc<dyn AccessProvider>, path: &Path) -> Option<Self> {
        if !provider.start_access(path) {
            return None;
        }
        trace!(path = %path.display(), "access activated");
        Some(Self {
            provider: Arc::clone(provider),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LiveGrant {
    fn drop(&mut self) {
        trace!(path = %self.path.display(), "access released");
        self.provider.stop_access(&self.path);
    }
}

impl fmt::Debug for LiveGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveGrant").field("path", &self.path).finish()
    }
}

/// Turns the token stored with a [`VideoEntry`] into a [`LiveGrant`].
///
/// This is the only component that writes token bytes back to the library.
#[derive(Clone)]
pub struct BookmarkResolver {
    provider: Arc<dyn AccessProvider>,
}

impl BookmarkResolver {
    pub fn new(provider: Arc<dyn AccessProvider>) -> Self {
        Self { provider }
    }

    /// Mint a token for a path the user just handed us.
    pub fn mint(&self, path: &Path) -> Result<Vec<u8>, AccessError> {
        let _grant = LiveGrant::activate(&self.provider, path)
            .ok_or_else(|| AccessError::AccessDenied(path.to_path_buf()))?;
        self.provider.create_token(path)
    }

    /// Resolve the entry's token into a live grant, refreshing or creating the
    /// token as needed and persisting it through `entries`.
    pub fn resolve(
        &self,
        entry: &VideoEntry,
        entries: &mut dyn EntryStore,
    ) -> Result<LiveGrant, AccessError> {
        let Some(token) = entry.bookmark_data.as_deref() else {
            return self.adopt_original(entry, entries);
        };

        let resolved = self.provider.resolve_token(token)?;
        if !resolved.stale {
            return self.activate(&resolved.path);
        }

        warn!(video = entry.name, path = %resolved.path.display(), "access token is stale");

        // Held until the refreshed token is active, then released on return.
        let candidate = LiveGrant::activate(&self.provider, &resolved.path);

        match self.provider.create_token(&resolved.path) {
            Ok(fresh) => {
                entries.store_token(entry.id, fresh.clone());
                info!(video = entry.name, "refreshed stale access token");
                match self.provider.resolve_token(&fresh) {
                    Ok(refreshed) => self.activate(&refreshed.path),
                    Err(why) => {
                        warn!(?why, "refreshed token did not resolve");
                        candidate.ok_or(why)
                    }
                }
            }
            Err(why) => {
                warn!(?why, video = entry.name, "could not refresh stale token");
                candidate.ok_or(AccessError::Stale)
            }
        }
    }

    /// Entries imported before tokens existed only carry their original path.
    fn adopt_original(
        &self,
        entry: &VideoEntry,
        entries: &mut dyn EntryStore,
    ) -> Result<LiveGrant, AccessError> {
        let original =
            LiveGrant::activate(&self.provider, &entry.url).ok_or(AccessError::NoToken)?;

        let token = self.provider.create_token(original.path()).map_err(|why| {
            warn!(?why, video = entry.name, "could not mint token from original path");
            AccessError::NoToken
        })?;

        entries.store_token(entry.id, token.clone());
        drop(original);
        debug!(video = entry.name, "minted token from original path");

        let resolved = self.provider.resolve_token(&token)?;
        self.activate(&resolved.path)
    }

    fn activate(&self, path: &Path) -> Result<LiveGrant, AccessError> {
        LiveGrant::activate(&self.provider, path)
            .ok_or_else(|| AccessError::AccessDenied(path.to_path_buf()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileToken {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

/// Tokens identifying a file by path and inode.
///
/// A token goes stale when the file at its path was replaced, or when the file
/// was renamed within its directory; in the latter case it resolves to the new
/// name. Activation checks the file can be opened and counts active grants.
#[derive(Debug, Default)]
pub struct FileAccessProvider {
    active: Mutex<HashMap<PathBuf, usize>>,
}

impl FileAccessProvider {
    /// Number of activations not yet released.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active
            .lock()
            .map(|active| active.values().sum())
            .unwrap_or(0)
    }

    fn find_renamed(token: &FileToken) -> Option<PathBuf> {
        let parent = token.path.parent()?;
        fs::read_dir(parent)
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                fs::metadata(path)
                    .map(|meta| meta.is_file() && meta.dev() == token.dev && meta.ino() == token.ino)
                    .unwrap_or(false)
            })
    }
}

impl AccessProvider for FileAccessProvider {
    fn create_token(&self, path: &Path) -> Result<Vec<u8>, AccessError> {
        let path = path
            .canonicalize()
            .map_err(|why| AccessError::ResolutionFailed(format!("{}: {why}", path.display())))?;
        let meta = fs::metadata(&path)
            .map_err(|why| AccessError::ResolutionFailed(format!("{}: {why}", path.display())))?;

        let token = FileToken {
            path,
            dev: meta.dev(),
            ino: meta.ino(),
        };
        serde_json::to_vec(&token).map_err(|why| AccessError::ResolutionFailed(why.to_string()))
    }

    fn resolve_token(&self, token: &[u8]) -> Result<Resolved, AccessError> {
        let token: FileToken = serde_json::from_slice(token)
            .map_err(|why| AccessError::ResolutionFailed(format!("malformed token: {why}")))?;

        match fs::metadata(&token.path) {
            Ok(meta) => Ok(Resolved {
                stale: meta.dev() != token.dev || meta.ino() != token.ino,
                path: token.path,
            }),
            Err(_) => Self::find_renamed(&token)
                .map(|path| Resolved { path, stale: true })
                .ok_or_else(|| {
                    AccessError::ResolutionFailed(format!(
                        "{} no longer exists",
                        token.path.display()
                    ))
                }),
        }
    }

    fn start_access(&self, path: &Path) -> bool {
        if let Err(why) = fs::File::open(path) {
            debug!(path = %path.display(), %why, "access refused");
            return false;
        }
        if let Ok(mut active) = self.active.lock() {
            *active.entry(path.to_path_buf()).or_default() += 1;
        }
        true
    }

    fn stop_access(&self, path: &Path) {
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        match active.get_mut(path) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(path);
            }
            None => trace!(path = %path.display(), "release without activation ignored"),
        }
    }
}
