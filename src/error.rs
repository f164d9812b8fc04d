// SPDX-License-Identifier: MPL-2.0

//! Error taxonomy shared by the playback core.

use std::path::PathBuf;

use deskvid_config::StoreError;
use uuid::Uuid;

use crate::event::SurfaceId;

/// Failure to turn a persisted access token into a live path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("no access token stored for this video")]
    NoToken,
    #[error("access token is stale and could not be refreshed")]
    Stale,
    #[error("access token could not be resolved: {0}")]
    ResolutionFailed(String),
    #[error("access to {} was denied", .0.display())]
    AccessDenied(PathBuf),
}

/// Failure to load or decode a video. Terminal for one surface only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("video file is missing: {}", .0.display())]
    Missing(PathBuf),
    #[error("video is not playable")]
    NotPlayable,
    #[error("video has no playable video track")]
    NoVideoTrack,
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("video playback is unavailable: {0}")]
    Unsupported(String),
}

/// Filesystem failure while replacing a video with its optimized copy.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("file is missing: {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("transcoding failed: {0}")]
    Transcode(String),
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// An operation reached a resource that is already closing.
///
/// Never shown to the user; callers log it at trace level and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("surface {0} is closed")]
    Closed(SurfaceId),
    #[error("event for epoch {event} reached surface {surface} at epoch {current}")]
    StaleEpoch {
        surface: SurfaceId,
        event: u64,
        current: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("display {0} is not connected")]
    UnknownDisplay(u32),
    #[error("failed to create desktop window: {0}")]
    Create(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("no displays are connected")]
    NoDisplays,
    #[error("no desktop window could be created")]
    NoWindows,
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("no video with id {0}")]
    UnknownEntry(Uuid),
    #[error("no video matches `{0}`")]
    NotFound(String),
    #[error("`{0}` matches more than one video")]
    Ambiguous(String),
    #[error("video names cannot be empty")]
    EmptyName,
    #[error("no video selected")]
    NoSelection,
    #[error("no videos found to import")]
    NothingImported,
    #[error("video {0} is already being optimized")]
    OptimizeInProgress(Uuid),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
