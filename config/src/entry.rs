// SPDX-License-Identifier: MPL-2.0-only

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A video imported into the library.
///
/// Field names are part of the persisted format and must stay stable.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Setters)]
#[must_use]
pub struct VideoEntry {
    #[setters(skip)]
    pub id: Uuid,
    /// Path the video was imported from. After a restart this may no longer
    /// be accessible; the access token is authoritative for I/O.
    pub url: PathBuf,
    pub name: String,
    #[serde(rename = "isActive", default)]
    pub is_active: bool,
    #[serde(
        rename = "thumbnailData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[setters(strip_option)]
    pub thumbnail_data: Option<Vec<u8>>,
    #[serde(
        rename = "bookmarkData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[setters(strip_option)]
    pub bookmark_data: Option<Vec<u8>>,
}

impl VideoEntry {
    /// Create an entry for a freshly imported file, named after its file stem.
    pub fn new(url: PathBuf) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: display_name(&url),
            url,
            is_active: false,
            thumbnail_data: None,
            bookmark_data: None,
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
