// SPDX-License-Identifier: MPL-2.0-only

mod entry;
pub mod state;
mod store;

pub use entry::VideoEntry;
pub use store::{JsonStore, LibraryStore, MemoryStore, StoreError};

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::{fs, io, path::PathBuf, time::Duration};

pub const NAME: &str = "deskvid";
const CONFIG_FILE: &str = "config.ron";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration directory available")]
    NoConfigDir,
    #[error("failed to access config file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),
}

/// Order in which the auto-advance timer walks the library
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum SamplingMethod {
    // Rotate through videos in alphanumeric order of their names
    #[default]
    Alphanumeric,
    // Rotate through videos in random order
    Random,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Setters)]
#[serde(default, deny_unknown_fields)]
#[must_use]
pub struct Config {
    /// frequency at which the wallpaper advances to the next video in seconds, 0 disables it
    pub rotation_frequency: u64,
    pub sampling_method: SamplingMethod,
    /// delay before playback is rebuilt after the display layout changed
    pub restart_delay_ms: u64,
    /// how long a video may take to preroll before it is reported as unplayable
    pub load_timeout_secs: u64,
    /// width of generated thumbnails in pixels
    pub thumbnail_width: u32,
    /// re-encode imported videos to HEVC
    pub optimize_on_import: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rotation_frequency: 0,
            sampling_method: SamplingMethod::default(),
            restart_delay_ms: 500,
            load_timeout_secs: 10,
            thumbnail_width: 320,
            optimize_on_import: false,
        }
    }
}

impl Config {
    /// Location of the config file.
    ///
    /// # Errors
    ///
    /// Fails if the platform has no configuration directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(NAME).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load the config file, or the defaults if none was written yet.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents),
            Err(why) if why.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(why) => Err(why.into()),
        }
    }

    /// Parse a config from its RON representation.
    ///
    /// # Errors
    ///
    /// Fails on malformed RON or unknown fields.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(contents)?)
    }

    /// Write the config file.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or the file cannot be written.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, contents)?;
        Ok(())
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs.max(1))
    }

    #[must_use]
    pub fn rotation(&self) -> Option<Duration> {
        (self.rotation_frequency > 0).then(|| Duration::from_secs(self.rotation_frequency))
    }
}

/// Directory holding the library, its state, and optimized copies of videos.
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(NAME)
}
