// SPDX-License-Identifier: MPL-2.0-only

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Setters)]
#[serde(default, deny_unknown_fields)]
#[must_use]
pub struct State {
    /// The video chosen as wallpaper
    #[setters(strip_option)]
    pub selected: Option<Uuid>,
    /// Whether the wallpaper should be playing
    pub playing: bool,
}

impl State {
    pub fn version() -> u64 {
        1
    }

    #[must_use]
    pub fn file_name() -> String {
        format!("state.v{}.ron", Self::version())
    }
}
