use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::core::manifest::ModEntry;

/// Lifecycle of one mod entry.
///
/// `absent -> staged -> installed <-> disabled -> removed`. `Staged` exists
/// only between a successful download or copy and the rename into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModState {
    Absent,
    Staged,
    Installed,
    Disabled,
    Removed,
}

impl ModState {
    /// Resting state of a manifest entry.
    pub fn of(entry: &ModEntry) -> Self {
        if entry.enabled {
            ModState::Installed
        } else {
            ModState::Disabled
        }
    }

    pub fn can_become(self, next: ModState) -> bool {
        use ModState::*;
        matches!(
            (self, next),
            (Absent, Staged)
                | (Staged, Installed)
                | (Staged, Disabled)
                | (Staged, Absent)
                | (Installed, Disabled)
                | (Disabled, Installed)
                | (Installed, Removed)
                | (Disabled, Removed)
        )
    }
}

impl fmt::Display for ModState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModState::Absent => "absent",
            ModState::Staged => "staged",
            ModState::Installed => "installed",
            ModState::Disabled => "disabled",
            ModState::Removed => "removed",
        };
        f.write_str(label)
    }
}

pub(crate) fn transition(id: &str, from: ModState, to: ModState) {
    debug_assert!(from.can_become(to), "{from} -> {to}");
    debug!("{}: {} -> {}", id, from, to);
}
