use std::fmt;

use tracing::warn;

use crate::core::error::{ModsError, ModsResult};

/// Mutations the guard knows how to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Install,
    Remove { with_file: bool },
    Toggle { move_file: bool },
    MetadataEdit,
    Purge { with_files: bool },
    Sync,
    RepairApply { with_files: bool },
}

impl OperationKind {
    /// Whether this operation creates, moves or deletes mod artifacts.
    pub fn touches_files(self) -> bool {
        match self {
            OperationKind::Install | OperationKind::Sync => true,
            OperationKind::Remove { with_file } => with_file,
            OperationKind::Toggle { move_file } => move_file,
            OperationKind::Purge { with_files } | OperationKind::RepairApply { with_files } => {
                with_files
            }
            OperationKind::MetadataEdit => false,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::Install => "add mods",
            OperationKind::Remove { .. } => "remove mods",
            OperationKind::Toggle { .. } => "move mod files",
            OperationKind::MetadataEdit => "edit mod metadata",
            OperationKind::Purge { .. } => "purge mods",
            OperationKind::Sync => "sync mods",
            OperationKind::RepairApply { .. } => "apply repairs",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    /// Allowed only because of `--force`; the caller has already been warned.
    Forced,
}

/// Gate a mutation on the server's running state.
pub fn check_allowed(op: OperationKind, server_running: bool, force: bool) -> ModsResult<GuardDecision> {
    if !op.touches_files() || !server_running {
        return Ok(GuardDecision::Allowed);
    }
    if force {
        warn!(
            "!!! The server is running; proceeding to {} because --force was given. \
             Restart the server afterwards to pick up the change.",
            op
        );
        return Ok(GuardDecision::Forced);
    }
    Err(ModsError::ServerRunning {
        operation: op.to_string(),
    })
}
