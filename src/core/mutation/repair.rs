use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::manifest::{derive_mod_id, Manifest, Placement};
use crate::core::reconcile::reconcile;
use crate::core::scanner::FileRecord;

/// One step of a repair. Planned in full before anything is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    /// Track an untracked archive as a `local` entry.
    AdoptExtra {
        id: String,
        filename: String,
        directory: Placement,
        sha256: String,
    },
    /// Forget an entry whose file is in neither directory.
    DropMissing { id: String, filename: String },
    MoveMisplaced {
        id: String,
        filename: String,
        from: Placement,
        to: Placement,
    },
    /// Record the digest of the file that is actually on disk.
    RefreshHash {
        id: String,
        old: Option<String>,
        sha256: String,
    },
    RemoveOrphanTemp { path: PathBuf },
}

impl RepairAction {
    pub fn touches_files(&self) -> bool {
        matches!(
            self,
            RepairAction::MoveMisplaced { .. } | RepairAction::RemoveOrphanTemp { .. }
        )
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairAction::AdoptExtra {
                id,
                filename,
                directory,
                ..
            } => write!(f, "adopt {directory}/{filename} as '{id}'"),
            RepairAction::DropMissing { id, filename } => {
                write!(f, "drop '{id}' ({filename} not found)")
            }
            RepairAction::MoveMisplaced {
                id,
                filename,
                from,
                to,
            } => write!(f, "move {filename} of '{id}' from {from}/ to {to}/"),
            RepairAction::RefreshHash { id, old, sha256 } => match old {
                Some(old) => write!(f, "update hash of '{id}' {} -> {}", short(old), short(sha256)),
                None => write!(f, "record hash of '{id}' {}", short(sha256)),
            },
            RepairAction::RemoveOrphanTemp { path } => {
                write!(f, "delete leftover temp file {}", path.display())
            }
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// A placement fix that would clobber another file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairConflict {
    pub id: String,
    pub filename: String,
    pub reason: String,
}

impl fmt::Display for RepairConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({}): {}", self.id, self.filename, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairPlan {
    pub actions: Vec<RepairAction>,
    pub conflicts: Vec<RepairConflict>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.conflicts.is_empty()
    }

    pub fn touches_files(&self) -> bool {
        self.actions.iter().any(RepairAction::touches_files)
    }
}

/// Compute the repair plan.
///
/// `files` must already carry SHA-256 digests; entries are ordered as in the
/// manifest and extras as scanned, so the same inputs give the same plan.
pub fn plan_repair(manifest: &Manifest, files: &[FileRecord], orphans: &[PathBuf]) -> RepairPlan {
    let result = reconcile(manifest, files);
    let mut plan = RepairPlan::default();

    // Stale or absent digests on files that are where they belong.
    for status in result.in_sync.iter().chain(&result.modified) {
        if let Some(actual) = &status.actual_sha256 {
            let stale = match &status.expected_sha256 {
                Some(expected) => !expected.eq_ignore_ascii_case(actual),
                None => true,
            };
            if stale {
                plan.actions.push(RepairAction::RefreshHash {
                    id: status.id.clone(),
                    old: status.expected_sha256.clone(),
                    sha256: actual.clone(),
                });
            }
        }
    }

    for status in &result.manifest_only {
        let Some(from) = status.misplaced else {
            plan.actions.push(RepairAction::DropMissing {
                id: status.id.clone(),
                filename: status.filename.clone(),
            });
            continue;
        };

        let to = status.expected;
        let occupied = files
            .iter()
            .any(|f| f.directory == to && f.filename == status.filename);
        if occupied {
            plan.conflicts.push(RepairConflict {
                id: status.id.clone(),
                filename: status.filename.clone(),
                reason: format!("{to}/{} already belongs to another entry", status.filename),
            });
            continue;
        }

        plan.actions.push(RepairAction::MoveMisplaced {
            id: status.id.clone(),
            filename: status.filename.clone(),
            from,
            to,
        });
        if let Some(actual) = &status.actual_sha256 {
            if status
                .expected_sha256
                .as_deref()
                .map_or(true, |e| !e.eq_ignore_ascii_case(actual))
            {
                plan.actions.push(RepairAction::RefreshHash {
                    id: status.id.clone(),
                    old: status.expected_sha256.clone(),
                    sha256: actual.clone(),
                });
            }
        }
    }

    let mut taken: HashSet<String> = manifest.mods.iter().map(|m| m.id.clone()).collect();
    for extra in &result.filesystem_only {
        let Some(sha256) = extra.sha256.clone() else {
            continue;
        };
        let id = unique_id(&derive_mod_id(&extra.filename), &taken);
        taken.insert(id.clone());
        plan.actions.push(RepairAction::AdoptExtra {
            id,
            filename: extra.filename.clone(),
            directory: extra.directory,
            sha256,
        });
    }

    for path in orphans {
        plan.actions.push(RepairAction::RemoveOrphanTemp { path: path.clone() });
    }

    plan
}

/// `base`, or `base-2`, `base-3`... whichever is free.
pub fn unique_id(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::{ModEntry, ModSource};

    fn record(name: &str, dir: Placement, sha: &str) -> FileRecord {
        FileRecord {
            filename: name.into(),
            directory: dir,
            path: PathBuf::from(format!("/srv/{dir}/{name}")),
            size: 1,
            sha256: Some(sha.into()),
        }
    }

    fn entry(id: &str, file: &str, enabled: bool, sha: Option<&str>) -> ModEntry {
        let mut e = ModEntry::new(id, file, ModSource::default());
        e.enabled = enabled;
        e.hashes.sha256 = sha.map(str::to_string);
        e
    }

    #[test]
    fn plan_covers_every_condition() {
        let mut manifest = Manifest::default();
        manifest.mods = vec![
            entry("ok", "ok.jar", true, Some("aa")),
            entry("stale", "stale.jar", true, Some("old")),
            entry("gone", "gone.jar", true, None),
            entry("moved", "moved.jar", false, Some("mm")),
        ];
        let files = vec![
            record("ok.jar", Placement::Enabled, "aa"),
            record("stale.jar", Placement::Enabled, "new"),
            record("moved.jar", Placement::Enabled, "mm"),
            record("extra.jar", Placement::Enabled, "ee"),
        ];
        let orphans = vec![PathBuf::from("/srv/mods/.msc-tmp-x-a.jar")];

        let plan = plan_repair(&manifest, &files, &orphans);

        assert!(plan.conflicts.is_empty());
        assert_eq!(
            plan.actions,
            vec![
                RepairAction::RefreshHash {
                    id: "stale".into(),
                    old: Some("old".into()),
                    sha256: "new".into()
                },
                RepairAction::DropMissing {
                    id: "gone".into(),
                    filename: "gone.jar".into()
                },
                RepairAction::MoveMisplaced {
                    id: "moved".into(),
                    filename: "moved.jar".into(),
                    from: Placement::Enabled,
                    to: Placement::Disabled
                },
                RepairAction::AdoptExtra {
                    id: "extra".into(),
                    filename: "extra.jar".into(),
                    directory: Placement::Enabled,
                    sha256: "ee".into()
                },
                RepairAction::RemoveOrphanTemp {
                    path: orphans[0].clone()
                },
            ]
        );
        assert!(plan.touches_files());
    }

    #[test]
    fn clean_state_gives_empty_plan() {
        let mut manifest = Manifest::default();
        manifest.mods = vec![entry("ok", "ok.jar", true, Some("aa"))];
        let files = vec![record("ok.jar", Placement::Enabled, "aa")];
        assert!(plan_repair(&manifest, &files, &[]).is_empty());
    }

    #[test]
    fn move_onto_claimed_file_is_a_conflict() {
        let mut manifest = Manifest::default();
        manifest.mods = vec![
            entry("a", "z.jar", false, Some("z1")),
            entry("b", "z.jar", false, Some("z2")),
        ];
        let files = vec![
            record("z.jar", Placement::Enabled, "z2"),
            record("z.jar", Placement::Disabled, "z1"),
        ];

        let plan = plan_repair(&manifest, &files, &[]);

        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].id, "b");
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn adopted_ids_avoid_collisions() {
        let taken: HashSet<String> = ["sodium".to_string(), "sodium-2".to_string()].into();
        assert_eq!(unique_id("sodium", &taken), "sodium-3");
        assert_eq!(unique_id("lithium", &taken), "lithium");
    }
}
