// ─── Reconciler ───
// Pure classification of manifest entries against scanned files.
//
// Every entry lands in exactly one of `in_sync`, `modified` or
// `manifest_only`. Every scanned file is claimed exactly once: by an entry
// at its expected location, by an entry as its misplaced file, or as
// `filesystem_only`.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::manifest::{Manifest, Placement};
use crate::core::scanner::FileRecord;

/// Classification of a single manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub id: String,
    pub filename: String,
    pub expected: Placement,
    pub expected_sha256: Option<String>,
    /// Digest of the file found for this entry, when it was hashed.
    pub actual_sha256: Option<String>,
    /// Set when the file sits in the other directory than `expected`.
    pub misplaced: Option<Placement>,
}

impl EntryStatus {
    pub fn is_misplaced(&self) -> bool {
        self.misplaced.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub in_sync: Vec<EntryStatus>,
    pub manifest_only: Vec<EntryStatus>,
    pub filesystem_only: Vec<FileRecordSummary>,
    pub modified: Vec<EntryStatus>,
}

/// Serializable view of an untracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecordSummary {
    pub filename: String,
    pub directory: Placement,
    pub size: u64,
    pub sha256: Option<String>,
}

impl From<&FileRecord> for FileRecordSummary {
    fn from(record: &FileRecord) -> Self {
        Self {
            filename: record.filename.clone(),
            directory: record.directory,
            size: record.size,
            sha256: record.sha256.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub in_sync: usize,
    pub missing: usize,
    pub misplaced: usize,
    pub modified: usize,
    pub extras: usize,
}

impl ReconciliationResult {
    pub fn misplaced(&self) -> impl Iterator<Item = &EntryStatus> {
        self.manifest_only.iter().filter(|s| s.is_misplaced())
    }

    /// Entries whose file is absent from both directories.
    pub fn missing(&self) -> impl Iterator<Item = &EntryStatus> {
        self.manifest_only.iter().filter(|s| !s.is_misplaced())
    }

    pub fn is_clean(&self) -> bool {
        self.manifest_only.is_empty() && self.filesystem_only.is_empty() && self.modified.is_empty()
    }

    pub fn summary(&self) -> Summary {
        let misplaced = self.misplaced().count();
        Summary {
            total: self.in_sync.len() + self.manifest_only.len() + self.modified.len(),
            in_sync: self.in_sync.len(),
            missing: self.manifest_only.len() - misplaced,
            misplaced,
            modified: self.modified.len(),
            extras: self.filesystem_only.len(),
        }
    }

    /// Condition of one entry, wherever it was classified.
    pub fn status_of(&self, id: &str) -> Option<(Condition, &EntryStatus)> {
        let hit = |set: &[EntryStatus]| set.iter().position(|s| s.id == id);
        if let Some(i) = hit(&self.in_sync) {
            return Some((Condition::Ok, &self.in_sync[i]));
        }
        if let Some(i) = hit(&self.modified) {
            return Some((Condition::HashMismatch, &self.modified[i]));
        }
        let status = self.manifest_only.iter().find(|s| s.id == id)?;
        if status.is_misplaced() {
            Some((Condition::Misplaced, status))
        } else {
            Some((Condition::Missing, status))
        }
    }
}

/// Per-entry condition label, as shown by `status` and `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    Ok,
    Missing,
    Misplaced,
    HashMismatch,
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Condition::Ok => "ok",
            Condition::Missing => "missing",
            Condition::Misplaced => "misplaced",
            Condition::HashMismatch => "hash-mismatch",
        };
        f.write_str(label)
    }
}

/// Classify `manifest` against `files`.
///
/// Hashes are compared only when both the manifest digest and the file
/// digest are known; a missing digest on either side counts as in sync.
pub fn reconcile(manifest: &Manifest, files: &[FileRecord]) -> ReconciliationResult {
    let index: HashMap<(Placement, &str), usize> = files
        .iter()
        .enumerate()
        .map(|(i, f)| ((f.directory, f.filename.as_str()), i))
        .collect();
    let mut claimed = vec![false; files.len()];
    let mut result = ReconciliationResult::default();

    // Pass 1: expected locations.
    let mut pending = Vec::new();
    for entry in &manifest.mods {
        let expected = entry.expected_placement();
        let mut status = EntryStatus {
            id: entry.id.clone(),
            filename: entry.filename.clone(),
            expected,
            expected_sha256: entry.hashes.sha256.clone(),
            actual_sha256: None,
            misplaced: None,
        };

        match index.get(&(expected, entry.filename.as_str())) {
            Some(&i) if !claimed[i] => {
                claimed[i] = true;
                status.actual_sha256 = files[i].sha256.clone();
                match (&status.expected_sha256, &status.actual_sha256) {
                    (Some(want), Some(got)) if !want.eq_ignore_ascii_case(got) => {
                        result.modified.push(status)
                    }
                    _ => result.in_sync.push(status),
                }
            }
            _ => pending.push(status),
        }
    }

    // Pass 2: files in the wrong directory that nobody claimed in place.
    for mut status in pending {
        let other = status.expected.other();
        if let Some(&i) = index.get(&(other, status.filename.as_str())) {
            if !claimed[i] {
                claimed[i] = true;
                status.misplaced = Some(other);
                status.actual_sha256 = files[i].sha256.clone();
            }
        }
        result.manifest_only.push(status);
    }

    result.filesystem_only = files
        .iter()
        .zip(claimed)
        .filter(|(_, taken)| !taken)
        .map(|(f, _)| FileRecordSummary::from(f))
        .collect();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::{ModEntry, ModSource};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn entry(id: &str, filename: &str, enabled: bool, sha: Option<&str>) -> ModEntry {
        let mut e = ModEntry::new(id, filename, ModSource::default());
        e.enabled = enabled;
        e.hashes.sha256 = sha.map(str::to_string);
        e
    }

    fn file(name: &str, dir: Placement, sha: Option<&str>) -> FileRecord {
        FileRecord {
            filename: name.into(),
            directory: dir,
            path: PathBuf::from(format!("/srv/{dir}/{name}")),
            size: 1,
            sha256: sha.map(str::to_string),
        }
    }

    fn manifest(entries: Vec<ModEntry>) -> Manifest {
        let mut m = Manifest::default();
        m.mods = entries;
        m
    }

    fn ids(list: &[EntryStatus]) -> Vec<&str> {
        list.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn empty_directory_reports_manifest_only() {
        let m = manifest(vec![entry("lithium", "lithium.jar", true, None)]);
        let result = reconcile(&m, &[]);

        assert_eq!(ids(&result.manifest_only), vec!["lithium"]);
        assert!(result.in_sync.is_empty());
        assert!(result.modified.is_empty());
        assert!(result.filesystem_only.is_empty());
        assert!(!result.manifest_only[0].is_misplaced());
    }

    #[test]
    fn untracked_file_is_filesystem_only() {
        let m = manifest(vec![]);
        let result = reconcile(&m, &[file("sodium.jar", Placement::Enabled, None)]);

        assert_eq!(result.filesystem_only.len(), 1);
        assert_eq!(result.filesystem_only[0].filename, "sodium.jar");
    }

    #[test]
    fn hash_mismatch_is_modified() {
        let m = manifest(vec![entry("lithium", "lithium.jar", true, Some("abc"))]);
        let result = reconcile(&m, &[file("lithium.jar", Placement::Enabled, Some("def"))]);

        assert_eq!(ids(&result.modified), vec!["lithium"]);
        assert!(result.in_sync.is_empty());
    }

    #[test]
    fn unknown_digest_counts_as_in_sync() {
        let m = manifest(vec![entry("lithium", "lithium.jar", true, Some("abc"))]);
        let result = reconcile(&m, &[file("lithium.jar", Placement::Enabled, None)]);
        assert_eq!(ids(&result.in_sync), vec!["lithium"]);
    }

    #[test]
    fn wrong_directory_is_manifest_only_and_misplaced() {
        let m = manifest(vec![entry("lithium", "lithium.jar", true, None)]);
        let result = reconcile(&m, &[file("lithium.jar", Placement::Disabled, None)]);

        assert_eq!(ids(&result.manifest_only), vec!["lithium"]);
        assert_eq!(result.manifest_only[0].misplaced, Some(Placement::Disabled));
        assert!(result.filesystem_only.is_empty());
        assert_eq!(result.summary().misplaced, 1);
        assert_eq!(result.summary().missing, 0);
    }

    #[test]
    fn file_claimed_in_place_is_not_stolen_as_misplaced() {
        let m = manifest(vec![
            entry("new", "shared.jar", true, None),
            entry("old", "shared.jar", false, None),
        ]);
        let result = reconcile(&m, &[file("shared.jar", Placement::Disabled, None)]);

        assert_eq!(ids(&result.in_sync), vec!["old"]);
        assert_eq!(ids(&result.manifest_only), vec!["new"]);
        assert!(!result.manifest_only[0].is_misplaced());
    }

    #[test]
    fn sets_are_disjoint_and_cover_everything() {
        let m = manifest(vec![
            entry("a", "a.jar", true, Some("1")),
            entry("b", "b.jar", true, Some("1")),
            entry("c", "c.jar", false, None),
            entry("d", "d.jar", true, None),
            entry("e", "e.jar", true, None),
        ]);
        let files = vec![
            file("a.jar", Placement::Enabled, Some("1")),
            file("b.jar", Placement::Enabled, Some("2")),
            file("c.jar", Placement::Enabled, None),
            file("x.jar", Placement::Enabled, None),
            file("y.jar", Placement::Disabled, None),
        ];
        let result = reconcile(&m, &files);

        let mut seen = HashSet::new();
        for s in result
            .in_sync
            .iter()
            .chain(&result.modified)
            .chain(&result.manifest_only)
        {
            assert!(seen.insert(s.id.clone()), "{} classified twice", s.id);
        }
        assert_eq!(seen.len(), m.mods.len());

        let claimed_files = result.in_sync.len()
            + result.modified.len()
            + result.misplaced().count()
            + result.filesystem_only.len();
        assert_eq!(claimed_files, files.len());

        assert_eq!(ids(&result.in_sync), vec!["a"]);
        assert_eq!(ids(&result.modified), vec!["b"]);
        assert_eq!(ids(&result.manifest_only), vec!["c", "d", "e"]);
        assert!(!result.is_clean());
    }
}
