use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::model::{Manifest, Placement, DEFAULT_MODS_DIR};
use crate::core::error::{ModsError, ModsResult};
use crate::core::scanner::ARCHIVE_EXTENSIONS;

pub const MANIFEST_FILE_NAME: &str = ".mscmods.json";
pub const DISABLED_DIR_SUFFIX: &str = "-disabled";
/// Prefix of in-flight files; anything left with it is a crash orphan.
pub const TEMP_PREFIX: &str = ".msc-tmp-";

/// On-disk layout of a server's mods:
/// - `<data_dir>/<mods_dir>/`            enabled artifacts + manifest
/// - `<data_dir>/<mods_dir>-disabled/`   disabled artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModsLayout {
    pub data_dir: PathBuf,
    pub mods_dir: PathBuf,
    pub disabled_dir: PathBuf,
}

impl ModsLayout {
    /// A `mods_dir_name` that is empty or would leave `data_dir` falls back
    /// to the default; `Manifest::validate` rejects such names on load.
    pub fn new(data_dir: &Path, mods_dir_name: &str) -> Self {
        let name = if is_plain_dir_name(mods_dir_name) {
            mods_dir_name
        } else {
            DEFAULT_MODS_DIR
        };
        Self {
            data_dir: data_dir.to_path_buf(),
            mods_dir: data_dir.join(name),
            disabled_dir: data_dir.join(format!("{name}{DISABLED_DIR_SUFFIX}")),
        }
    }

    pub fn for_manifest(data_dir: &Path, manifest: &Manifest) -> Self {
        Self::new(data_dir, &manifest.mods_dir)
    }

    /// The manifest always lives in the default mods directory, so it can be
    /// found before its own `mods_dir` field is known.
    pub fn manifest_path(data_dir: &Path) -> PathBuf {
        data_dir.join(DEFAULT_MODS_DIR).join(MANIFEST_FILE_NAME)
    }

    pub fn dir(&self, placement: Placement) -> &Path {
        match placement {
            Placement::Enabled => &self.mods_dir,
            Placement::Disabled => &self.disabled_dir,
        }
    }

    pub fn path_of(&self, filename: &str, placement: Placement) -> PathBuf {
        self.dir(placement).join(filename)
    }

    pub async fn ensure_dirs(&self) -> ModsResult<()> {
        for dir in [&self.mods_dir, &self.disabled_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ModsError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Sibling temp path for `target`, unique per call.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = format!("{TEMP_PREFIX}{}-{name}", Uuid::new_v4().simple());
    match target.parent() {
        Some(parent) => parent.join(tmp),
        None => PathBuf::from(tmp),
    }
}

pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// A single path component naming a directory under `data_dir`.
pub fn is_plain_dir_name(name: &str) -> bool {
    is_single_component(name) && name.trim() == name
}

/// Artifact names must be a plain `.jar`/`.zip` file name: one path
/// component, no reserved temp prefix.
pub fn check_artifact_name(filename: &str) -> Result<(), String> {
    if !is_single_component(filename) {
        return Err(format!("'{filename}' is not a plain file name"));
    }
    if is_temp_name(filename) {
        return Err(format!("'{filename}' uses a reserved prefix"));
    }
    let archive = Path::new(filename)
        .extension()
        .map(|ext| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| ext.to_string_lossy().eq_ignore_ascii_case(known))
        })
        .unwrap_or(false);
    if !archive {
        return Err(format!("'{filename}' is not a .jar or .zip archive"));
    }
    Ok(())
}

fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().map(|n| n == name).unwrap_or(false)
}
