use std::path::{Path, PathBuf};

use tracing::debug;

use super::hash::sha256_file;
use crate::core::error::{ModsError, ModsResult};
use crate::core::manifest::layout::is_temp_name;
use crate::core::manifest::Placement;

/// Recognised artifact extensions, matched case-insensitively.
pub const ARCHIVE_EXTENSIONS: [&str; 2] = ["jar", "zip"];

/// A scanned artifact. `sha256` is filled lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: String,
    pub directory: Placement,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: Option<String>,
}

impl FileRecord {
    pub async fn ensure_sha256(&mut self) -> ModsResult<&str> {
        if self.sha256.is_none() {
            self.sha256 = Some(sha256_file(&self.path).await?);
        }
        Ok(self.sha256.as_deref().unwrap_or_default())
    }
}

/// Scan both directories. Enabled files come first, each group sorted by name.
/// Missing directories yield no records.
pub async fn scan(mods_dir: &Path, disabled_dir: &Path) -> ModsResult<Vec<FileRecord>> {
    let mut records = scan_dir(mods_dir, Placement::Enabled).await?;
    records.extend(scan_dir(disabled_dir, Placement::Disabled).await?);
    Ok(records)
}

/// Hash every record accepted by `filter` that has no digest yet.
pub async fn hash_records(
    records: &mut [FileRecord],
    filter: impl Fn(&FileRecord) -> bool,
) -> ModsResult<()> {
    for record in records.iter_mut() {
        if filter(record) {
            record.ensure_sha256().await?;
        }
    }
    Ok(())
}

/// Leftover temp files from interrupted operations.
pub async fn scan_orphans(dirs: &[&Path]) -> ModsResult<Vec<PathBuf>> {
    let mut orphans = Vec::new();
    for dir in dirs {
        for (name, path, file_type) in list_dir(dir).await? {
            if file_type.is_file() && is_temp_name(&name) {
                orphans.push(path);
            }
        }
    }
    orphans.sort();
    Ok(orphans)
}

async fn scan_dir(dir: &Path, placement: Placement) -> ModsResult<Vec<FileRecord>> {
    let mut records = Vec::new();

    for (name, path, file_type) in list_dir(dir).await? {
        // file_type() does not follow links: symlinked dirs and files are skipped.
        if !file_type.is_file() {
            if file_type.is_symlink() {
                debug!("Skipping symlink {:?}", path);
            }
            continue;
        }
        if is_temp_name(&name) || !has_archive_extension(&name) {
            continue;
        }

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ModsError::io(&path, e))?;
        records.push(FileRecord {
            filename: name,
            directory: placement,
            path,
            size: metadata.len(),
            sha256: None,
        });
    }

    records.sort_by(|a, b| a.filename.cmp(&b.filename));
    debug!("Scanned {:?}: {} artifact(s)", dir, records.len());
    Ok(records)
}

async fn list_dir(dir: &Path) -> ModsResult<Vec<(String, PathBuf, std::fs::FileType)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ModsError::io(dir, e)),
    };

    let mut out = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ModsError::io(dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| ModsError::io(entry.path(), e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        out.push((name, entry.path(), file_type));
    }
    Ok(out)
}

fn has_archive_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
