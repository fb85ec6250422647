use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::layout::{temp_path_for, ModsLayout};
use super::migrate::migrate;
use super::model::Manifest;
use crate::core::error::{ModsError, ModsResult};

/// Loads and persists the mods manifest document.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self::new(ModsLayout::manifest_path(data_dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Load, migrate and validate the manifest.
    pub async fn load(&self) -> ModsResult<Manifest> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModsError::ManifestNotFound(self.path.clone()));
            }
            Err(e) => return Err(ModsError::io(&self.path, e)),
        };

        let manifest = parse_manifest(&text).map_err(|e| match e {
            ModsError::Json(source) => ModsError::ManifestParse {
                path: self.path.clone(),
                source,
            },
            other => other,
        })?;

        debug!(
            "Loaded manifest {:?} with {} mod(s)",
            self.path,
            manifest.mods.len()
        );
        Ok(manifest)
    }

    /// Persist via temp file + rename so a crash never leaves a truncated manifest.
    pub async fn save(&self, manifest: &Manifest) -> ModsResult<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        write_atomic(&self.path, json.as_bytes()).await?;
        info!("Saved manifest {:?} ({} mod(s))", self.path, manifest.mods.len());
        Ok(())
    }
}

/// Parse manifest text: JSON syntax errors surface as `Json`, shape errors
/// as `InvalidSchema`, invariant violations as `CorruptManifest`.
pub fn parse_manifest(text: &str) -> ModsResult<Manifest> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let manifest = migrate(raw)?;
    manifest.validate()?;
    Ok(manifest)
}

pub async fn write_atomic(path: &Path, bytes: &[u8]) -> ModsResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ModsError::io(parent, e))?;
    }

    let tmp = temp_path_for(path);
    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ModsError::io(&tmp, e));
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ModsError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::model::{ModEntry, ModHashes, ModSource, CURRENT_SCHEMA_VERSION};
    use chrono::Utc;

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::new(Some("fabric".into()), Some("1.21.1".into()));
        let mut entry = ModEntry::new(
            "sodium",
            "sodium-0.6.jar",
            ModSource::Modrinth {
                project_id: Some("AANobbMI".into()),
                version_id: Some("abc".into()),
                slug: Some("sodium".into()),
                download_url: None,
            },
        );
        entry.installed_at = Some(Utc::now());
        entry.hashes = ModHashes {
            sha256: Some("00".repeat(32)),
            sha512: Some("ff".repeat(64)),
            ..ModHashes::default()
        };
        manifest.add(entry).unwrap();
        manifest
            .extra
            .insert("comment".into(), serde_json::Value::String("keep".into()));
        manifest
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::for_data_dir(dir.path());
        let manifest = sample_manifest();

        store.save(&manifest).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, manifest);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::for_data_dir(dir.path());
        store.save(&sample_manifest()).await.unwrap();
        store.save(&sample_manifest()).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![".mscmods.json".to_string()]);
    }

    #[tokio::test]
    async fn missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::for_data_dir(dir.path());
        assert!(matches!(
            store.load().await,
            Err(ModsError::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn broken_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::for_data_dir(dir.path());
        write_atomic(store.path(), b"{ not json").await.unwrap();
        assert!(matches!(
            store.load().await,
            Err(ModsError::ManifestParse { .. })
        ));
    }

    #[test]
    fn duplicate_ids_are_corrupt_not_deduplicated() {
        let text = format!(
            r#"{{"schema_version": {CURRENT_SCHEMA_VERSION}, "mods": [
                {{"id": "a", "filename": "a.jar"}},
                {{"id": "a", "filename": "a2.jar", "enabled": false}}
            ]}}"#
        );
        assert!(matches!(
            parse_manifest(&text),
            Err(ModsError::CorruptManifest(_))
        ));
    }

    #[test]
    fn wrong_shape_is_invalid_schema() {
        let text = format!(r#"{{"schema_version": {CURRENT_SCHEMA_VERSION}, "mods": [{{"id": 7}}]}}"#);
        assert!(matches!(
            parse_manifest(&text),
            Err(ModsError::InvalidSchema(_))
        ));
    }
}
