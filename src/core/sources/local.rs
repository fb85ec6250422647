use async_trait::async_trait;
use tracing::debug;

use super::registry::SourceResolver;
use super::request::{expand_home, ResolvedMod, SourceRequest};
use crate::core::error::ResolutionError;
use crate::core::manifest::{derive_mod_id, ModSource, SourceKind};

/// Copies an archive that already exists on this machine.
pub struct LocalResolver;

#[async_trait]
impl SourceResolver for LocalResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn resolve(&self, request: &SourceRequest) -> Result<ResolvedMod, ResolutionError> {
        let raw = expand_home(&request.identifier);
        let path = tokio::fs::canonicalize(&raw)
            .await
            .map_err(|_| ResolutionError::NotFound(format!("file {raw:?}")))?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ResolutionError::NotFound(format!("file {path:?}")))?;
        if !meta.is_file() {
            return Err(ResolutionError::InvalidSource(format!(
                "{path:?} is not a regular file"
            )));
        }

        let filename = match &request.filename_override {
            Some(name) => name.clone(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    ResolutionError::InvalidSource(format!("{path:?} has no file name"))
                })?,
        };
        debug!("Local source {:?} -> {}", path, filename);

        let mut resolved = ResolvedMod::new(
            filename.clone(),
            ModSource::Local {
                path: Some(path.clone()),
            },
        );
        resolved.suggested_id = Some(derive_mod_id(&filename));
        resolved.source_path = Some(path);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Lithium-0.12.jar");
        std::fs::write(&path, b"jar").unwrap();

        let request = SourceRequest::new(SourceKind::Local, path.to_string_lossy());
        let resolved = LocalResolver.resolve(&request).await.unwrap();

        assert_eq!(resolved.filename, "Lithium-0.12.jar");
        assert_eq!(resolved.suggested_id.as_deref(), Some("lithium-0-12"));
        assert!(resolved.download_url.is_none());
        assert!(resolved.source_path.is_some());
    }

    #[tokio::test]
    async fn filename_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.jar");
        std::fs::write(&path, b"jar").unwrap();

        let mut request = SourceRequest::new(SourceKind::Local, path.to_string_lossy());
        request.filename_override = Some("custom.jar".into());
        let resolved = LocalResolver.resolve(&request).await.unwrap();
        assert_eq!(resolved.filename, "custom.jar");
    }

    #[tokio::test]
    async fn missing_and_directory_sources_fail() {
        let dir = tempfile::tempdir().unwrap();

        let missing = SourceRequest::new(
            SourceKind::Local,
            dir.path().join("nope.jar").to_string_lossy(),
        );
        assert!(matches!(
            LocalResolver.resolve(&missing).await,
            Err(ResolutionError::NotFound(_))
        ));

        let directory = SourceRequest::new(SourceKind::Local, dir.path().to_string_lossy());
        assert!(matches!(
            LocalResolver.resolve(&directory).await,
            Err(ResolutionError::InvalidSource(_))
        ));
    }
}
