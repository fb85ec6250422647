use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::compat::ensure_compatible;
use super::request::{ResolvedMod, SourceRequest};
use super::{
    curseforge::CurseForgeResolver, local::LocalResolver, modrinth::ModrinthResolver,
    url::UrlResolver,
};
use crate::core::downloader::Fetcher;
use crate::core::error::{ModsError, ModsResult, ResolutionError};
use crate::core::manifest::layout::check_artifact_name;
use crate::core::manifest::{Manifest, SourceKind};
use crate::core::state::Defaults;

/// Turns a source descriptor into a concrete artifact plus metadata.
///
/// Implementations hold no mutable state besides the shared rate limiter,
/// so one instance may serve concurrent requests.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn resolve(&self, request: &SourceRequest) -> Result<ResolvedMod, ResolutionError>;
}

/// Resolvers keyed by source-type tag.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    resolvers: BTreeMap<SourceKind, Arc<dyn SourceResolver>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in resolvers sharing one fetcher.
    pub fn with_builtin(fetcher: Arc<Fetcher>, curseforge_api_key: Option<String>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalResolver));
        registry.register(Arc::new(UrlResolver));
        registry.register(Arc::new(ModrinthResolver::new(fetcher.clone())));
        registry.register(Arc::new(CurseForgeResolver::new(fetcher, curseforge_api_key)));
        registry
    }

    /// Add or replace the resolver for its kind.
    pub fn register(&mut self, resolver: Arc<dyn SourceResolver>) {
        self.resolvers.insert(resolver.kind(), resolver);
    }

    pub fn get(&self, kind: SourceKind) -> Result<&Arc<dyn SourceResolver>, ResolutionError> {
        self.resolvers
            .get(&kind)
            .ok_or_else(|| ResolutionError::UnsupportedSource(kind.to_string()))
    }

    /// Fill a blank loader / Minecraft version from the manifest, then from
    /// server settings, and record settings-derived values on the manifest.
    pub fn apply_defaults(request: &mut SourceRequest, manifest: &mut Manifest, defaults: &Defaults) {
        if manifest.loader.is_none() {
            if let Some(loader) = &defaults.loader {
                info!("Recording loader '{}' on the manifest", loader);
                manifest.loader = Some(loader.clone());
            }
        }
        if manifest.minecraft_version.is_none() {
            if let Some(version) = &defaults.minecraft_version {
                info!("Recording Minecraft version '{}' on the manifest", version);
                manifest.minecraft_version = Some(version.clone());
            }
        }

        if is_blank(&request.loader) {
            request.loader = manifest.loader.clone();
        }
        if is_blank(&request.mc_version) {
            request.mc_version = manifest.minecraft_version.clone();
        }
    }

    /// Dispatch to the resolver for `request.kind` and enforce version safety.
    pub async fn resolve(&self, request: &SourceRequest) -> ModsResult<ResolvedMod> {
        let target = request.identifier.clone();
        let wrap = |e| ModsError::resolution(target.clone(), e);

        let resolver = self.get(request.kind).map_err(wrap)?;
        debug!(
            "Resolving {} source '{}' (loader={:?}, mc={:?})",
            request.kind, request.identifier, request.loader, request.mc_version
        );

        let resolved = resolver.resolve(request).await.map_err(wrap)?;
        ensure_compatible(request, &resolved).map_err(wrap)?;
        validate_filename(&resolved.filename).map_err(wrap)?;
        Ok(resolved)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// Artifact names must be plain archive filenames.
pub fn validate_filename(filename: &str) -> Result<(), ResolutionError> {
    check_artifact_name(filename).map_err(ResolutionError::InvalidSource)
}
