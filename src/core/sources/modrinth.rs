use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use tracing::{info, warn};

use super::api_url;
use super::compat::{game_version_matches, loader_matches};
use super::registry::SourceResolver;
use super::request::{ResolvedMod, SourceRequest};
use crate::core::downloader::Fetcher;
use crate::core::error::ResolutionError;
use crate::core::manifest::{ModHashes, ModSource, SourceKind};

pub const MODRINTH_API_BASE: &str = "https://api.modrinth.com/v2";

#[derive(Debug, Clone, Deserialize)]
pub struct ModrinthProject {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModrinthVersion {
    pub id: String,
    pub project_id: String,
    pub version_number: String,
    #[serde(default)]
    pub version_type: Option<String>,
    #[serde(default)]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub loaders: Vec<String>,
    #[serde(default)]
    pub game_versions: Vec<String>,
    #[serde(default)]
    pub files: Vec<ModrinthFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModrinthFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub hashes: ModrinthHashes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModrinthHashes {
    pub sha512: Option<String>,
    pub sha1: Option<String>,
}

pub struct ModrinthResolver {
    fetcher: Arc<Fetcher>,
    api_base: String,
}

impl ModrinthResolver {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self::with_api_base(fetcher, MODRINTH_API_BASE)
    }

    pub fn with_api_base(fetcher: Arc<Fetcher>, api_base: impl Into<String>) -> Self {
        Self {
            fetcher,
            api_base: api_base.into(),
        }
    }

    fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ResolutionError> {
        api_url(&self.api_base, segments, query)
    }

    async fn fetch_project(&self, identifier: &str) -> Result<ModrinthProject, ResolutionError> {
        let url = self.url(&["project", identifier], &[])?;
        self.fetcher
            .get_json(url.as_str(), &[])
            .await
            .map_err(|e| not_found_on_404(e, format!("Modrinth project '{identifier}'")))
    }

    /// An explicitly pinned version, if it exists and belongs to `project`.
    async fn fetch_pinned(
        &self,
        project: &ModrinthProject,
        version_id: &str,
    ) -> Result<Option<ModrinthVersion>, ResolutionError> {
        let url = self.url(&["version", version_id], &[])?;
        match self.fetcher.get_json::<ModrinthVersion>(url.as_str(), &[]).await {
            Ok(version) if version.project_id == project.id => Ok(Some(version)),
            Ok(version) => {
                warn!(
                    "Version {} belongs to project {}, not {}",
                    version.id, version.project_id, project.id
                );
                Ok(None)
            }
            Err(ResolutionError::Upstream { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_versions(
        &self,
        project: &ModrinthProject,
        request: &SourceRequest,
    ) -> Result<Vec<ModrinthVersion>, ResolutionError> {
        let mut query = Vec::new();
        if request.check_compat {
            if let Some(loader) = &request.loader {
                query.push(("loaders", json_array(loader)));
            }
            if let Some(mc) = &request.mc_version {
                query.push(("game_versions", json_array(mc)));
            }
        }
        let url = self.url(&["project", project.id.as_str(), "version"], &query)?;
        self.fetcher.get_json(url.as_str(), &[]).await
    }
}

#[async_trait]
impl SourceResolver for ModrinthResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::Modrinth
    }

    async fn resolve(&self, request: &SourceRequest) -> Result<ResolvedMod, ResolutionError> {
        let identifier = request
            .project_id
            .as_deref()
            .unwrap_or(&request.identifier);
        let project = self.fetch_project(identifier).await?;

        let pinned = match &request.version_id {
            Some(version_id) => self.fetch_pinned(&project, version_id).await?,
            None => None,
        };
        let version = match pinned {
            Some(version) => version,
            None => {
                let versions = self.list_versions(&project, request).await?;
                select_version(&versions, request)?.clone()
            }
        };
        let file = select_file(&version)?;

        info!(
            "Modrinth: {} {} -> {}",
            project.slug, version.version_number, file.filename
        );
        Ok(build_resolved(&project, &version, file, request))
    }
}

fn build_resolved(
    project: &ModrinthProject,
    version: &ModrinthVersion,
    file: &ModrinthFile,
    request: &SourceRequest,
) -> ResolvedMod {
    let filename = request
        .filename_override
        .clone()
        .unwrap_or_else(|| file.filename.clone());
    let mut resolved = ResolvedMod::new(
        filename,
        ModSource::Modrinth {
            project_id: Some(project.id.clone()),
            version_id: Some(version.id.clone()),
            slug: Some(project.slug.clone()),
            download_url: Some(file.url.clone()),
        },
    );
    resolved.download_url = Some(file.url.clone());
    resolved.hashes = ModHashes {
        sha256: None,
        sha512: file.hashes.sha512.clone(),
        sha1: file.hashes.sha1.clone(),
        md5: None,
    };
    resolved.suggested_id = Some(project.slug.clone());
    resolved.name = project.title.clone();
    resolved.version = Some(version.version_number.clone());
    resolved.loaders = version.loaders.clone();
    resolved.game_versions = version.game_versions.clone();
    resolved
}

/// Pick the newest compatible version.
///
/// A version hint matches a version id or version number exactly. Otherwise
/// candidates rank release > beta > alpha, then by publish date, then by
/// semantic version.
pub fn select_version<'a>(
    versions: &'a [ModrinthVersion],
    request: &SourceRequest,
) -> Result<&'a ModrinthVersion, ResolutionError> {
    let compatible: Vec<&ModrinthVersion> = versions
        .iter()
        .filter(|v| {
            !request.check_compat
                || (loader_matches(&v.loaders, request.loader.as_deref())
                    && game_version_matches(&v.game_versions, request.mc_version.as_deref()))
        })
        .collect();

    if let Some(hint) = &request.version_id {
        return compatible
            .iter()
            .find(|v| &v.id == hint || &v.version_number == hint)
            .copied()
            .ok_or_else(|| {
                ResolutionError::NotFound(format!(
                    "Modrinth version '{hint}' of '{}'",
                    request.identifier
                ))
            });
    }

    compatible
        .into_iter()
        .max_by(|a, b| compare_versions(a, b))
        .ok_or_else(|| {
            if versions.is_empty() && !request.check_compat {
                ResolutionError::NotFound(format!("versions of Modrinth project '{}'", request.identifier))
            } else {
                ResolutionError::IncompatibleVersion {
                    loader: request.loader.clone().unwrap_or_else(|| "any".into()),
                    mc_version: request.mc_version.clone().unwrap_or_else(|| "any".into()),
                    detail: format!("'{}' publishes no matching build", request.identifier),
                }
            }
        })
}

fn compare_versions(a: &ModrinthVersion, b: &ModrinthVersion) -> Ordering {
    channel_rank(a.version_type.as_deref())
        .cmp(&channel_rank(b.version_type.as_deref()))
        .then_with(|| a.date_published.cmp(&b.date_published))
        .then_with(|| parse_semver(&a.version_number).cmp(&parse_semver(&b.version_number)))
}

fn channel_rank(version_type: Option<&str>) -> u8 {
    match version_type {
        Some("release") => 3,
        Some("beta") => 2,
        Some("alpha") => 1,
        _ => 0,
    }
}

/// Lenient semver parse: `v1.2.3+mc1.21` and `mc1.21.1-0.6.0` style
/// numbers fall back to their first dotted numeric run.
pub(crate) fn parse_semver(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if let Ok(version) = semver::Version::parse(trimmed) {
        return Some(version);
    }
    let start = trimmed.find(|c: char| c.is_ascii_digit())?;
    let run: String = trimmed[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = run.split('.').filter(|p| !p.is_empty()).map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(Result::ok).unwrap_or(0);
    let patch = parts.next().and_then(Result::ok).unwrap_or(0);
    Some(semver::Version::new(major, minor, patch))
}

/// The primary file, else the first listed.
pub fn select_file(version: &ModrinthVersion) -> Result<&ModrinthFile, ResolutionError> {
    version
        .files
        .iter()
        .find(|f| f.primary)
        .or_else(|| version.files.first())
        .ok_or_else(|| {
            ResolutionError::NotFound(format!(
                "downloadable files in Modrinth version '{}'",
                version.id
            ))
        })
}

fn json_array(value: &str) -> String {
    serde_json::json!([value]).to_string()
}

fn not_found_on_404(err: ResolutionError, what: String) -> ResolutionError {
    match err {
        ResolutionError::Upstream { status: 404, .. } => ResolutionError::NotFound(what),
        other => other,
    }
}
