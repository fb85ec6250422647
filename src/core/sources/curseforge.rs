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

pub const CURSEFORGE_API_BASE: &str = "https://api.curseforge.com/v1";
pub const MINECRAFT_GAME_ID: u32 = 432;
pub const MODS_CLASS_ID: u32 = 6;
const PAGE_SIZE: &str = "50";

const HASH_ALGO_SHA1: u8 = 1;
const HASH_ALGO_MD5: u8 = 2;

/// Loader names CurseForge mixes into a file's `gameVersions`.
const LOADER_TAGS: [&str; 6] = ["forge", "cauldron", "liteloader", "fabric", "quilt", "neoforge"];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurseForgeProject {
    pub id: u64,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeFile {
    pub id: u64,
    #[serde(default)]
    pub display_name: Option<String>,
    pub file_name: String,
    /// 1 = release, 2 = beta, 3 = alpha.
    #[serde(default)]
    pub release_type: u8,
    #[serde(default)]
    pub file_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub game_versions: Vec<String>,
    #[serde(default)]
    pub hashes: Vec<CurseForgeHash>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurseForgeHash {
    pub value: String,
    pub algo: u8,
}

impl CurseForgeFile {
    /// Loader tags and Minecraft versions, split out of `gameVersions`.
    pub fn loaders_and_versions(&self) -> (Vec<String>, Vec<String>) {
        let mut loaders = Vec::new();
        let mut versions = Vec::new();
        for tag in &self.game_versions {
            let lowered = tag.to_ascii_lowercase();
            if LOADER_TAGS.contains(&lowered.as_str()) {
                loaders.push(lowered);
            } else if tag.starts_with(|c: char| c.is_ascii_digit()) {
                versions.push(tag.clone());
            }
        }
        (loaders, versions)
    }

    fn hash(&self, algo: u8) -> Option<String> {
        self.hashes
            .iter()
            .find(|h| h.algo == algo)
            .map(|h| h.value.to_ascii_lowercase())
    }
}

pub struct CurseForgeResolver {
    fetcher: Arc<Fetcher>,
    api_key: Option<String>,
    api_base: String,
}

impl CurseForgeResolver {
    pub fn new(fetcher: Arc<Fetcher>, api_key: Option<String>) -> Self {
        Self::with_api_base(fetcher, api_key, CURSEFORGE_API_BASE)
    }

    pub fn with_api_base(
        fetcher: Arc<Fetcher>,
        api_key: Option<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_base: api_base.into(),
        }
    }

    fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ResolutionError> {
        api_url(&self.api_base, segments, query)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        api_key: &str,
        url: Url,
    ) -> Result<T, ResolutionError> {
        let headers = [("x-api-key", api_key.to_string())];
        let envelope: Envelope<T> = self
            .fetcher
            .get_json(url.as_str(), &headers)
            .await
            .map_err(map_auth)?;
        Ok(envelope.data)
    }

    async fn resolve_project(
        &self,
        api_key: &str,
        request: &SourceRequest,
    ) -> Result<CurseForgeProject, ResolutionError> {
        if let Some(project_id) = &request.project_id {
            let url = self.url(&["mods", project_id.as_str()], &[])?;
            return self.get(api_key, url).await.map_err(|e| match e {
                ResolutionError::Upstream { status: 404, .. } => {
                    ResolutionError::NotFound(format!("CurseForge project {project_id}"))
                }
                other => other,
            });
        }

        let mut query = vec![
            ("gameId", MINECRAFT_GAME_ID.to_string()),
            ("classId", MODS_CLASS_ID.to_string()),
            ("searchFilter", request.identifier.clone()),
            ("pageSize", PAGE_SIZE.to_string()),
        ];
        query.extend(filter_params(request));
        let url = self.url(&["mods", "search"], &query)?;
        let results: Vec<CurseForgeProject> = self.get(api_key, url).await?;
        pick_project(&results, &request.identifier).cloned()
    }

    /// A file pinned by numeric id, fetched directly so old files outside
    /// the first listing page still resolve.
    async fn fetch_file(
        &self,
        api_key: &str,
        project: &CurseForgeProject,
        file_id: &str,
    ) -> Result<CurseForgeFile, ResolutionError> {
        let project_id = project.id.to_string();
        let url = self.url(&["mods", project_id.as_str(), "files", file_id], &[])?;
        self.get(api_key, url).await.map_err(|e| match e {
            ResolutionError::Upstream { status: 404, .. } => ResolutionError::NotFound(format!(
                "CurseForge file '{file_id}' of project '{}'",
                project.slug
            )),
            other => other,
        })
    }

    async fn list_files(
        &self,
        api_key: &str,
        project: &CurseForgeProject,
        request: &SourceRequest,
    ) -> Result<Vec<CurseForgeFile>, ResolutionError> {
        let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
        // A pinned file name may predate the current filters.
        if request.version_id.is_none() {
            query.extend(filter_params(request));
        }
        let project_id = project.id.to_string();
        let url = self.url(&["mods", project_id.as_str(), "files"], &query)?;
        self.get(api_key, url).await
    }
}

#[async_trait]
impl SourceResolver for CurseForgeResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::Curseforge
    }

    async fn resolve(&self, request: &SourceRequest) -> Result<ResolvedMod, ResolutionError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ResolutionError::AuthRequired(
                "CurseForge API key missing. Set MSC_CURSEFORGE_API_KEY or add curseforge_api_key to .msc.json".into(),
            )
        })?;

        let project = self.resolve_project(api_key, request).await?;
        let file = match request.version_id.as_deref().filter(|v| is_file_id(v)) {
            Some(file_id) => self.fetch_file(api_key, &project, file_id).await?,
            None => {
                let files = self.list_files(api_key, &project, request).await?;
                select_file(&files, request)?.clone()
            }
        };

        info!(
            "CurseForge: {} {} -> {}",
            project.slug,
            file.display_name.as_deref().unwrap_or(&file.file_name),
            file.file_name
        );
        build_resolved(&project, &file, request)
    }
}

fn is_file_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn filter_params(request: &SourceRequest) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if !request.check_compat {
        return params;
    }
    if let Some(loader_type) = request.loader.as_deref().and_then(loader_type_id) {
        params.push(("modLoaderType", loader_type.to_string()));
    }
    if let Some(mc) = &request.mc_version {
        params.push(("gameVersion", mc.clone()));
    }
    params
}

fn map_auth(err: ResolutionError) -> ResolutionError {
    match err {
        ResolutionError::Upstream {
            status: 401 | 403,
            message,
            ..
        } => ResolutionError::AuthRequired(format!("CurseForge rejected the API key: {message}")),
        other => other,
    }
}

pub fn loader_type_id(loader: &str) -> Option<u8> {
    match loader.to_ascii_lowercase().as_str() {
        "forge" => Some(1),
        "cauldron" => Some(2),
        "liteloader" => Some(3),
        "fabric" => Some(4),
        "quilt" => Some(5),
        "neoforge" => Some(6),
        _ => None,
    }
}

/// Exact slug match wins; otherwise the search must be unambiguous.
pub fn pick_project<'a>(
    results: &'a [CurseForgeProject],
    identifier: &str,
) -> Result<&'a CurseForgeProject, ResolutionError> {
    if let Some(exact) = results
        .iter()
        .find(|p| p.slug.eq_ignore_ascii_case(identifier) || p.id.to_string() == identifier)
    {
        return Ok(exact);
    }
    match results {
        [] => Err(ResolutionError::NotFound(format!(
            "CurseForge project matching '{identifier}'"
        ))),
        [only] => Ok(only),
        many => Err(ResolutionError::AmbiguousMatch(
            many.iter().map(|p| p.slug.clone()).collect(),
        )),
    }
}

/// Pick a compatible file: by hint (id, file name or display name), else
/// release > beta > alpha, then newest.
pub fn select_file<'a>(
    files: &'a [CurseForgeFile],
    request: &SourceRequest,
) -> Result<&'a CurseForgeFile, ResolutionError> {
    if let Some(hint) = &request.version_id {
        return files
            .iter()
            .find(|f| {
                f.id.to_string() == *hint
                    || f.file_name == *hint
                    || f.display_name.as_deref() == Some(hint.as_str())
            })
            .ok_or_else(|| ResolutionError::NotFound(format!("CurseForge file '{hint}'")));
    }

    files
        .iter()
        .filter(|f| {
            if !request.check_compat {
                return true;
            }
            let (loaders, versions) = f.loaders_and_versions();
            loader_matches(&loaders, request.loader.as_deref())
                && game_version_matches(&versions, request.mc_version.as_deref())
        })
        .max_by(|a, b| compare_files(a, b))
        .ok_or_else(|| {
            if files.is_empty() && !request.check_compat {
                ResolutionError::NotFound(format!("files of CurseForge project '{}'", request.identifier))
            } else {
                ResolutionError::IncompatibleVersion {
                    loader: request.loader.clone().unwrap_or_else(|| "any".into()),
                    mc_version: request.mc_version.clone().unwrap_or_else(|| "any".into()),
                    detail: format!("'{}' publishes no matching file", request.identifier),
                }
            }
        })
}

fn compare_files(a: &CurseForgeFile, b: &CurseForgeFile) -> Ordering {
    release_rank(a.release_type)
        .cmp(&release_rank(b.release_type))
        .then_with(|| a.file_date.cmp(&b.file_date))
        .then_with(|| a.id.cmp(&b.id))
}

fn release_rank(release_type: u8) -> u8 {
    match release_type {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => 0,
    }
}

fn build_resolved(
    project: &CurseForgeProject,
    file: &CurseForgeFile,
    request: &SourceRequest,
) -> Result<ResolvedMod, ResolutionError> {
    // Authors can disable third-party distribution, which blanks the URL.
    let download_url = file.download_url.clone().filter(|u| !u.is_empty()).ok_or_else(|| {
        warn!("CurseForge file {} has no download URL", file.id);
        ResolutionError::NotFound(format!(
            "download URL for CurseForge file '{}' (distribution disabled by the author)",
            file.file_name
        ))
    })?;

    let filename = request
        .filename_override
        .clone()
        .unwrap_or_else(|| file.file_name.clone());
    let (loaders, game_versions) = file.loaders_and_versions();

    let mut resolved = ResolvedMod::new(
        filename,
        ModSource::Curseforge {
            project_id: Some(project.id.to_string()),
            version_id: Some(file.id.to_string()),
            slug: Some(project.slug.clone()),
            download_url: Some(download_url.clone()),
        },
    );
    resolved.download_url = Some(download_url);
    resolved.hashes = ModHashes {
        sha256: None,
        sha512: None,
        sha1: file.hash(HASH_ALGO_SHA1),
        md5: file.hash(HASH_ALGO_MD5),
    };
    resolved.suggested_id = Some(project.slug.clone());
    resolved.name = project.name.clone();
    resolved.version = Some(
        file.display_name
            .clone()
            .unwrap_or_else(|| file.file_name.clone()),
    );
    resolved.loaders = loaders;
    resolved.game_versions = game_versions;
    Ok(resolved)
}
