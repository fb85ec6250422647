use std::path::{Path, PathBuf};

use crate::core::error::ResolutionError;
use crate::core::manifest::{ModHashes, ModSource, SourceKind};

/// Input to a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub kind: SourceKind,
    /// Path, URL, slug or project id, with any `modrinth:`-style prefix removed.
    pub identifier: String,
    pub loader: Option<String>,
    pub mc_version: Option<String>,
    pub version_id: Option<String>,
    pub project_id: Option<String>,
    pub filename_override: Option<String>,
    /// Version safety. Only an explicit caller opt-out turns this off.
    pub check_compat: bool,
}

impl SourceRequest {
    pub fn new(kind: SourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            loader: None,
            mc_version: None,
            version_id: None,
            project_id: None,
            filename_override: None,
            check_compat: true,
        }
    }

    /// Parse a user-supplied source string.
    ///
    /// `explicit` forces the source type; otherwise it is inferred from
    /// prefixes (`modrinth:`, `mr:`, `curseforge:`, `cf:`), URL schemes and
    /// local paths. Registry identifiers may carry an inline `@version`.
    pub fn parse(raw: &str, explicit: Option<SourceKind>) -> Result<Self, ResolutionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolutionError::InvalidSource("empty source".into()));
        }

        let kind = explicit.unwrap_or_else(|| infer_kind(raw));
        let mut identifier = strip_prefix(raw, kind).to_string();
        let mut version_id = None;

        if matches!(kind, SourceKind::Modrinth | SourceKind::Curseforge) {
            if let Some((target, version)) = identifier.split_once('@') {
                version_id = Some(version.to_string()).filter(|v| !v.is_empty());
                identifier = target.to_string();
            }
        }

        if identifier.is_empty() {
            return Err(ResolutionError::InvalidSource(format!(
                "'{raw}' has no identifier after its prefix"
            )));
        }

        let mut request = Self::new(kind, identifier);
        request.version_id = version_id;
        Ok(request)
    }

    /// Request that re-acquires the artifact an entry already points at.
    pub fn from_source(source: &ModSource, filename: &str) -> Result<Self, ResolutionError> {
        let missing = |what: &str| {
            ResolutionError::InvalidSource(format!("recorded {} source has no {what}", source.kind()))
        };

        let mut request = match source {
            ModSource::Local { path } => {
                let path = path.as_ref().ok_or_else(|| missing("path"))?;
                Self::new(SourceKind::Local, path.to_string_lossy())
            }
            ModSource::Url { url } => {
                Self::new(SourceKind::Url, url.clone().ok_or_else(|| missing("url"))?)
            }
            ModSource::Modrinth {
                project_id,
                version_id,
                slug,
                ..
            }
            | ModSource::Curseforge {
                project_id,
                version_id,
                slug,
                ..
            } => {
                let identifier = slug
                    .clone()
                    .or_else(|| project_id.clone())
                    .ok_or_else(|| missing("slug or project id"))?;
                let mut request = Self::new(source.kind(), identifier);
                request.project_id = project_id.clone();
                request.version_id = version_id.clone();
                request
            }
            ModSource::Custom { .. } => {
                return Err(ResolutionError::UnsupportedSource(SourceKind::Custom.to_string()))
            }
        };
        request.filename_override = Some(filename.to_string());
        Ok(request)
    }

    /// Source descriptor recorded for a manifest-only entry, built from the
    /// request alone.
    pub fn to_source(&self) -> ModSource {
        match self.kind {
            SourceKind::Local => ModSource::Local {
                path: Some(expand_home(&self.identifier)),
            },
            SourceKind::Url => ModSource::Url {
                url: Some(self.identifier.clone()),
            },
            SourceKind::Modrinth => ModSource::Modrinth {
                project_id: self.project_id.clone(),
                version_id: self.version_id.clone(),
                slug: Some(self.identifier.clone()),
                download_url: None,
            },
            SourceKind::Curseforge => ModSource::Curseforge {
                project_id: self.project_id.clone(),
                version_id: self.version_id.clone(),
                slug: Some(self.identifier.clone()),
                download_url: None,
            },
            SourceKind::Custom => ModSource::Custom {
                notes: Some(self.identifier.clone()),
            },
        }
    }
}

/// Transient resolver output: what to fetch or copy, and what to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMod {
    pub filename: String,
    /// Absent for local sources, which carry `source_path` instead.
    pub download_url: Option<String>,
    pub source_path: Option<PathBuf>,
    /// Upstream digests; may be partial (sha512/sha1/md5 only).
    pub hashes: ModHashes,
    /// Metadata merged back into the entry's `source`.
    pub source: ModSource,
    pub suggested_id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    /// Loaders the artifact declares. Empty means "not declared".
    pub loaders: Vec<String>,
    /// Game versions the artifact declares. Empty means "not declared".
    pub game_versions: Vec<String>,
}

impl ResolvedMod {
    pub fn new(filename: impl Into<String>, source: ModSource) -> Self {
        Self {
            filename: filename.into(),
            download_url: None,
            source_path: None,
            hashes: ModHashes::default(),
            source,
            suggested_id: None,
            name: None,
            version: None,
            loaders: Vec::new(),
            game_versions: Vec::new(),
        }
    }

    /// Loader to record: the requested one when declared, else the first declared.
    pub fn recorded_loader(&self, requested: Option<&str>) -> Option<String> {
        match requested {
            Some(want) if self.loaders.iter().any(|l| l.eq_ignore_ascii_case(want)) => {
                Some(want.to_ascii_lowercase())
            }
            _ => self
                .loaders
                .first()
                .map(|l| l.to_ascii_lowercase())
                .or_else(|| requested.map(str::to_string)),
        }
    }

    pub fn recorded_mc_version(&self, requested: Option<&str>) -> Option<String> {
        match requested {
            Some(want) if self.game_versions.iter().any(|v| v == want) => Some(want.to_string()),
            _ => self
                .game_versions
                .first()
                .cloned()
                .or_else(|| requested.map(str::to_string)),
        }
    }
}

pub fn infer_kind(raw: &str) -> SourceKind {
    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("modrinth:") || lowered.starts_with("mr:") {
        return SourceKind::Modrinth;
    }
    if lowered.starts_with("curseforge:") || lowered.starts_with("cf:") {
        return SourceKind::Curseforge;
    }
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return SourceKind::Url;
    }
    if expand_home(raw).exists() {
        return SourceKind::Local;
    }
    SourceKind::Custom
}

fn strip_prefix(raw: &str, kind: SourceKind) -> &str {
    let prefixes: &[&str] = match kind {
        SourceKind::Modrinth => &["modrinth:", "mr:"],
        SourceKind::Curseforge => &["curseforge:", "cf:"],
        _ => &[],
    };
    let lowered = raw.to_ascii_lowercase();
    for prefix in prefixes {
        if lowered.starts_with(prefix) {
            return &raw[prefix.len()..];
        }
    }
    raw
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(raw).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_prefixes_and_inline_versions() {
        let req = SourceRequest::parse("mr:sodium@mc1.21.1-0.6.0", None).unwrap();
        assert_eq!(req.kind, SourceKind::Modrinth);
        assert_eq!(req.identifier, "sodium");
        assert_eq!(req.version_id.as_deref(), Some("mc1.21.1-0.6.0"));
        assert!(req.check_compat);

        let req = SourceRequest::parse("CurseForge:jei", None).unwrap();
        assert_eq!(req.kind, SourceKind::Curseforge);
        assert_eq!(req.identifier, "jei");
        assert_eq!(req.version_id, None);
    }

    #[test]
    fn urls_keep_at_signs() {
        let req = SourceRequest::parse("https://cdn.example.com/a@b/mod.jar", None).unwrap();
        assert_eq!(req.kind, SourceKind::Url);
        assert_eq!(req.identifier, "https://cdn.example.com/a@b/mod.jar");
    }

    #[test]
    fn existing_paths_are_local_and_unknowns_are_custom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jar");
        std::fs::write(&path, b"x").unwrap();

        let req = SourceRequest::parse(path.to_str().unwrap(), None).unwrap();
        assert_eq!(req.kind, SourceKind::Local);

        let req = SourceRequest::parse("some-mod-i-saw-once", None).unwrap();
        assert_eq!(req.kind, SourceKind::Custom);
    }

    #[test]
    fn bare_prefix_is_invalid() {
        assert!(matches!(
            SourceRequest::parse("modrinth:", None),
            Err(ResolutionError::InvalidSource(_))
        ));
    }

    #[test]
    fn from_source_pins_recorded_version() {
        let source = ModSource::Modrinth {
            project_id: Some("AANobbMI".into()),
            version_id: Some("v42".into()),
            slug: Some("sodium".into()),
            download_url: None,
        };
        let req = SourceRequest::from_source(&source, "sodium.jar").unwrap();
        assert_eq!(req.identifier, "sodium");
        assert_eq!(req.version_id.as_deref(), Some("v42"));
        assert_eq!(req.filename_override.as_deref(), Some("sodium.jar"));

        assert!(SourceRequest::from_source(&ModSource::Url { url: None }, "x.jar").is_err());
    }

    #[test]
    fn recorded_loader_prefers_requested() {
        let mut resolved = ResolvedMod::new("a.jar", ModSource::default());
        resolved.loaders = vec!["fabric".into(), "quilt".into()];
        assert_eq!(resolved.recorded_loader(Some("Quilt")).as_deref(), Some("quilt"));
        assert_eq!(resolved.recorded_loader(None).as_deref(), Some("fabric"));

        resolved.loaders.clear();
        assert_eq!(resolved.recorded_loader(Some("forge")).as_deref(), Some("forge"));
    }
}
