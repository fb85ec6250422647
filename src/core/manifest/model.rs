use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;

use super::layout::{check_artifact_name, is_plain_dir_name};
use crate::core::error::{ModsError, ModsResult};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_MODS_DIR: &str = "mods";

/// Mod loaders the engine knows how to talk about.
/// Manifest fields keep loaders as lowercase strings; this type is used
/// for normalisation and registry-specific mappings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    Vanilla,
    Forge,
    Fabric,
    NeoForge,
    Quilt,
    Paper,
}

impl LoaderType {
    /// Parse a loader or server type name, case-insensitively.
    /// Bukkit-family server types collapse to `Paper`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vanilla" => Some(Self::Vanilla),
            "forge" => Some(Self::Forge),
            "fabric" => Some(Self::Fabric),
            "neoforge" => Some(Self::NeoForge),
            "quilt" => Some(Self::Quilt),
            "paper" | "purpur" | "spigot" => Some(Self::Paper),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderType::Vanilla => write!(f, "vanilla"),
            LoaderType::Forge => write!(f, "forge"),
            LoaderType::Fabric => write!(f, "fabric"),
            LoaderType::NeoForge => write!(f, "neoforge"),
            LoaderType::Quilt => write!(f, "quilt"),
            LoaderType::Paper => write!(f, "paper"),
        }
    }
}

/// Which side of the game a mod is needed on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Server,
    Client,
    Both,
}

/// Where an entry came from. Tagged by `type` in the manifest JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModSource {
    Local {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    Url {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Modrinth {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slug: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
    },
    Curseforge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slug: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
    },
    /// Recorded by hand (`--manifest-only`) from something no resolver handles.
    Custom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
}

impl Default for ModSource {
    fn default() -> Self {
        ModSource::Local { path: None }
    }
}

impl ModSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ModSource::Local { .. } => SourceKind::Local,
            ModSource::Url { .. } => SourceKind::Url,
            ModSource::Modrinth { .. } => SourceKind::Modrinth,
            ModSource::Curseforge { .. } => SourceKind::Curseforge,
            ModSource::Custom { .. } => SourceKind::Custom,
        }
    }

    /// Empty descriptor of the given kind.
    pub fn empty(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Local => ModSource::Local { path: None },
            SourceKind::Url => ModSource::Url { url: None },
            SourceKind::Modrinth => ModSource::Modrinth {
                project_id: None,
                version_id: None,
                slug: None,
                download_url: None,
            },
            SourceKind::Curseforge => ModSource::Curseforge {
                project_id: None,
                version_id: None,
                slug: None,
                download_url: None,
            },
            SourceKind::Custom => ModSource::Custom { notes: None },
        }
    }
}

/// Source-type tag; the key of the resolver registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Url,
    Modrinth,
    Curseforge,
    Custom,
}

impl SourceKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "url" => Some(Self::Url),
            "modrinth" | "mr" => Some(Self::Modrinth),
            "curseforge" | "cf" => Some(Self::Curseforge),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::Local => "local",
            SourceKind::Url => "url",
            SourceKind::Modrinth => "modrinth",
            SourceKind::Curseforge => "curseforge",
            SourceKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Known digests of an artifact. Only `sha256` is computed locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModHashes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl ModHashes {
    pub fn is_empty(&self) -> bool {
        self.sha256.is_none() && self.sha512.is_none() && self.sha1.is_none() && self.md5.is_none()
    }
}

/// One manifest record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub side: Side,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub filename: String,
    #[serde(default)]
    pub source: ModSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mc_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "ModHashes::is_empty")]
    pub hashes: ModHashes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Fields written by other tools; carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl ModEntry {
    pub fn new(id: impl Into<String>, filename: impl Into<String>, source: ModSource) -> Self {
        Self {
            id: id.into(),
            name: None,
            side: Side::Server,
            enabled: true,
            filename: filename.into(),
            source,
            version: None,
            mc_version: None,
            loader: None,
            installed_at: None,
            hashes: ModHashes::default(),
            notes: None,
            extra: Map::new(),
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        self.hashes.sha256.as_deref()
    }

    pub fn expected_placement(&self) -> Placement {
        if self.enabled {
            Placement::Enabled
        } else {
            Placement::Disabled
        }
    }
}

/// Which of the two mods directories a file lives in (or should).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Enabled,
    Disabled,
}

impl Placement {
    pub fn other(self) -> Self {
        match self {
            Placement::Enabled => Placement::Disabled,
            Placement::Disabled => Placement::Enabled,
        }
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Placement::Enabled => f.write_str("mods"),
            Placement::Disabled => f.write_str("mods-disabled"),
        }
    }
}

/// The declarative record of desired mods, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_version: Option<String>,
    #[serde(default = "default_mods_dir")]
    pub mods_dir: String,
    #[serde(default)]
    pub mods: Vec<ModEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_mods_dir() -> String {
    DEFAULT_MODS_DIR.to_string()
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Manifest {
    pub fn new(loader: Option<String>, minecraft_version: Option<String>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            loader,
            minecraft_version,
            mods_dir: default_mods_dir(),
            mods: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn find(&self, id: &str) -> ModsResult<&ModEntry> {
        self.mods
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| ModsError::ModNotFound(id.to_string()))
    }

    pub fn find_mut(&mut self, id: &str) -> ModsResult<&mut ModEntry> {
        self.mods
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ModsError::ModNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.mods.iter().any(|m| m.id == id)
    }

    /// Enabled entry (other than `except`) already using `filename`.
    pub fn enabled_owner_of(&self, filename: &str, except: Option<&str>) -> Option<&ModEntry> {
        self.mods
            .iter()
            .find(|m| m.enabled && m.filename == filename && Some(m.id.as_str()) != except)
    }

    /// Append an entry, enforcing id uniqueness, a plain archive filename
    /// and the enabled-filename rule.
    pub fn add(&mut self, entry: ModEntry) -> ModsResult<()> {
        check_artifact_name(&entry.filename).map_err(ModsError::InvalidFilename)?;
        if self.contains(&entry.id) {
            return Err(ModsError::DuplicateMod(entry.id));
        }
        if entry.enabled {
            if let Some(owner) = self.enabled_owner_of(&entry.filename, None) {
                return Err(ModsError::FilenameInUse {
                    filename: entry.filename.clone(),
                    owner: owner.id.clone(),
                });
            }
        }
        self.mods.push(entry);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> ModsResult<ModEntry> {
        let index = self
            .mods
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| ModsError::ModNotFound(id.to_string()))?;
        Ok(self.mods.remove(index))
    }

    /// Check the structural invariants a loaded manifest must satisfy.
    pub fn validate(&self) -> ModsResult<()> {
        if !is_plain_dir_name(&self.mods_dir) {
            return Err(ModsError::CorruptManifest(format!(
                "mods_dir '{}' must be a single directory name",
                self.mods_dir
            )));
        }
        let mut ids = HashSet::new();
        let mut enabled_files = HashSet::new();
        for entry in &self.mods {
            if entry.id.trim().is_empty() {
                return Err(ModsError::CorruptManifest("entry with empty id".into()));
            }
            if entry.filename.trim().is_empty() {
                return Err(ModsError::CorruptManifest(format!(
                    "mod '{}' has an empty filename",
                    entry.id
                )));
            }
            if let Err(reason) = check_artifact_name(&entry.filename) {
                return Err(ModsError::CorruptManifest(format!(
                    "mod '{}': {reason}",
                    entry.id
                )));
            }
            if !ids.insert(entry.id.as_str()) {
                return Err(ModsError::CorruptManifest(format!(
                    "duplicate mod id '{}'",
                    entry.id
                )));
            }
            if entry.enabled && !enabled_files.insert(entry.filename.as_str()) {
                return Err(ModsError::CorruptManifest(format!(
                    "filename '{}' is shared by more than one enabled mod",
                    entry.filename
                )));
            }
        }
        Ok(())
    }
}

/// Lowercase slug of a filename stem: `Sodium_Extra-0.5.jar` -> `sodium-extra-0-5`.
pub fn derive_mod_id(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut slug = String::with_capacity(stem.len());
    let mut pending_dash = false;
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "mod".to_string()
    } else {
        slug
    }
}

/// `fabric-api` -> `Fabric Api`.
pub fn humanize_name(id: &str) -> String {
    id.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
