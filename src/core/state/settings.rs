use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{ModsError, ModsResult};
use crate::core::http::DEFAULT_USER_AGENT;
use crate::core::manifest::LoaderType;

pub const CONFIG_FILE_NAME: &str = ".msc.json";
const USER_CONFIG_DIR: &str = "msc";
const USER_CONFIG_FILE: &str = "config.json";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_DOCKER_SERVICE: &str = "minecraft";

/// Contents of `<server_root>/.msc.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub name: String,
    pub server_type: String,
    pub minecraft_version: String,
    pub data_dir: Option<PathBuf>,
    pub docker_service: Option<String>,
    pub api_user_agent: Option<String>,
    pub curseforge_api_key: Option<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            name: "default-server".into(),
            server_type: "FABRIC".into(),
            minecraft_version: "1.21.1".into(),
            data_dir: None,
            docker_service: None,
            api_user_agent: None,
            curseforge_api_key: None,
        }
    }
}

/// Per-user config remembering a default server root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    pub server_root: Option<PathBuf>,
}

/// `MSC_*` environment overrides.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub server_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub docker_service: Option<String>,
    pub api_user_agent: Option<String>,
    pub curseforge_api_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            server_root: get("MSC_SERVER_ROOT").map(PathBuf::from),
            data_dir: get("MSC_DATA_DIR").map(PathBuf::from),
            docker_service: get("MSC_DOCKER_SERVICE"),
            api_user_agent: get("MSC_API_USER_AGENT"),
            curseforge_api_key: get("MSC_CURSEFORGE_API_KEY"),
        }
    }
}

/// Fully resolved, read-only server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub server_root: PathBuf,
    pub data_dir: PathBuf,
    pub name: String,
    pub server_type: String,
    pub minecraft_version: String,
    pub docker_service: String,
    pub api_user_agent: String,
    pub curseforge_api_key: Option<String>,
}

/// The slice of settings the resolver registry falls back to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    pub loader: Option<String>,
    pub minecraft_version: Option<String>,
    pub api_key: Option<String>,
    pub user_agent: String,
}

impl ServerSettings {
    /// Load settings from env + `.msc.json`, locating the server root first.
    pub fn load(root: Option<&Path>) -> ModsResult<Self> {
        let env = EnvOverrides::from_env();
        let user = load_user_config()?;
        let cwd = std::env::current_dir().map_err(|e| ModsError::io(".", e))?;

        let mut server_root = resolve_initial_root(root, &cwd, &user);
        if let Some(env_root) = &env.server_root {
            server_root = coerce_path(&server_root, env_root);
        }

        let config_path = server_root.join(CONFIG_FILE_NAME);
        let raw = std::fs::read_to_string(&config_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ModsError::Config(format!(
                    "Could not find {CONFIG_FILE_NAME} in {server_root:?}. Run msc from your server root or pass --root."
                ))
            } else {
                ModsError::io(&config_path, e)
            }
        })?;
        let file: FileConfig = serde_json::from_str(&raw)
            .map_err(|e| ModsError::Config(format!("Invalid JSON in {config_path:?}: {e}")))?;

        debug!("Loaded settings from {:?}", config_path);
        Ok(Self::from_sources(server_root, file, env))
    }

    /// Merge file config and env overrides. Env wins.
    pub fn from_sources(server_root: PathBuf, file: FileConfig, env: EnvOverrides) -> Self {
        let data_dir = env
            .data_dir
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let docker_service = env
            .docker_service
            .or(file.docker_service)
            .unwrap_or_else(|| DEFAULT_DOCKER_SERVICE.to_string());
        let api_user_agent = env
            .api_user_agent
            .or(file.api_user_agent)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Self {
            data_dir: coerce_path(&server_root, &data_dir),
            server_root,
            name: file.name,
            server_type: file.server_type,
            minecraft_version: file.minecraft_version,
            docker_service,
            api_user_agent,
            curseforge_api_key: env.curseforge_api_key.or(file.curseforge_api_key),
        }
    }

    /// Loader implied by the configured server type.
    pub fn loader(&self) -> Option<String> {
        let raw = self.server_type.trim();
        if raw.is_empty() {
            return None;
        }
        Some(match LoaderType::parse(raw) {
            Some(loader) => loader.to_string(),
            None => raw.to_ascii_lowercase(),
        })
    }

    pub fn defaults(&self) -> Defaults {
        Defaults {
            loader: self.loader(),
            minecraft_version: Some(self.minecraft_version.clone())
                .filter(|v| !v.trim().is_empty()),
            api_key: self.curseforge_api_key.clone(),
            user_agent: self.api_user_agent.clone(),
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(USER_CONFIG_DIR).join(USER_CONFIG_FILE))
}

pub fn load_user_config() -> ModsResult<UserConfig> {
    let Some(path) = user_config_path() else {
        return Ok(UserConfig::default());
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|e| ModsError::Config(format!("Invalid JSON in {path:?}: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserConfig::default()),
        Err(e) => Err(ModsError::io(path, e)),
    }
}

pub fn save_user_config(config: &UserConfig) -> ModsResult<PathBuf> {
    let path = user_config_path()
        .ok_or_else(|| ModsError::Config("No user config directory on this platform".into()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ModsError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ModsError::io(&path, e))?;
    Ok(path)
}

fn resolve_initial_root(explicit: Option<&Path>, cwd: &Path, user: &UserConfig) -> PathBuf {
    if let Some(root) = explicit {
        return coerce_path(cwd, root);
    }
    if cwd.join(CONFIG_FILE_NAME).exists() {
        return cwd.to_path_buf();
    }
    if let Some(root) = &user.server_root {
        return coerce_path(cwd, root);
    }
    cwd.to_path_buf()
}

fn coerce_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}
