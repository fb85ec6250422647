use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the mods engine.
/// Every module returns `Result<T, ModsError>`.
#[derive(Debug, Error)]
pub enum ModsError {
    // ── Manifest ────────────────────────────────────────
    #[error("Mods manifest not found at {0:?}. Run 'msc mods init' first.")]
    ManifestNotFound(PathBuf),

    #[error("Mods manifest already exists at {0:?}. Use --force to overwrite.")]
    ManifestExists(PathBuf),

    #[error("Manifest at {path:?} is not valid JSON: {source}")]
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Manifest does not match the expected schema: {0}")]
    InvalidSchema(String),

    #[error("Unsupported manifest schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("Mod '{0}' not found in manifest")]
    ModNotFound(String),

    #[error("Mod '{0}' already exists in manifest")]
    DuplicateMod(String),

    #[error("Invalid mod filename: {0}")]
    InvalidFilename(String),

    #[error("Filename '{filename}' is already used by enabled mod '{owner}'")]
    FilenameInUse { filename: String, owner: String },

    // ── Filesystem ──────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Resolution ──────────────────────────────────────
    #[error("Could not resolve '{target}': {source}")]
    Resolution {
        target: String,
        source: ResolutionError,
    },

    #[error("Integrity check failed for {path:?}: expected {algorithm} {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    // ── Safety ──────────────────────────────────────────
    #[error("Cannot {operation} while the server is running. Stop it first or pass --force.")]
    ServerRunning { operation: String },

    #[error("Refusing to {operation} without confirmation. Pass {flag} to proceed.")]
    ConfirmationRequired {
        operation: String,
        flag: &'static str,
    },

    #[error("Repair plan has {0} conflict(s) that need manual resolution")]
    RepairConflicts(usize),

    // ── Lifecycle collaborator ──────────────────────────
    #[error("Server lifecycle error: {0}")]
    Lifecycle(String),

    // ── Configuration ───────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type ModsResult<T> = Result<T, ModsError>;

impl ModsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModsError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn resolution(target: impl Into<String>, source: ResolutionError) -> Self {
        ModsError::Resolution {
            target: target.into(),
            source,
        }
    }

    /// True for errors produced by the lifecycle guard.
    pub fn is_safety(&self) -> bool {
        matches!(
            self,
            ModsError::ServerRunning { .. } | ModsError::ConfirmationRequired { .. }
        )
    }
}

impl From<std::io::Error> for ModsError {
    fn from(source: std::io::Error) -> Self {
        ModsError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

/// Failures a source resolver can report.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous match, candidates: {}", .0.join(", "))]
    AmbiguousMatch(Vec<String>),

    #[error("no build compatible with loader '{loader}' and Minecraft '{mc_version}': {detail}")]
    IncompatibleVersion {
        loader: String,
        mc_version: String,
        detail: String,
    },

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("rate limited by {0}; try again shortly")]
    RateLimited(String),

    #[error("upstream returned HTTP {status} for {url}: {message}")]
    Upstream {
        url: String,
        status: u16,
        message: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("source type '{0}' has no resolver")]
    UnsupportedSource(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),
}

impl ResolutionError {
    /// Network-level failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolutionError::Network(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            ResolutionError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
