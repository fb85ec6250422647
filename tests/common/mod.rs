#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use msc_lib::core::downloader::{Downloader, Fetcher, RateLimiter, RetryPolicy};
use msc_lib::core::error::ModsResult;
use msc_lib::core::http::{build_http_client, DEFAULT_USER_AGENT};
use msc_lib::core::manifest::store::parse_manifest;
use msc_lib::core::manifest::Manifest;
use msc_lib::core::mutation::{InitOptions, ModsEngine};
use msc_lib::core::server::ServerControl;
use msc_lib::core::sources::{LocalResolver, SourceRegistry};
use msc_lib::core::state::Defaults;
use tempfile::TempDir;

/// Server whose running state the test flips by hand.
#[derive(Debug, Default)]
pub struct StubServer {
    running: AtomicBool,
    restarts: AtomicUsize,
}

impl StubServer {
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerControl for StubServer {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn request_restart(&self) -> ModsResult<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A temporary server root with a `data/` dir and a `downloads/` dir that
/// plays the part of files the operator wants to add.
pub struct Fixture {
    pub root: TempDir,
    pub data_dir: PathBuf,
    pub server: Arc<StubServer>,
    pub engine: ModsEngine,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::create_dir_all(root.path().join("downloads")).unwrap();

        let client = build_http_client(DEFAULT_USER_AGENT).unwrap();
        let fetcher = Arc::new(Fetcher::new(
            client,
            Arc::new(RateLimiter::default()),
            RetryPolicy::default(),
        ));
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(LocalResolver));

        let server = Arc::new(StubServer::default());
        let defaults = Defaults {
            loader: Some("fabric".into()),
            minecraft_version: Some("1.21.1".into()),
            api_key: None,
            user_agent: DEFAULT_USER_AGENT.into(),
        };
        let engine = ModsEngine::new(
            &data_dir,
            registry,
            Downloader::new(fetcher),
            server.clone(),
            defaults,
        );

        Self {
            root,
            data_dir,
            server,
            engine,
        }
    }

    /// Fixture with an initialised, empty manifest.
    pub async fn initialised() -> Self {
        let fixture = Self::new();
        fixture.engine.init(InitOptions::default()).await.unwrap();
        fixture
    }

    /// Write an archive into `downloads/` and return its path as a source string.
    pub fn source_file(&self, name: &str, contents: &[u8]) -> String {
        let path = self.root.path().join("downloads").join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.data_dir.join("mods")
    }

    pub fn disabled_dir(&self) -> PathBuf {
        self.data_dir.join("mods-disabled")
    }

    pub fn manifest(&self) -> Manifest {
        let raw = std::fs::read_to_string(self.engine.manifest_path()).unwrap();
        parse_manifest(&raw).unwrap()
    }
}

pub fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}
