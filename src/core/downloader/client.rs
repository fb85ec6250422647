use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::fetcher::Fetcher;
use crate::core::error::{ModsError, ModsResult, ResolutionError};
use crate::core::manifest::layout::temp_path_for;
use crate::core::manifest::ModHashes;
use crate::core::scanner::HASH_CHUNK_SIZE;
use crate::core::sources::ResolvedMod;

/// An artifact fully written to a temp file next to its destination.
/// Nothing is visible at `target` until `commit`.
#[derive(Debug)]
pub struct StagedArtifact {
    pub temp_path: PathBuf,
    pub target: PathBuf,
    pub sha256: String,
    pub size: u64,
}

impl StagedArtifact {
    /// Atomically move the staged file into place.
    pub async fn commit(self) -> ModsResult<PathBuf> {
        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.target).await {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Err(ModsError::io(&self.target, e));
        }
        info!("Installed {:?}", self.target);
        Ok(self.target)
    }
}

/// Streams artifacts into temp files while hashing them.
#[derive(Debug, Clone)]
pub struct Downloader {
    fetcher: Arc<Fetcher>,
}

impl Downloader {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Stage `resolved` for installation at `target`.
    ///
    /// SHA-256 is always computed locally; upstream digests are verified
    /// when present. Any failure removes the temp file.
    pub async fn stage(&self, resolved: &ResolvedMod, target: &Path) -> ModsResult<StagedArtifact> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ModsError::io(parent, e))?;
        }

        let temp_path = temp_path_for(target);
        let result = match (&resolved.download_url, &resolved.source_path) {
            (Some(url), _) => self.download_to(url, &temp_path, &resolved.hashes).await,
            (None, Some(source)) => copy_to(source, &temp_path, &resolved.hashes).await,
            (None, None) => Err(ModsError::Other(format!(
                "'{}' has neither a download URL nor a source path",
                resolved.filename
            ))),
        };

        match result {
            Ok((sha256, size)) => {
                debug!("Staged {:?} ({} bytes, sha256 {})", temp_path, size, sha256);
                Ok(StagedArtifact {
                    temp_path,
                    target: target.to_path_buf(),
                    sha256,
                    size,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    /// Download `url` into `dest`, starting over when the body stream
    /// fails transiently (stall, reset) under the fetcher's retry policy.
    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        expected: &ModHashes,
    ) -> ModsResult<(String, u64)> {
        let policy = self.fetcher.policy();
        let attempts = policy.attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.stream_once(url, dest, expected).await {
                Ok(done) => return Ok(done),
                Err(Attempt::Retry(err)) if attempt + 1 < attempts => {
                    let delay = policy.delay(attempt);
                    warn!(
                        "Download of {} interrupted: {}; retrying in {:?} (attempt {}/{})",
                        url,
                        err,
                        delay,
                        attempt + 2,
                        attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Attempt::Retry(err)) => return Err(ModsError::resolution(url, err)),
                Err(Attempt::Fail(err)) => return Err(err),
            }
        }
    }

    /// One full transfer. `File::create` truncates whatever an earlier
    /// attempt left in `dest`.
    async fn stream_once(
        &self,
        url: &str,
        dest: &Path,
        expected: &ModHashes,
    ) -> Result<(String, u64), Attempt> {
        let response = self
            .fetcher
            .get(url, &[])
            .await
            .map_err(|e| Attempt::Fail(ModsError::resolution(url, e)))?;

        let mut digests = DigestSet::new(expected);
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Attempt::Fail(ModsError::io(dest, e)))?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Attempt::from_body(url, e))?;
            digests.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| Attempt::Fail(ModsError::io(dest, e)))?;
        }
        file.flush()
            .await
            .map_err(|e| Attempt::Fail(ModsError::io(dest, e)))?;
        file.sync_all()
            .await
            .map_err(|e| Attempt::Fail(ModsError::io(dest, e)))?;
        drop(file);

        debug!("Downloaded: {} -> {:?}", url, dest);
        digests.finish(dest).map_err(Attempt::Fail)
    }
}

/// Outcome of a failed transfer attempt.
enum Attempt {
    Retry(ResolutionError),
    Fail(ModsError),
}

impl Attempt {
    /// Body errors surface as decode errors wrapping the transport failure;
    /// with identity encoding they always mean a broken or stalled transfer.
    fn from_body(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_body() || err.is_decode() || err.is_request() {
            Attempt::Retry(ResolutionError::Network(err))
        } else {
            Attempt::Fail(ModsError::resolution(url, ResolutionError::Network(err)))
        }
    }
}

async fn copy_to(source: &Path, dest: &Path, expected: &ModHashes) -> ModsResult<(String, u64)> {
    let mut input = tokio::fs::File::open(source)
        .await
        .map_err(|e| ModsError::io(source, e))?;
    let mut output = tokio::fs::File::create(dest)
        .await
        .map_err(|e| ModsError::io(dest, e))?;

    let mut digests = DigestSet::new(expected);
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| ModsError::io(source, e))?;
        if n == 0 {
            break;
        }
        digests.update(&buf[..n]);
        output
            .write_all(&buf[..n])
            .await
            .map_err(|e| ModsError::io(dest, e))?;
    }
    output.flush().await.map_err(|e| ModsError::io(dest, e))?;
    output.sync_all().await.map_err(|e| ModsError::io(dest, e))?;

    debug!("Copied: {:?} -> {:?}", source, dest);
    digests.finish(dest)
}

/// SHA-256 plus whichever upstream digests need verifying.
struct DigestSet<'a> {
    expected: &'a ModHashes,
    size: u64,
    sha256: Sha256,
    sha512: Option<Sha512>,
    sha1: Option<Sha1>,
    md5: Option<Md5>,
}

impl<'a> DigestSet<'a> {
    fn new(expected: &'a ModHashes) -> Self {
        Self {
            expected,
            size: 0,
            sha256: Sha256::new(),
            sha512: expected.sha512.as_ref().map(|_| Sha512::new()),
            sha1: expected.sha1.as_ref().map(|_| Sha1::new()),
            md5: expected.md5.as_ref().map(|_| Md5::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.size += chunk.len() as u64;
        self.sha256.update(chunk);
        if let Some(h) = self.sha512.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha1.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.md5.as_mut() {
            h.update(chunk);
        }
    }

    fn finish(self, path: &Path) -> ModsResult<(String, u64)> {
        let sha256 = hex::encode(self.sha256.finalize());
        check(path, "sha256", self.expected.sha256.as_deref(), Some(sha256.clone()))?;
        check(
            path,
            "sha512",
            self.expected.sha512.as_deref(),
            self.sha512.map(|h| hex::encode(h.finalize())),
        )?;
        check(
            path,
            "sha1",
            self.expected.sha1.as_deref(),
            self.sha1.map(|h| hex::encode(h.finalize())),
        )?;
        check(
            path,
            "md5",
            self.expected.md5.as_deref(),
            self.md5.map(|h| hex::encode(h.finalize())),
        )?;
        Ok((sha256, self.size))
    }
}

fn check(
    path: &Path,
    algorithm: &'static str,
    expected: Option<&str>,
    actual: Option<String>,
) -> ModsResult<()> {
    match (expected, actual) {
        (Some(expected), Some(actual)) if !expected.eq_ignore_ascii_case(&actual) => {
            Err(ModsError::DigestMismatch {
                path: path.to_path_buf(),
                algorithm,
                expected: expected.to_string(),
                actual,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::net::TcpListener;

    use crate::core::downloader::{RateLimiter, RetryPolicy};
    use crate::core::manifest::ModSource;

    fn downloader() -> Downloader {
        let fetcher = Fetcher::new(
            reqwest::Client::new(),
            Arc::new(RateLimiter::default()),
            RetryPolicy::default(),
        );
        Downloader::new(Arc::new(fetcher))
    }

    fn local(path: &Path, hashes: ModHashes) -> ResolvedMod {
        let mut resolved = ResolvedMod::new(
            "copy.jar",
            ModSource::Local {
                path: Some(path.to_path_buf()),
            },
        );
        resolved.source_path = Some(path.to_path_buf());
        resolved.hashes = hashes;
        resolved
    }

    #[tokio::test]
    async fn copy_stages_then_commits() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.jar");
        std::fs::write(&src, b"hello").unwrap();
        let target = dir.path().join("mods").join("copy.jar");

        let staged = downloader()
            .stage(&local(&src, ModHashes::default()), &target)
            .await
            .unwrap();
        assert!(!target.exists());
        assert!(staged.temp_path.exists());
        assert_eq!(
            staged.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(staged.size, 5);

        staged.commit().await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn digest_mismatch_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.jar");
        std::fs::write(&src, b"hello").unwrap();
        let mods = dir.path().join("mods");
        let hashes = ModHashes {
            sha1: Some("0000000000000000000000000000000000000000".into()),
            ..ModHashes::default()
        };

        let err = downloader()
            .stage(&local(&src, hashes), &mods.join("copy.jar"))
            .await
            .unwrap_err();

        assert!(matches!(err, ModsError::DigestMismatch { algorithm: "sha1", .. }));
        assert_eq!(std::fs::read_dir(&mods).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn matching_upstream_digests_pass() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.jar");
        std::fs::write(&src, b"hello").unwrap();
        let hashes = ModHashes {
            sha1: Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d".into()),
            md5: Some("5d41402abc4b2a76b9719d911017c592".into()),
            ..ModHashes::default()
        };

        let staged = downloader()
            .stage(&local(&src, hashes), &dir.path().join("mods/copy.jar"))
            .await
            .unwrap();
        assert_eq!(staged.size, 5);
    }

    /// Serves `body` over plain HTTP. The first connection sends the headers
    /// and ten bytes, then goes silent; later connections send everything.
    async fn stalling_server(body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                tokio::spawn(async move {
                    let mut request = [0u8; 1024];
                    let _ = socket.read(&mut request).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    if n == 0 {
                        let _ = socket.write_all(&body[..10]).await;
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    } else {
                        let _ = socket.write_all(&body).await;
                    }
                });
            }
        });
        (format!("http://{addr}/mod.jar"), connections)
    }

    #[tokio::test]
    async fn stalled_transfer_is_restarted() {
        let body: Vec<u8> = (0..100u8).collect();
        let (url, connections) = stalling_server(body.clone()).await;
        let client = reqwest::Client::builder()
            .read_timeout(Duration::from_millis(300))
            .build()
            .unwrap();
        let fetcher = Fetcher::new(
            client,
            Arc::new(RateLimiter::default()),
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(10),
            },
        );
        let mut resolved = ResolvedMod::new("mod.jar", ModSource::Url { url: Some(url.clone()) });
        resolved.download_url = Some(url);

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("mods").join("mod.jar");
        let staged = Downloader::new(Arc::new(fetcher))
            .stage(&resolved, &target)
            .await
            .unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(staged.size, 100);
        assert_eq!(staged.sha256, hex::encode(Sha256::digest(&body)));
        staged.commit().await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), body);
    }
}
