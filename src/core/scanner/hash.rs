use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::core::error::{ModsError, ModsResult};

pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Streamed SHA-256 of a file as lowercase hex.
pub async fn sha256_file(path: &Path) -> ModsResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ModsError::io(path, e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| ModsError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
