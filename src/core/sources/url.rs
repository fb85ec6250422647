use async_trait::async_trait;
use reqwest::Url;

use super::registry::SourceResolver;
use super::request::{ResolvedMod, SourceRequest};
use crate::core::error::ResolutionError;
use crate::core::manifest::{derive_mod_id, ModSource, SourceKind};

/// Direct download links. Nothing is fetched until staging.
pub struct UrlResolver;

#[async_trait]
impl SourceResolver for UrlResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::Url
    }

    async fn resolve(&self, request: &SourceRequest) -> Result<ResolvedMod, ResolutionError> {
        let url = Url::parse(&request.identifier).map_err(|e| {
            ResolutionError::InvalidSource(format!("'{}' is not a URL: {e}", request.identifier))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ResolutionError::InvalidSource(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let filename = match &request.filename_override {
            Some(name) => name.clone(),
            None => remote_file_name(&url).ok_or_else(|| {
                ResolutionError::InvalidSource(format!(
                    "cannot infer a file name from {url}; pass --filename"
                ))
            })?,
        };

        let mut resolved = ResolvedMod::new(
            filename.clone(),
            ModSource::Url {
                url: Some(url.to_string()),
            },
        );
        resolved.suggested_id = Some(derive_mod_id(&filename));
        resolved.download_url = Some(url.to_string());
        Ok(resolved)
    }
}

/// Last non-empty path segment, percent-decoded.
fn remote_file_name(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode(segment);
    if decoded.is_empty() || decoded.contains(['/', '\\']) {
        None
    } else {
        Some(decoded)
    }
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}
