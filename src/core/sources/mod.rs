// ─── Source Resolvers ───
// Pluggable resolvers that turn a source descriptor (path, URL, registry
// slug) into a concrete artifact to copy or download, plus metadata.

mod compat;
pub mod curseforge;
mod local;
pub mod modrinth;
mod registry;
mod request;
mod url;

use reqwest::Url;

use crate::core::error::ResolutionError;

pub use compat::{ensure_compatible, game_version_matches, loader_matches};
pub use curseforge::CurseForgeResolver;
pub use local::LocalResolver;
pub use modrinth::ModrinthResolver;
pub use registry::{validate_filename, SourceRegistry, SourceResolver};
pub use request::{expand_home, infer_kind, ResolvedMod, SourceRequest};
pub use url::UrlResolver;

/// `base/segment/...?query`, with segments percent-escaped.
pub(crate) fn api_url(
    base: &str,
    segments: &[&str],
    query: &[(&str, String)],
) -> Result<Url, ResolutionError> {
    let invalid = || ResolutionError::InvalidSource(format!("bad API base '{base}'"));
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url)
}
