use super::request::{ResolvedMod, SourceRequest};
use crate::core::error::ResolutionError;

/// True when `declared` (empty = undeclared) admits `wanted`.
pub fn loader_matches(declared: &[String], wanted: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(want) => declared.is_empty() || declared.iter().any(|l| l.eq_ignore_ascii_case(want)),
    }
}

pub fn game_version_matches(declared: &[String], wanted: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(want) => {
            declared.is_empty() || declared.iter().any(|v| v.eq_ignore_ascii_case(want))
        }
    }
}

/// Version safety: reject a resolution whose declared loader or game
/// version contradicts the request, unless the request opted out.
pub fn ensure_compatible(
    request: &SourceRequest,
    resolved: &ResolvedMod,
) -> Result<(), ResolutionError> {
    if !request.check_compat {
        return Ok(());
    }

    let loader = request.loader.as_deref();
    let mc_version = request.mc_version.as_deref();
    let incompatible = |detail: String| ResolutionError::IncompatibleVersion {
        loader: loader.unwrap_or("any").to_string(),
        mc_version: mc_version.unwrap_or("any").to_string(),
        detail,
    };

    if !loader_matches(&resolved.loaders, loader) {
        return Err(incompatible(format!(
            "{} targets loader(s) {}",
            resolved.filename,
            resolved.loaders.join(", ")
        )));
    }
    if !game_version_matches(&resolved.game_versions, mc_version) {
        return Err(incompatible(format!(
            "{} is tagged for Minecraft {}",
            resolved.filename,
            resolved.game_versions.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::{ModSource, SourceKind};

    fn resolved(loaders: &[&str], versions: &[&str]) -> ResolvedMod {
        let mut r = ResolvedMod::new("mod.jar", ModSource::default());
        r.loaders = loaders.iter().map(|s| s.to_string()).collect();
        r.game_versions = versions.iter().map(|s| s.to_string()).collect();
        r
    }

    fn request(loader: Option<&str>, mc: Option<&str>) -> SourceRequest {
        let mut req = SourceRequest::new(SourceKind::Modrinth, "mod");
        req.loader = loader.map(str::to_string);
        req.mc_version = mc.map(str::to_string);
        req
    }

    #[test]
    fn contradicting_loader_is_rejected() {
        let err = ensure_compatible(
            &request(Some("forge"), Some("1.21.1")),
            &resolved(&["fabric"], &["1.21.1"]),
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::IncompatibleVersion { .. }));
    }

    #[test]
    fn contradicting_game_version_is_rejected() {
        assert!(ensure_compatible(
            &request(Some("fabric"), Some("1.20.1")),
            &resolved(&["fabric"], &["1.21", "1.21.1"]),
        )
        .is_err());
    }

    #[test]
    fn undeclared_metadata_is_not_a_contradiction() {
        assert!(ensure_compatible(&request(Some("forge"), Some("1.21.1")), &resolved(&[], &[])).is_ok());
    }

    #[test]
    fn opt_out_skips_the_check() {
        let mut req = request(Some("forge"), Some("1.21.1"));
        req.check_compat = false;
        assert!(ensure_compatible(&req, &resolved(&["fabric"], &["1.19"])).is_ok());
    }

    #[test]
    fn loader_comparison_ignores_case() {
        assert!(loader_matches(&["NeoForge".to_string()], Some("neoforge")));
    }
}
