//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Manifest URL normalisation helpers."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---

/// Default separator between a manifest URL and its deep-link suffix.
pub const DEEP_LINK_DELIMITER: char = '+';

/// Reduce a full experience URI to the manifest URL that identifies it.
///
/// Everything from the first `delimiter` on is a deep link and is dropped.
/// A single trailing `/` is removed afterwards, since manifest URLs never end
/// with one.
pub fn normalize_manifest_url(uri: &str, delimiter: char) -> String {
    let base = match uri.find(delimiter) {
        Some(position) => &uri[..position],
        None => uri,
    };
    base.strip_suffix('/').unwrap_or(base).to_owned()
}

/// Deep-link portion of `uri`, including the delimiter, if any.
pub fn deep_link_suffix(uri: &str, delimiter: char) -> Option<&str> {
    uri.find(delimiter).map(|position| &uri[position..])
}

/// Rewrite the custom `exp://` / `exps://` schemes to their HTTP equivalents.
pub fn to_http(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("exps://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("exp://") {
        format!("http://{rest}")
    } else {
        url.to_owned()
    }
}

/// Turn on hot reloading in a bundle URL.
pub fn with_hot_reload(bundle_url: &str) -> String {
    if bundle_url.contains("hot=false") {
        bundle_url.replace("hot=false", "hot=true")
    } else if bundle_url.contains('?') {
        format!("{bundle_url}&hot=true")
    } else {
        format!("{bundle_url}?hot=true")
    }
}
