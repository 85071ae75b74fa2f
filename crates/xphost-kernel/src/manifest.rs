//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Manifest documents, open options and surface load requests."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ManifestError;
use crate::uri::to_http;

pub const BUNDLE_URL_FIELD: &str = "bundleUrl";

/// Manifest document paired with the bundle URL it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedManifest {
    pub manifest: Value,
    pub bundle_url: String,
}

impl FetchedManifest {
    /// Extract the bundle URL from a raw manifest document.
    ///
    /// Custom `exp`/`exps` schemes in the bundle URL are rewritten to HTTP.
    pub fn from_document(manifest: Value) -> Result<Self, ManifestError> {
        let object = manifest.as_object().ok_or(ManifestError::NotAnObject)?;
        let bundle_url = object
            .get(BUNDLE_URL_FIELD)
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .map(to_http)
            .ok_or(ManifestError::MissingField {
                field: BUNDLE_URL_FIELD,
            })?;
        Ok(Self {
            manifest,
            bundle_url,
        })
    }

    /// Re-check the pairing, for fetchers that build the struct by hand.
    pub fn validated(self) -> Result<Self, ManifestError> {
        if !self.manifest.is_object() {
            return Err(ManifestError::NotAnObject);
        }
        if self.bundle_url.trim().is_empty() {
            return Err(ManifestError::MissingField {
                field: BUNDLE_URL_FIELD,
            });
        }
        Ok(Self {
            bundle_url: to_http(&self.bundle_url),
            manifest: self.manifest,
        })
    }
}

/// Fill in the identity fields every surface relies on.
///
/// `manifestUrl` is always overwritten with the normalised URL; `id` is only
/// derived from it when the publisher did not provide one.
pub fn normalize_manifest(manifest_url: &str, mut manifest: Value) -> Result<Value, ManifestError> {
    let object = manifest.as_object_mut().ok_or(ManifestError::NotAnObject)?;
    object.insert("manifestUrl".into(), Value::String(manifest_url.to_owned()));
    let has_id = object
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        object.insert("id".into(), Value::String(experience_id(manifest_url)));
    }
    Ok(manifest)
}

fn experience_id(manifest_url: &str) -> String {
    let without_scheme = manifest_url
        .split_once("://")
        .map_or(manifest_url, |(_, rest)| rest);
    without_scheme.trim_matches('/').to_owned()
}

/// Options supplied when an experience is opened, consumed once by its surface.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperienceOptions {
    /// The URI exactly as requested, deep link included.
    pub uri: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ExperienceOptions {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Everything a surface needs to start running an experience.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadRequest {
    pub manifest_url: String,
    pub manifest: Value,
    pub bundle_url: String,
    /// Show the onboarding overlay. True at most once per device.
    pub load_nux: bool,
    pub options: Option<ExperienceOptions>,
}

impl LoadRequest {
    /// Wire payload handed to the hosted code.
    pub fn payload(&self) -> Value {
        json!({
            "manifestUrl": self.manifest_url,
            "manifest": self.manifest,
            "bundleUrl": self.bundle_url,
            "kernelOptions": { "loadNux": self.load_nux },
            "options": self.options,
        })
    }
}
