//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "HTTP manifest fetcher backed by reqwest."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;
use xphost_common::FetcherConfig;

use crate::collaborators::ManifestFetcher;
use crate::error::FetchError;
use crate::manifest::FetchedManifest;
use crate::uri::to_http;

const PLATFORM_HEADER: &str = "exponent-platform";
const MANIFEST_ACCEPT: &str = "application/expo+json,application/json";

/// Fetches manifests over HTTP(S). No caching and no retries.
#[derive(Debug, Clone)]
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));
        headers.insert(PLATFORM_HEADER, HeaderValue::from_static("android"));
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|err| FetchError::Network {
                url: String::new(),
                reason: format!("failed to build http client: {err}"),
            })?;
        Ok(Self { client })
    }

    /// Manifest URLs may use the `exp`/`exps` schemes; anything else must be HTTP(S).
    pub fn request_url(manifest_url: &str) -> Result<Url, FetchError> {
        let http_url = to_http(manifest_url);
        let parsed = Url::parse(&http_url).map_err(|err| FetchError::InvalidUrl {
            url: manifest_url.to_owned(),
            reason: err.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(FetchError::InvalidUrl {
                url: manifest_url.to_owned(),
                reason: format!("unsupported scheme `{other}`"),
            }),
        }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    #[instrument(skip(self), fields(manifest_url = %manifest_url))]
    async fn fetch(&self, manifest_url: &str) -> Result<FetchedManifest, FetchError> {
        let url = Self::request_url(manifest_url)?;
        debug!(request_url = %url, "fetching manifest");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Network {
                url: manifest_url.to_owned(),
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: manifest_url.to_owned(),
                status: status.as_u16(),
            });
        }
        let document: Value = response.json().await.map_err(|err| FetchError::Decode {
            url: manifest_url.to_owned(),
            reason: err.to_string(),
        })?;
        Ok(FetchedManifest::from_document(document)?)
    }
}
