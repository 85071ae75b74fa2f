//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "test-support"
//! xp_type: "source"
//! xp_scope: "test"
//! xp_description: "Shared harness for kernel integration tests."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, Semaphore};
use xphost_common::HostConfig;
use xphost_kernel::{
    FetchError, FetchedManifest, Kernel, KernelDeps, KernelEvent, KernelHandle, ManifestError,
    ManifestFetcher, MemoryPreferenceStore, OpenPhase, SimulatedSurfaces, SimulatedTaskManager,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetcher answering every URL with `{url}/bundle` unless told otherwise.
#[derive(Default)]
pub struct ScriptedFetcher {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    malformed: Mutex<HashSet<String>>,
    latch: Mutex<Option<Arc<Semaphore>>>,
    held: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ScriptedFetcher {
    pub fn fail(&self, manifest_url: &str) {
        self.failing.lock().insert(manifest_url.to_owned());
    }

    pub fn malformed(&self, manifest_url: &str) {
        self.malformed.lock().insert(manifest_url.to_owned());
    }

    /// Hold every subsequent fetch until a permit is added to the returned semaphore.
    pub fn hold(&self) -> Arc<Semaphore> {
        let latch = Arc::new(Semaphore::new(0));
        *self.latch.lock() = Some(Arc::clone(&latch));
        latch
    }

    /// Hold fetches of `manifest_url` only; other URLs resolve normally.
    pub fn hold_url(&self, manifest_url: &str) -> Arc<Semaphore> {
        let latch = Arc::new(Semaphore::new(0));
        self.held
            .lock()
            .insert(manifest_url.to_owned(), Arc::clone(&latch));
        latch
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ManifestFetcher for ScriptedFetcher {
    async fn fetch(&self, manifest_url: &str) -> Result<FetchedManifest, FetchError> {
        self.calls.lock().push(manifest_url.to_owned());
        let held = self.held.lock().get(manifest_url).cloned();
        let latch = held.or_else(|| self.latch.lock().clone());
        if let Some(latch) = latch {
            latch.acquire().await.expect("latch closed").forget();
        }
        if self.failing.lock().contains(manifest_url) {
            return Err(FetchError::Network {
                url: manifest_url.to_owned(),
                reason: "connection refused".into(),
            });
        }
        if self.malformed.lock().contains(manifest_url) {
            return Err(ManifestError::MissingField { field: "bundleUrl" }.into());
        }
        Ok(FetchedManifest::from_document(json!({
            "name": manifest_url,
            "bundleUrl": format!("{manifest_url}/bundle"),
        }))?)
    }
}

pub fn test_config() -> HostConfig {
    let mut config = HostConfig::default();
    config.host.show_onboarding = true;
    config.host.development = false;
    config.kernel.optimistic_timeout = Duration::from_secs(5);
    config
}

pub struct Harness {
    pub kernel: KernelHandle,
    pub tasks: Arc<SimulatedTaskManager>,
    pub surfaces: Arc<SimulatedSurfaces>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub preferences: Arc<MemoryPreferenceStore>,
    events: broadcast::Receiver<KernelEvent>,
}

impl Harness {
    /// Surfaces only appear when the test materialises and reports them.
    pub fn manual(config: HostConfig) -> Self {
        xphost_logging::init();
        let tasks = Arc::new(SimulatedTaskManager::new());
        let surfaces = Arc::new(SimulatedSurfaces::new(Arc::clone(&tasks)));
        let fetcher = Arc::new(ScriptedFetcher::default());
        let preferences = Arc::new(MemoryPreferenceStore::new());
        let kernel = Kernel::start(
            &config,
            KernelDeps {
                fetcher: fetcher.clone(),
                tasks: tasks.clone(),
                surfaces: surfaces.clone(),
                preferences: preferences.clone(),
            },
        );
        let events = kernel.subscribe();
        Self {
            kernel,
            tasks,
            surfaces,
            fetcher,
            preferences,
            events,
        }
    }

    /// Optimistic surfaces report themselves as soon as they are requested.
    pub fn auto(config: HostConfig) -> Self {
        let harness = Self::manual(config);
        harness.surfaces.auto_attach(harness.kernel.clone());
        harness
    }

    pub async fn next_matching(&mut self, wanted: impl Fn(&KernelEvent) -> bool) -> KernelEvent {
        let events = &mut self.events;
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(event) if wanted(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("kernel event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for kernel event")
    }

    pub async fn phase(&mut self, manifest_url: &str, phase: OpenPhase) {
        self.next_matching(|event| {
            matches!(
                event,
                KernelEvent::PhaseChanged { manifest_url: url, phase: seen, .. }
                    if url == manifest_url && *seen == phase
            )
        })
        .await;
    }

    pub async fn delivered(&mut self, manifest_url: &str) -> KernelEvent {
        self.next_matching(|event| {
            matches!(event, KernelEvent::Delivered { manifest_url: url, .. } if url == manifest_url)
        })
        .await
    }
}
