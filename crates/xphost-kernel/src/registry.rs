//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Bookkeeping of experience tasks and pending open options."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::collaborators::{SurfaceFactory, SurfaceHandle, TaskId};
use crate::manifest::ExperienceOptions;

/// Kernel-side record of one experience, keyed by manifest URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperienceTask {
    pub manifest_url: String,
    pub os_task_id: Option<TaskId>,
    /// Not an owning reference. Check it with [`ExperienceTask::live_surface`].
    pub surface: Option<SurfaceHandle>,
    pub bundle_url: Option<String>,
}

impl ExperienceTask {
    pub fn new(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            os_task_id: None,
            surface: None,
            bundle_url: None,
        }
    }

    /// The bound surface, if the factory still reports it alive.
    pub fn live_surface(&self, surfaces: &dyn SurfaceFactory) -> Option<SurfaceHandle> {
        self.surface.filter(|handle| surfaces.is_alive(*handle))
    }
}

/// Manifest URL to [`ExperienceTask`], in insertion order.
#[derive(Debug, Default)]
pub struct ExperienceRegistry {
    entries: IndexMap<String, ExperienceTask>,
}

impl ExperienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, manifest_url: &str) -> &mut ExperienceTask {
        self.entries
            .entry(manifest_url.to_owned())
            .or_insert_with(|| ExperienceTask::new(manifest_url))
    }

    pub fn get(&self, manifest_url: &str) -> Option<&ExperienceTask> {
        self.entries.get(manifest_url)
    }

    pub fn get_mut(&mut self, manifest_url: &str) -> Option<&mut ExperienceTask> {
        self.entries.get_mut(manifest_url)
    }

    pub fn remove(&mut self, manifest_url: &str) -> Option<ExperienceTask> {
        self.entries.shift_remove(manifest_url)
    }

    pub fn find_by_os_task_id(&self, task: TaskId) -> Option<&ExperienceTask> {
        self.entries
            .values()
            .find(|entry| entry.os_task_id == Some(task))
    }

    pub fn find_by_surface(&self, surface: SurfaceHandle) -> Option<&ExperienceTask> {
        self.entries
            .values()
            .find(|entry| entry.surface == Some(surface))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ExperienceTask> {
        self.entries.values().cloned().collect()
    }
}

/// Options waiting to be picked up by the surface of each manifest URL.
#[derive(Debug, Default)]
pub struct PendingOptions {
    by_url: HashMap<String, ExperienceOptions>,
}

impl PendingOptions {
    pub fn set(&mut self, manifest_url: &str, options: ExperienceOptions) {
        self.by_url.insert(manifest_url.to_owned(), options);
    }

    pub fn clear(&mut self, manifest_url: &str) {
        self.by_url.remove(manifest_url);
    }

    pub fn get(&self, manifest_url: &str) -> Option<&ExperienceOptions> {
        self.by_url.get(manifest_url)
    }

    /// Take the options for `manifest_url`. A second call returns `None`.
    pub fn pop(&mut self, manifest_url: &str) -> Option<ExperienceOptions> {
        self.by_url.remove(manifest_url)
    }

    pub fn contains(&self, manifest_url: &str) -> bool {
        self.by_url.contains_key(manifest_url)
    }
}
