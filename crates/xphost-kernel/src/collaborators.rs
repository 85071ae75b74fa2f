//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Interfaces of the external collaborators driven by the kernel."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
//! The kernel never talks to the network, the OS task list, the UI toolkit or
//! persistent storage directly. Each of those is reached through one of the
//! traits below so hosts (and tests) can plug in their own implementation.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ActivationError, FetchError, PreferenceError, SurfaceError};
use crate::manifest::{FetchedManifest, LoadRequest};

/// Opaque identifier of an OS-level task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation-checked reference to a rendering surface.
///
/// The handle does not keep the surface alive. Whoever owns the surface bumps
/// the generation of its slot when the surface is destroyed, so a stale handle
/// fails [`SurfaceFactory::is_alive`] even if the slot id is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceHandle {
    pub id: u64,
    pub generation: u32,
}

impl SurfaceHandle {
    pub fn new(id: u64, generation: u32) -> Self {
        Self { id, generation }
    }
}

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.generation)
    }
}

/// One entry of the OS task list as seen by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    /// Manifest URL embedded in the task's launch record, if it hosts an experience.
    pub url_tag: Option<String>,
    pub activity_count: u32,
    /// The task was started through the main launcher entry point.
    pub launched_from_main: bool,
    /// The top-most activity of the task is the launcher trampoline.
    pub top_is_launcher: bool,
    /// The task hosts the home surface.
    pub is_home: bool,
}

impl TaskRecord {
    /// Task hosting a single experience surface.
    pub fn experience(task_id: TaskId, manifest_url: impl Into<String>) -> Self {
        Self {
            task_id,
            url_tag: Some(manifest_url.into()),
            activity_count: 1,
            launched_from_main: false,
            top_is_launcher: false,
            is_home: false,
        }
    }

    /// Task hosting the home surface.
    pub fn home(task_id: TaskId) -> Self {
        Self {
            task_id,
            url_tag: None,
            activity_count: 1,
            launched_from_main: true,
            top_is_launcher: false,
            is_home: true,
        }
    }

    /// Launcher task left behind with nothing useful in it.
    ///
    /// Either it has no activities at all and was started from the launcher,
    /// or its only activity is the launcher trampoline itself.
    pub fn is_orphaned_launcher(&self) -> bool {
        (self.activity_count == 0 && self.launched_from_main)
            || (self.activity_count == 1 && self.top_is_launcher)
    }
}

/// Resolves manifest URLs. Retry and caching policy belong to the implementation.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, manifest_url: &str) -> Result<FetchedManifest, FetchError>;
}

/// OS task enumeration and activation.
pub trait TaskManager: Send + Sync {
    fn list_tasks(&self) -> Vec<TaskRecord>;
    fn activate(&self, task: TaskId) -> Result<(), ActivationError>;
    fn terminate(&self, task: TaskId) -> Result<(), ActivationError>;
}

/// Creates and queries rendering surfaces.
///
/// `create_optimistic` is fire-and-forget: the created surface reports back
/// through `KernelHandle::set_optimistic_surface` once it has initialised.
pub trait SurfaceFactory: Send + Sync {
    fn create_optimistic(&self, manifest_url: &str) -> Result<(), SurfaceError>;
    fn open_home(&self) -> Result<(), SurfaceError>;
    fn is_alive(&self, surface: SurfaceHandle) -> bool;
    fn is_loading(&self, surface: SurfaceHandle) -> bool;
    fn show_loading(&self, surface: SurfaceHandle);
    /// Ask a surface brought to the front to pick up freshly queued options.
    fn check_options(&self, surface: SurfaceHandle);
    fn task_of(&self, surface: SurfaceHandle) -> Option<TaskId>;
    fn deliver(&self, surface: SurfaceHandle, request: LoadRequest) -> Result<(), SurfaceError>;
}

/// Small persistent key/value store.
pub trait PreferenceStore: Send + Sync {
    fn get_bool(&self, key: &str) -> bool;
    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError>;
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}
