//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Experience lifecycle kernel crate root."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
//! Launches and tracks remotely defined experiences. An open request resolves
//! the manifest in the background while an optimistic surface spins up, and
//! the two meet in a [`ReadinessGate`] once both are available.

pub mod collaborators;
pub mod error;
pub mod error_log;
pub mod fetcher;
pub mod gate;
pub mod kernel;
pub mod manifest;
pub mod preferences;
pub mod registry;
pub mod sim;
pub mod uri;

pub use collaborators::{
    ManifestFetcher, PreferenceStore, SurfaceFactory, SurfaceHandle, TaskId, TaskManager,
    TaskRecord,
};
pub use error::{
    ActivationError, FetchError, GateError, KernelError, KernelResult, ManifestError,
    PreferenceError, SurfaceError,
};
pub use error_log::{ErrorLog, ExperienceError, StackFrame};
pub use fetcher::HttpManifestFetcher;
pub use gate::{ReadinessGate, WaitTicket};
pub use kernel::{Kernel, KernelDeps, KernelEvent, KernelHandle, OpenPhase, RequestId, OPEN_SURFACE_KEY};
pub use manifest::{ExperienceOptions, FetchedManifest, LoadRequest};
pub use preferences::{FilePreferenceStore, MemoryPreferenceStore};
pub use registry::{ExperienceRegistry, ExperienceTask, PendingOptions};
pub use sim::{SimulatedSurfaces, SimulatedTaskManager};
