//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Error taxonomy for the experience kernel."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use thiserror::Error;

use crate::collaborators::{SurfaceHandle, TaskId};

/// Failure resolving a manifest URL into a manifest document.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("manifest url {url} is not a valid url: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("manifest request for {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("manifest at {url} is not valid json: {reason}")]
    Decode { url: String, reason: String },
    #[error(transparent)]
    Malformed(#[from] ManifestError),
}

/// Manifest JSON missing or mistyping a required field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest must be a json object")]
    NotAnObject,
    #[error("manifest field `{field}` is missing or not a non-empty string")]
    MissingField { field: &'static str },
}

/// Outcome of asking the task manager to act on a task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivationError {
    /// The task vanished between enumeration and activation.
    #[error("task {0} no longer exists")]
    NotFound(TaskId),
    #[error("task manager refused to act on task {task}: {reason}")]
    Unavailable { task: TaskId, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("surface {0} is no longer alive")]
    Gone(SurfaceHandle),
    #[error("surface factory rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Two unresolved registrations on the same key. This is a logic bug in the caller.
    #[error("a waiter is already registered for readiness key {key}")]
    DuplicateWaiter { key: String },
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors surfaced by the kernel and its handle.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("failed to fetch manifest: {0}")]
    Fetch(#[source] FetchError),
    #[error("malformed manifest: {0}")]
    MalformedManifest(#[source] ManifestError),
    #[error("could not activate existing task: {0}")]
    Activation(#[from] ActivationError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),
    #[error("kernel control loop has stopped")]
    Stopped,
}

impl From<FetchError> for KernelError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Malformed(inner) => KernelError::MalformedManifest(inner),
            other => KernelError::Fetch(other),
        }
    }
}

impl From<ManifestError> for KernelError {
    fn from(err: ManifestError) -> Self {
        KernelError::MalformedManifest(err)
    }
}

/// A specialized Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
