//! ---
//! xp_section: "03-logging"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Structured logging adapters and lifecycle event helpers."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for tests and tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured context attached to every experience log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Normalised manifest URL of the experience.
    pub manifest_url: Option<&'a str>,
    /// OS task backing the experience, once known.
    pub task_id: Option<i64>,
    /// Raw surface identifier.
    pub surface: Option<u64>,
    /// Lifecycle phase of the open request.
    pub phase: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context scoped to one experience.
    pub fn for_experience(manifest_url: &'a str) -> Self {
        Self::new().with_manifest_url(manifest_url)
    }

    /// Attach a manifest URL.
    pub fn with_manifest_url(mut self, manifest_url: &'a str) -> Self {
        self.manifest_url = Some(manifest_url);
        self
    }

    /// Attach an OS task identifier.
    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Attach a surface identifier.
    pub fn with_surface(mut self, surface: u64) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Attach a lifecycle phase name.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// Outcome attached to lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The step completed.
    Success,
    /// The step was skipped without error.
    Skipped,
    /// The step failed.
    Fault,
}

impl SystemEventOutcome {
    /// Stable lowercase label used as the `outcome` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Skipped => "skipped",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a lifecycle event (`experience.open`, `experience.reload`, ...) with its outcome.
///
/// Faults are logged at `ERROR`, everything else at `INFO`.
pub fn log_system_event(
    context: Option<&LogContext<'_>>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        SystemEventOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            manifest_url = ctx.manifest_url.unwrap_or(""),
            task_id = ctx.task_id.unwrap_or(-1),
            phase = ctx.phase.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Success | SystemEventOutcome::Skipped => tracing::info!(
            event,
            outcome = outcome.as_str(),
            manifest_url = ctx.manifest_url.unwrap_or(""),
            task_id = ctx.task_id.unwrap_or(-1),
            phase = ctx.phase.unwrap_or(""),
            message = %message
        ),
    }
}
