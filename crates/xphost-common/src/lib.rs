//! ---
//! xp_section: "01-core-functionality"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Shared primitives and utilities for the experience host."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
//! Shared primitives for the xphost workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the kernel and the host daemon.

pub mod config;
pub mod logging;

pub use config::{
    ErrorLogConfig, FetcherConfig, HostConfig, HostSection, KernelConfig, LoadedHostConfig,
    LoggingConfig, PreferencesConfig,
};
pub use logging::{init_tracing, LogFormat};
