//! ---
//! xp_section: "03-logging"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Structured logging macros carrying experience context."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
#[doc(hidden)]
#[macro_export]
macro_rules! __xp_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx: &$crate::LogContext<'_> = &$ctx;
        $crate::tracing::event!(
            $level,
            manifest_url = ctx.manifest_url.unwrap_or(""),
            task_id = ctx.task_id.unwrap_or(-1),
            surface = ctx.surface.unwrap_or(0),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with experience context.
#[macro_export]
macro_rules! xp_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with experience context.
#[macro_export]
macro_rules! xp_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with experience context.
#[macro_export]
macro_rules! xp_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with experience context.
#[macro_export]
macro_rules! xp_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__xp_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
