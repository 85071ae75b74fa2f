//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Rolling buffer of errors reported by experiences and the kernel."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use std::backtrace::Backtrace;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::KernelError;

/// Id callers pass when they have none of their own.
pub const UNSET_ERROR_ID: i32 = -1;

const MAX_SYNTHESIZED_FRAMES: usize = 32;

/// Frames belonging to the reporting machinery itself.
const SKIPPED_FRAME_MARKERS: &[&str] = &["report_error", "handle_error", "std::backtrace", "Backtrace::"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub method_name: String,
    pub file: Option<String>,
    pub line_number: Option<u32>,
    pub column: Option<u32>,
}

/// One reported error. Entries are never modified after they are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceError {
    pub message: String,
    pub stack: Vec<StackFrame>,
    pub id: i32,
    pub is_fatal: bool,
    pub reported_at: DateTime<Utc>,
}

/// Shared, bounded error history. Clones refer to the same buffer.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    entries: Arc<Mutex<VecDeque<ExperienceError>>>,
    capacity: usize,
    development: bool,
}

impl ErrorLog {
    pub fn new(capacity: usize, development: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            development,
        }
    }

    /// Append an error, evicting the oldest entry when the buffer is full.
    ///
    /// Without a caller-supplied stack, development hosts capture the current
    /// backtrace instead. An unset id becomes a random negative number.
    pub fn report_error(
        &self,
        message: impl Into<String>,
        stack: Option<Vec<StackFrame>>,
        id: Option<i32>,
        is_fatal: bool,
    ) -> ExperienceError {
        let message = message.into();
        let stack = match stack {
            Some(frames) => frames,
            None if self.development => synthesize_stack(),
            None => Vec::new(),
        };
        let id = match id {
            Some(id) if id != UNSET_ERROR_ID => id,
            _ => -rand::thread_rng().gen_range(1..=i32::MAX),
        };
        let entry = ExperienceError {
            message,
            stack,
            id,
            is_fatal,
            reported_at: Utc::now(),
        };

        if is_fatal {
            error!(error_id = entry.id, message = %entry.message, "experience error reported");
        } else {
            warn!(error_id = entry.id, message = %entry.message, "experience error reported");
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        entry
    }

    /// Record a kernel failure as fatal with a generated id.
    pub fn handle_error(&self, err: &KernelError) -> ExperienceError {
        self.report_error(err.to_string(), None, None, true)
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<ExperienceError> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn synthesize_stack() -> Vec<StackFrame> {
    parse_backtrace(&Backtrace::force_capture().to_string())
        .into_iter()
        .filter(|frame| {
            !SKIPPED_FRAME_MARKERS
                .iter()
                .any(|marker| frame.method_name.contains(marker))
        })
        .take(MAX_SYNTHESIZED_FRAMES)
        .collect()
}

/// Parse the textual form of a captured backtrace.
///
/// Frames look like `  3: crate::module::function` optionally followed by a
/// line `at path/to/file.rs:10:5`.
fn parse_backtrace(rendered: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();
    for line in rendered.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let (file, line_number, column) = parse_location(location);
                frame.file = Some(file);
                frame.line_number = line_number;
                frame.column = column;
            }
            continue;
        }
        let Some((index, name)) = line.split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        frames.push(StackFrame {
            method_name: name.trim().to_owned(),
            file: None,
            line_number: None,
            column: None,
        });
    }
    frames
}

fn parse_location(location: &str) -> (String, Option<u32>, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next();
    let middle = parts.next();
    let rest = parts.next();
    match (rest, middle, last) {
        (Some(file), Some(line), Some(column)) => match (line.parse(), column.parse()) {
            (Ok(line), Ok(column)) => (file.to_owned(), Some(line), Some(column)),
            _ => (location.to_owned(), None, None),
        },
        (None, Some(file), Some(line)) => match line.parse() {
            Ok(line) => (file.to_owned(), Some(line), None),
            Err(_) => (location.to_owned(), None, None),
        },
        _ => (location.to_owned(), None, None),
    }
}
