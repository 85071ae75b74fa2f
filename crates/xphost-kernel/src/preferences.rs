//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Preference store adapters: in-memory and JSON file."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::collaborators::PreferenceStore;
use crate::error::PreferenceError;

pub const NUX_HAS_FINISHED_FIRST_RUN_KEY: &str = "nux_has_finished_first_run";
pub const LOCAL_KERNEL_URL_KEY: &str = "local_kernel_url";
pub const REFERRER_KEY: &str = "referrer";

type PreferenceMap = BTreeMap<String, Value>;

fn read_bool(values: &PreferenceMap, key: &str) -> bool {
    values.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn read_string(values: &PreferenceMap, key: &str) -> Option<String> {
    values.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Process-local store, used by tests and hosts without persistent storage.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<PreferenceMap>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get_bool(&self, key: &str) -> bool {
        read_bool(&self.values.lock(), key)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.values.lock().insert(key.to_owned(), Value::Bool(value));
        Ok(())
    }

    fn get_string(&self, key: &str) -> Option<String> {
        read_string(&self.values.lock(), key)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .insert(key.to_owned(), Value::String(value.to_owned()));
        Ok(())
    }
}

/// Flat JSON object on disk, rewritten in full on every update.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: Mutex<PreferenceMap>,
}

impl FilePreferenceStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferenceError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => PreferenceMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "preference file absent; starting empty");
                PreferenceMap::new()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, key: &str, value: Value) -> Result<(), PreferenceError> {
        let mut values = self.values.lock();
        let mut next = values.clone();
        next.insert(key.to_owned(), value);
        persist(&self.path, &next).inspect_err(|err| {
            warn!(path = %self.path.display(), error = %err, "failed to persist preferences");
        })?;
        *values = next;
        Ok(())
    }
}

fn persist(path: &Path, values: &PreferenceMap) -> Result<(), PreferenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl PreferenceStore for FilePreferenceStore {
    fn get_bool(&self, key: &str) -> bool {
        read_bool(&self.values.lock(), key)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.update(key, Value::Bool(value))
    }

    fn get_string(&self, key: &str) -> Option<String> {
        read_string(&self.values.lock(), key)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.update(key, Value::String(value.to_owned()))
    }
}
