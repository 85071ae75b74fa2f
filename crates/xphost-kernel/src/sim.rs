//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "In-memory task manager and surface factory for hosts without an OS shell."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
//! In-memory stand-ins for the OS task list and the UI toolkit. The daemon
//! runs against them, and tests use their logs to see what the kernel asked for.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::collaborators::{SurfaceFactory, SurfaceHandle, TaskId, TaskManager, TaskRecord};
use crate::error::{ActivationError, SurfaceError};
use crate::kernel::KernelHandle;
use crate::manifest::LoadRequest;

#[derive(Debug, Default)]
struct TaskState {
    tasks: IndexMap<TaskId, TaskRecord>,
    next_id: i64,
    activations: Vec<TaskId>,
    terminations: Vec<TaskId>,
    /// Tasks that disappear the next time someone tries to activate them.
    vanishing: Vec<TaskId>,
}

/// Task list kept in memory, most recent task last.
#[derive(Debug)]
pub struct SimulatedTaskManager {
    state: Mutex<TaskState>,
}

impl Default for SimulatedTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTaskManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TaskState {
                next_id: 1,
                ..TaskState::default()
            }),
        }
    }

    /// Insert an arbitrary record, e.g. a pre-existing task or a launcher leftover.
    pub fn add_task(&self, record: TaskRecord) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(record.task_id.0 + 1);
        state.tasks.insert(record.task_id, record);
    }

    pub fn spawn_experience_task(&self, manifest_url: &str) -> TaskId {
        let mut state = self.state.lock();
        let task_id = TaskId(state.next_id);
        state.next_id += 1;
        state
            .tasks
            .insert(task_id, TaskRecord::experience(task_id, manifest_url));
        task_id
    }

    /// Drop a task as if the OS had destroyed it.
    pub fn remove(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().tasks.shift_remove(&task_id)
    }

    /// Keep `task_id` listed but fail its next activation with `NotFound`.
    pub fn vanish_on_activate(&self, task_id: TaskId) {
        self.state.lock().vanishing.push(task_id);
    }

    pub fn activations(&self) -> Vec<TaskId> {
        self.state.lock().activations.clone()
    }

    pub fn terminations(&self) -> Vec<TaskId> {
        self.state.lock().terminations.clone()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.state.lock().tasks.contains_key(&task_id)
    }
}

impl TaskManager for SimulatedTaskManager {
    fn list_tasks(&self) -> Vec<TaskRecord> {
        self.state.lock().tasks.values().cloned().collect()
    }

    fn activate(&self, task: TaskId) -> Result<(), ActivationError> {
        let mut state = self.state.lock();
        if let Some(position) = state.vanishing.iter().position(|id| *id == task) {
            state.vanishing.swap_remove(position);
            state.tasks.shift_remove(&task);
            return Err(ActivationError::NotFound(task));
        }
        if !state.tasks.contains_key(&task) {
            return Err(ActivationError::NotFound(task));
        }
        // front of the list is the back of the map
        if let Some(index) = state.tasks.get_index_of(&task) {
            let last = state.tasks.len() - 1;
            state.tasks.move_index(index, last);
        }
        state.activations.push(task);
        Ok(())
    }

    fn terminate(&self, task: TaskId) -> Result<(), ActivationError> {
        let mut state = self.state.lock();
        if state.tasks.shift_remove(&task).is_none() {
            return Err(ActivationError::NotFound(task));
        }
        state.terminations.push(task);
        Ok(())
    }
}

#[derive(Debug)]
struct SurfaceSlot {
    generation: u32,
    alive: bool,
    loading: bool,
    task_id: Option<TaskId>,
    manifest_url: Option<String>,
}

#[derive(Default)]
struct SurfaceState {
    slots: Vec<SurfaceSlot>,
    optimistic_requests: Vec<String>,
    home_opens: usize,
    delivered: Vec<(SurfaceHandle, LoadRequest)>,
    option_checks: Vec<SurfaceHandle>,
    loading_screens: Vec<SurfaceHandle>,
    attached: Option<KernelHandle>,
}

/// Surface factory whose surfaces live in reusable slots. Destroying a
/// surface bumps its slot generation so old handles stop resolving.
pub struct SimulatedSurfaces {
    tasks: Arc<SimulatedTaskManager>,
    state: Mutex<SurfaceState>,
}

impl SimulatedSurfaces {
    pub fn new(tasks: Arc<SimulatedTaskManager>) -> Self {
        Self {
            tasks,
            state: Mutex::new(SurfaceState::default()),
        }
    }

    /// Materialise surfaces requested through `create_optimistic` and report
    /// them to `kernel` straight away.
    pub fn auto_attach(&self, kernel: KernelHandle) {
        self.state.lock().attached = Some(kernel);
    }

    /// Create a live surface in its own new task.
    pub fn materialize(&self, manifest_url: &str) -> (SurfaceHandle, TaskId) {
        let task_id = self.tasks.spawn_experience_task(manifest_url);
        let mut state = self.state.lock();
        let reusable = state.slots.iter().position(|slot| !slot.alive);
        let handle = match reusable {
            Some(index) => {
                let slot = &mut state.slots[index];
                slot.alive = true;
                slot.loading = true;
                slot.task_id = Some(task_id);
                slot.manifest_url = Some(manifest_url.to_owned());
                SurfaceHandle::new(index as u64, slot.generation)
            }
            None => {
                state.slots.push(SurfaceSlot {
                    generation: 0,
                    alive: true,
                    loading: true,
                    task_id: Some(task_id),
                    manifest_url: Some(manifest_url.to_owned()),
                });
                SurfaceHandle::new((state.slots.len() - 1) as u64, 0)
            }
        };
        debug!(%handle, %task_id, manifest_url, "surface materialised");
        (handle, task_id)
    }

    /// Destroy a surface. Its handle fails liveness checks from now on.
    pub fn destroy(&self, handle: SurfaceHandle) -> bool {
        let mut state = self.state.lock();
        match Self::slot_mut(&mut state, handle) {
            Some(slot) => {
                slot.alive = false;
                slot.loading = false;
                slot.task_id = None;
                slot.manifest_url = None;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    pub fn set_loading(&self, handle: SurfaceHandle, loading: bool) {
        if let Some(slot) = Self::slot_mut(&mut self.state.lock(), handle) {
            slot.loading = loading;
        }
    }

    pub fn optimistic_requests(&self) -> Vec<String> {
        self.state.lock().optimistic_requests.clone()
    }

    pub fn home_opens(&self) -> usize {
        self.state.lock().home_opens
    }

    pub fn delivered(&self) -> Vec<(SurfaceHandle, LoadRequest)> {
        self.state.lock().delivered.clone()
    }

    pub fn option_checks(&self) -> Vec<SurfaceHandle> {
        self.state.lock().option_checks.clone()
    }

    pub fn loading_screens(&self) -> Vec<SurfaceHandle> {
        self.state.lock().loading_screens.clone()
    }

    fn slot(state: &SurfaceState, handle: SurfaceHandle) -> Option<&SurfaceSlot> {
        state
            .slots
            .get(usize::try_from(handle.id).ok()?)
            .filter(|slot| slot.alive && slot.generation == handle.generation)
    }

    fn slot_mut(state: &mut SurfaceState, handle: SurfaceHandle) -> Option<&mut SurfaceSlot> {
        state
            .slots
            .get_mut(usize::try_from(handle.id).ok()?)
            .filter(|slot| slot.alive && slot.generation == handle.generation)
    }
}

impl SurfaceFactory for SimulatedSurfaces {
    fn create_optimistic(&self, manifest_url: &str) -> Result<(), SurfaceError> {
        let attached = {
            let mut state = self.state.lock();
            state.optimistic_requests.push(manifest_url.to_owned());
            state.attached.clone()
        };
        if let Some(kernel) = attached {
            let (surface, task_id) = self.materialize(manifest_url);
            kernel
                .set_optimistic_surface(surface, task_id)
                .map_err(|err| SurfaceError::Rejected(err.to_string()))?;
        }
        Ok(())
    }

    fn open_home(&self) -> Result<(), SurfaceError> {
        self.state.lock().home_opens += 1;
        Ok(())
    }

    fn is_alive(&self, surface: SurfaceHandle) -> bool {
        Self::slot(&self.state.lock(), surface).is_some()
    }

    fn is_loading(&self, surface: SurfaceHandle) -> bool {
        Self::slot(&self.state.lock(), surface).is_some_and(|slot| slot.loading)
    }

    fn show_loading(&self, surface: SurfaceHandle) {
        let mut state = self.state.lock();
        if let Some(slot) = Self::slot_mut(&mut state, surface) {
            slot.loading = true;
            state.loading_screens.push(surface);
        }
    }

    fn check_options(&self, surface: SurfaceHandle) {
        self.state.lock().option_checks.push(surface);
    }

    fn task_of(&self, surface: SurfaceHandle) -> Option<TaskId> {
        Self::slot(&self.state.lock(), surface).and_then(|slot| slot.task_id)
    }

    fn deliver(&self, surface: SurfaceHandle, request: LoadRequest) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        let Some(slot) = Self::slot_mut(&mut state, surface) else {
            warn!(%surface, "load request for a dead surface");
            return Err(SurfaceError::Gone(surface));
        };
        slot.loading = false;
        state.delivered.push((surface, request));
        Ok(())
    }
}
