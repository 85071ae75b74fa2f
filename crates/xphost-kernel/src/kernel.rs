//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Experience lifecycle kernel: control loop and handle."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
//! The kernel is a single tokio task that owns the experience registry, the
//! pending options and the readiness gate. Everything else talks to it
//! through a cloneable [`KernelHandle`], which turns each call into a
//! command on an unbounded queue. Manifest fetches run on their own tasks
//! and post their result back onto the same queue, so every state change
//! happens on the control task in arrival order.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xphost_common::{HostConfig, HostSection, KernelConfig};
use xphost_logging::{log_system_event, xp_error, xp_info, xp_warn, LogContext, SystemEventOutcome};

use crate::collaborators::{
    ManifestFetcher, PreferenceStore, SurfaceFactory, SurfaceHandle, TaskId, TaskManager,
};
use crate::error::{ActivationError, FetchError, KernelError, KernelResult};
use crate::error_log::ErrorLog;
use crate::gate::{ReadinessGate, WaitTicket};
use crate::manifest::{normalize_manifest, ExperienceOptions, FetchedManifest, LoadRequest};
use crate::preferences::{LOCAL_KERNEL_URL_KEY, NUX_HAS_FINISHED_FIRST_RUN_KEY, REFERRER_KEY};
use crate::registry::{ExperienceRegistry, ExperienceTask, PendingOptions};
use crate::uri::{normalize_manifest_url, with_hot_reload};

/// Readiness key guarding delivery into the optimistic surface.
pub const OPEN_SURFACE_KEY: &str = "open_experience_surface";

const EVENT_CAPACITY: usize = 256;
const LOCAL_BUNDLE_PATH: &str = "/exponent.bundle?dev=true&platform=android";

/// Sequence number of one open request, used to correlate phase events.
pub type RequestId = u64;

/// External collaborators the kernel drives.
#[derive(Clone)]
pub struct KernelDeps {
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub tasks: Arc<dyn TaskManager>,
    pub surfaces: Arc<dyn SurfaceFactory>,
    pub preferences: Arc<dyn PreferenceStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenPhase {
    Resolving,
    OptimisticPending,
    DirectActivate,
    Reconciled,
    Running,
    Failed,
}

impl OpenPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenPhase::Resolving => "resolving",
            OpenPhase::OptimisticPending => "optimistic_pending",
            OpenPhase::DirectActivate => "direct_activate",
            OpenPhase::Reconciled => "reconciled",
            OpenPhase::Running => "running",
            OpenPhase::Failed => "failed",
        }
    }
}

/// Observable lifecycle events, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    PhaseChanged {
        request: RequestId,
        manifest_url: String,
        phase: OpenPhase,
    },
    HomeOpened,
    /// Consoles attached to the previous experience should be cleared.
    ConsoleCleared {
        manifest_url: String,
    },
    Delivered {
        manifest_url: String,
        bundle_url: String,
        surface: SurfaceHandle,
        task_id: TaskId,
        load_nux: bool,
    },
    Activated {
        manifest_url: String,
        task_id: TaskId,
    },
    Failed {
        manifest_url: String,
        message: String,
        error_id: i32,
    },
    ReloadSkipped {
        manifest_url: String,
    },
    TaskReclaimed {
        task_id: TaskId,
    },
    HandoffAbandoned {
        manifest_url: String,
    },
}

/// Optimistic surfaces that reported ready, keyed by the manifest URL their
/// task was launched for. A surface is only ever handed the manifest it was
/// created for.
#[derive(Debug, Default)]
struct OptimisticHandoff {
    ready: IndexMap<String, (SurfaceHandle, TaskId)>,
}

impl OptimisticHandoff {
    fn offer(
        &mut self,
        manifest_url: String,
        surface: SurfaceHandle,
        task_id: TaskId,
    ) -> Option<(SurfaceHandle, TaskId)> {
        self.ready.insert(manifest_url, (surface, task_id))
    }

    fn is_ready_for(&self, manifest_url: &str) -> bool {
        self.ready.contains_key(manifest_url)
    }

    fn take_for(&mut self, manifest_url: &str) -> Option<(SurfaceHandle, TaskId)> {
        self.ready.shift_remove(manifest_url)
    }

    /// Drop every entry `keep` rejects.
    fn retain(&mut self, keep: impl Fn(SurfaceHandle, TaskId) -> bool) {
        self.ready
            .retain(|_, (surface, task_id)| keep(*surface, *task_id));
    }
}

/// Manifest waiting for its optimistic surface.
#[derive(Debug)]
struct Delivery {
    request: RequestId,
    manifest_url: String,
    manifest: Value,
    bundle_url: String,
    load_nux: bool,
}

#[derive(Debug)]
struct ReadyDelivery {
    delivery: Delivery,
    surface: SurfaceHandle,
    task_id: TaskId,
}

enum Command {
    Open {
        uri: String,
        options: Option<ExperienceOptions>,
        optimistic: bool,
    },
    ManifestFetched {
        request: RequestId,
        manifest_url: String,
        existing: Option<TaskId>,
        result: Result<FetchedManifest, FetchError>,
    },
    SurfaceReady {
        surface: SurfaceHandle,
        task_id: TaskId,
    },
    HandoffExpired {
        ticket: WaitTicket,
        manifest_url: String,
    },
    Reload {
        manifest_url: String,
    },
    KillActivityStack {
        surface: SurfaceHandle,
    },
    SurfaceDestroyed {
        surface: SurfaceHandle,
    },
    TaskDestroyed {
        task_id: TaskId,
    },
    PopOptions {
        manifest_url: String,
        reply: oneshot::Sender<Option<ExperienceOptions>>,
    },
    HasOptions {
        manifest_url: String,
        reply: oneshot::Sender<bool>,
    },
    BundleUrlForSurface {
        surface: SurfaceHandle,
        hot: bool,
        reply: oneshot::Sender<Option<String>>,
    },
    HomeBundleUrl {
        reply: oneshot::Sender<String>,
    },
    HomeLaunchOptions {
        reply: oneshot::Sender<Value>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ExperienceTask>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable entry point into a running kernel.
#[derive(Clone)]
pub struct KernelHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<KernelEvent>,
    errors: ErrorLog,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl KernelHandle {
    /// Open an experience, creating an optimistic surface right away when no
    /// existing task hosts it.
    pub fn open_experience(
        &self,
        uri: impl Into<String>,
        options: Option<ExperienceOptions>,
    ) -> KernelResult<()> {
        self.send(Command::Open {
            uri: uri.into(),
            options,
            optimistic: true,
        })
    }

    /// Open an experience without requesting a surface up front. The manifest
    /// is handed to whichever surface reports through
    /// [`set_optimistic_surface`](Self::set_optimistic_surface).
    pub fn open_experience_deferred(
        &self,
        uri: impl Into<String>,
        options: Option<ExperienceOptions>,
    ) -> KernelResult<()> {
        self.send(Command::Open {
            uri: uri.into(),
            options,
            optimistic: false,
        })
    }

    pub fn reload_experience(&self, manifest_url: impl Into<String>) -> KernelResult<()> {
        self.send(Command::Reload {
            manifest_url: manifest_url.into(),
        })
    }

    pub fn kill_activity_stack(&self, surface: SurfaceHandle) -> KernelResult<()> {
        self.send(Command::KillActivityStack { surface })
    }

    /// Called by a freshly created optimistic surface once it can accept a manifest.
    pub fn set_optimistic_surface(&self, surface: SurfaceHandle, task_id: TaskId) -> KernelResult<()> {
        self.send(Command::SurfaceReady { surface, task_id })
    }

    pub fn surface_destroyed(&self, surface: SurfaceHandle) -> KernelResult<()> {
        self.send(Command::SurfaceDestroyed { surface })
    }

    pub fn task_destroyed(&self, task_id: TaskId) -> KernelResult<()> {
        self.send(Command::TaskDestroyed { task_id })
    }

    pub async fn pop_options(&self, manifest_url: impl Into<String>) -> KernelResult<Option<ExperienceOptions>> {
        let manifest_url = manifest_url.into();
        self.request(|reply| Command::PopOptions { manifest_url, reply })
            .await
    }

    pub async fn has_options(&self, manifest_url: impl Into<String>) -> KernelResult<bool> {
        let manifest_url = manifest_url.into();
        self.request(|reply| Command::HasOptions { manifest_url, reply })
            .await
    }

    /// Bundle URL of the experience shown by `surface`, with hot reloading
    /// switched on when `hot` is set.
    pub async fn bundle_url_for_surface(
        &self,
        surface: SurfaceHandle,
        hot: bool,
    ) -> KernelResult<Option<String>> {
        self.request(|reply| Command::BundleUrlForSurface {
            surface,
            hot,
            reply,
        })
        .await
    }

    pub async fn home_bundle_url(&self) -> KernelResult<String> {
        self.request(|reply| Command::HomeBundleUrl { reply }).await
    }

    pub async fn home_launch_options(&self) -> KernelResult<Value> {
        self.request(|reply| Command::HomeLaunchOptions { reply }).await
    }

    pub async fn registry_snapshot(&self) -> KernelResult<Vec<ExperienceTask>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Resolves once every command sent before it has been processed.
    pub async fn flush(&self) -> KernelResult<()> {
        self.request(|reply| Command::Flush { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.events.subscribe()
    }

    pub fn errors(&self) -> ErrorLog {
        self.errors.clone()
    }

    /// Stop the control loop and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "kernel task ended abnormally");
            }
        }
    }

    fn send(&self, command: Command) -> KernelResult<()> {
        self.commands
            .send(command)
            .map_err(|_| KernelError::Stopped)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> KernelResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| KernelError::Stopped)
    }
}

/// Control-task state.
pub struct Kernel {
    host: HostSection,
    settings: KernelConfig,
    home_manifest_url: String,
    deps: KernelDeps,
    registry: ExperienceRegistry,
    pending_options: PendingOptions,
    gate: ReadinessGate,
    handoff: Arc<Mutex<OptimisticHandoff>>,
    ready: Arc<Mutex<Vec<ReadyDelivery>>>,
    errors: ErrorLog,
    events: broadcast::Sender<KernelEvent>,
    commands: mpsc::UnboundedSender<Command>,
    next_request: RequestId,
}

impl Kernel {
    /// Spawn the control loop on the current tokio runtime.
    pub fn start(config: &HostConfig, deps: KernelDeps) -> KernelHandle {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let errors = ErrorLog::new(config.errors.capacity, config.host.development);
        let kernel = Kernel {
            home_manifest_url: normalize_manifest_url(
                &config.host.home_url,
                config.host.deep_link_delimiter,
            ),
            host: config.host.clone(),
            settings: config.kernel.clone(),
            deps,
            registry: ExperienceRegistry::new(),
            pending_options: PendingOptions::default(),
            gate: ReadinessGate::new(),
            handoff: Arc::new(Mutex::new(OptimisticHandoff::default())),
            ready: Arc::new(Mutex::new(Vec::new())),
            errors: errors.clone(),
            events: events.clone(),
            commands: commands.clone(),
            next_request: 0,
        };
        let task = tokio::spawn(kernel.run(inbox));
        info!(home = %config.host.home_url, "experience kernel started");
        KernelHandle {
            commands,
            events,
            errors,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = inbox.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
        }
        debug!("experience kernel stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open {
                uri,
                options,
                optimistic,
            } => self.open(&uri, options, optimistic),
            Command::ManifestFetched {
                request,
                manifest_url,
                existing,
                result,
            } => self.manifest_fetched(request, &manifest_url, existing, result),
            Command::SurfaceReady { surface, task_id } => self.surface_ready(surface, task_id),
            Command::HandoffExpired {
                ticket,
                manifest_url,
            } => self.handoff_expired(ticket, &manifest_url),
            Command::Reload { manifest_url } => self.reload(&manifest_url),
            Command::KillActivityStack { surface } => self.kill_activity_stack(surface),
            Command::SurfaceDestroyed { surface } => self.surface_destroyed(surface),
            Command::TaskDestroyed { task_id } => self.task_destroyed(task_id),
            Command::PopOptions {
                manifest_url,
                reply,
            } => {
                let _ = reply.send(self.pending_options.pop(&manifest_url));
            }
            Command::HasOptions {
                manifest_url,
                reply,
            } => {
                let _ = reply.send(self.pending_options.contains(&manifest_url));
            }
            Command::BundleUrlForSurface {
                surface,
                hot,
                reply,
            } => {
                let _ = reply.send(self.bundle_url_for_surface(surface, hot));
            }
            Command::HomeBundleUrl { reply } => {
                let _ = reply.send(self.home_bundle_url());
            }
            Command::HomeLaunchOptions { reply } => {
                let _ = reply.send(self.home_launch_options());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn open(&mut self, uri: &str, options: Option<ExperienceOptions>, optimistic: bool) {
        let manifest_url = normalize_manifest_url(uri, self.host.deep_link_delimiter);
        match options {
            Some(options) => self.pending_options.set(&manifest_url, options),
            None => self.pending_options.clear(&manifest_url),
        }

        if manifest_url.is_empty() || manifest_url == self.home_manifest_url {
            self.open_home();
            return;
        }

        self.next_request += 1;
        let request = self.next_request;
        let ctx = LogContext::for_experience(&manifest_url);
        xp_info!(context = ctx, "opening experience (request {request}, optimistic: {optimistic})");
        self.phase(request, &manifest_url, OpenPhase::Resolving);
        self.emit(KernelEvent::ConsoleCleared {
            manifest_url: manifest_url.clone(),
        });
        self.registry.get_or_create(&manifest_url);

        let existing = self.find_task_for(&manifest_url);
        match existing {
            Some(task_id) => {
                debug!(%manifest_url, %task_id, "experience already has a task");
                self.phase(request, &manifest_url, OpenPhase::DirectActivate);
            }
            None => {
                if optimistic {
                    self.request_optimistic_surface(&manifest_url);
                }
                self.phase(request, &manifest_url, OpenPhase::OptimisticPending);
            }
        }
        self.spawn_fetch(request, manifest_url, existing);
    }

    fn open_home(&mut self) {
        let home_task = self
            .deps
            .tasks
            .list_tasks()
            .into_iter()
            .find(|task| task.is_home);
        let activated = match home_task {
            Some(task) => match self.deps.tasks.activate(task.task_id) {
                Ok(()) => true,
                Err(err) => {
                    warn!(task_id = %task.task_id, error = %err, "home task could not be activated");
                    false
                }
            },
            None => false,
        };
        if !activated {
            if let Err(err) = self.deps.surfaces.open_home() {
                warn!(error = %err, "home surface could not be opened");
            }
        }
        log_system_event(None, "experience.home", "home surface opened", SystemEventOutcome::Success);
        self.emit(KernelEvent::HomeOpened);
    }

    fn find_task_for(&self, manifest_url: &str) -> Option<TaskId> {
        self.deps
            .tasks
            .list_tasks()
            .into_iter()
            .find(|task| task.url_tag.as_deref() == Some(manifest_url))
            .map(|task| task.task_id)
    }

    fn request_optimistic_surface(&self, manifest_url: &str) {
        if let Err(err) = self.deps.surfaces.create_optimistic(manifest_url) {
            let ctx = LogContext::for_experience(manifest_url);
            xp_warn!(context = ctx, "optimistic surface request failed: {err}");
        }
    }

    fn spawn_fetch(&self, request: RequestId, manifest_url: String, existing: Option<TaskId>) {
        let fetcher = Arc::clone(&self.deps.fetcher);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&manifest_url).await;
            let _ = commands.send(Command::ManifestFetched {
                request,
                manifest_url,
                existing,
                result,
            });
        });
    }

    fn manifest_fetched(
        &mut self,
        request: RequestId,
        manifest_url: &str,
        existing: Option<TaskId>,
        result: Result<FetchedManifest, FetchError>,
    ) {
        let outcome = result
            .map_err(KernelError::from)
            .and_then(|fetched| self.reconcile(request, manifest_url, existing, fetched));
        match outcome {
            Ok(()) => self.kill_orphaned_tasks(),
            Err(err) => self.fail(request, manifest_url, err),
        }
    }

    fn reconcile(
        &mut self,
        request: RequestId,
        manifest_url: &str,
        existing: Option<TaskId>,
        fetched: FetchedManifest,
    ) -> KernelResult<()> {
        let FetchedManifest {
            manifest,
            bundle_url,
        } = fetched.validated()?;
        self.registry.get_or_create(manifest_url).bundle_url = Some(bundle_url.clone());
        let manifest = normalize_manifest(manifest_url, manifest)?;
        self.phase(request, manifest_url, OpenPhase::Reconciled);

        let first_run_finished = self.deps.preferences.get_bool(NUX_HAS_FINISHED_FIRST_RUN_KEY);
        let load_nux = self.host.show_onboarding && !first_run_finished;
        if load_nux {
            if let Err(err) = self
                .deps
                .preferences
                .set_bool(NUX_HAS_FINISHED_FIRST_RUN_KEY, true)
            {
                warn!(error = %err, "failed to persist first-run flag");
            }
        }

        if let Some(task_id) = existing {
            if self.activate_existing(request, manifest_url, task_id)? {
                return Ok(());
            }
        }

        self.await_optimistic_surface(Delivery {
            request,
            manifest_url: manifest_url.to_owned(),
            manifest,
            bundle_url,
            load_nux,
        })
    }

    /// Bring an existing task forward. Returns `false` when the task is gone
    /// and the open has to continue optimistically.
    fn activate_existing(
        &mut self,
        request: RequestId,
        manifest_url: &str,
        task_id: TaskId,
    ) -> KernelResult<bool> {
        let mut candidate = Some(task_id);
        let mut re_enumerated = false;
        while let Some(task_id) = candidate {
            match self.deps.tasks.activate(task_id) {
                Ok(()) => {
                    self.bind_activated(request, manifest_url, task_id);
                    return Ok(true);
                }
                Err(ActivationError::NotFound(_)) if !re_enumerated => {
                    re_enumerated = true;
                    candidate = self
                        .find_task_for(manifest_url)
                        .filter(|other| *other != task_id);
                    let ctx = LogContext::for_experience(manifest_url).with_task(task_id.0);
                    xp_warn!(context = ctx, "task vanished before activation; re-enumerating");
                }
                Err(ActivationError::NotFound(_)) => break,
                Err(err) => return Err(err.into()),
            }
        }
        self.request_optimistic_surface(manifest_url);
        Ok(false)
    }

    fn bind_activated(&mut self, request: RequestId, manifest_url: &str, task_id: TaskId) {
        let surfaces = Arc::clone(&self.deps.surfaces);
        if let Some(surface) = self
            .registry
            .find_by_os_task_id(task_id)
            .and_then(|entry| entry.live_surface(&*surfaces))
        {
            surfaces.check_options(surface);
        }
        self.registry.get_or_create(manifest_url).os_task_id = Some(task_id);

        let ctx = LogContext::for_experience(manifest_url).with_task(task_id.0);
        log_system_event(
            Some(&ctx),
            "experience.open",
            "existing task activated",
            SystemEventOutcome::Success,
        );
        self.emit(KernelEvent::Activated {
            manifest_url: manifest_url.to_owned(),
            task_id,
        });
        self.phase(request, manifest_url, OpenPhase::Running);
    }

    fn await_optimistic_surface(&mut self, delivery: Delivery) -> KernelResult<()> {
        let manifest_url = delivery.manifest_url.clone();
        let predicate = {
            let handoff = Arc::clone(&self.handoff);
            let manifest_url = manifest_url.clone();
            move || handoff.lock().is_ready_for(&manifest_url)
        };
        let action = {
            let handoff = Arc::clone(&self.handoff);
            let ready = Arc::clone(&self.ready);
            move || {
                let claimed = handoff.lock().take_for(&delivery.manifest_url);
                match claimed {
                    Some((surface, task_id)) => ready.lock().push(ReadyDelivery {
                        delivery,
                        surface,
                        task_id,
                    }),
                    None => warn!("optimistic handoff emptied before delivery"),
                }
            }
        };

        let ticket = self.gate.wait(OPEN_SURFACE_KEY, predicate, action)?;
        if self.gate.is_pending(&OPEN_SURFACE_KEY) {
            self.schedule_handoff_timeout(ticket, manifest_url);
        }
        self.drain_ready();
        Ok(())
    }

    fn schedule_handoff_timeout(&self, ticket: WaitTicket, manifest_url: String) {
        let timeout = self.settings.optimistic_timeout;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = commands.send(Command::HandoffExpired {
                ticket,
                manifest_url,
            });
        });
    }

    fn surface_ready(&mut self, surface: SurfaceHandle, task_id: TaskId) {
        let Some(manifest_url) = self
            .deps
            .tasks
            .list_tasks()
            .into_iter()
            .find(|task| task.task_id == task_id)
            .and_then(|task| task.url_tag)
        else {
            warn!(%surface, %task_id, "surface reported for a task with no experience; ignoring");
            return;
        };
        let manifest_url = normalize_manifest_url(&manifest_url, self.host.deep_link_delimiter);
        debug!(%surface, %task_id, %manifest_url, "optimistic surface reported ready");
        if let Some((replaced, _)) = self.handoff.lock().offer(manifest_url, surface, task_id) {
            debug!(%replaced, %surface, "optimistic surface replaced before delivery");
        }
        self.gate.notify(&OPEN_SURFACE_KEY);
        self.drain_ready();
    }

    fn drain_ready(&mut self) {
        let ready = std::mem::take(&mut *self.ready.lock());
        for item in ready {
            self.deliver(item);
        }
    }

    fn deliver(&mut self, ready: ReadyDelivery) {
        let ReadyDelivery {
            delivery,
            surface,
            task_id,
        } = ready;
        let Delivery {
            request,
            manifest_url,
            manifest,
            bundle_url,
            load_nux,
        } = delivery;

        let load = LoadRequest {
            manifest_url: manifest_url.clone(),
            manifest,
            bundle_url: bundle_url.clone(),
            load_nux,
            options: self.pending_options.get(&manifest_url).cloned(),
        };
        if let Err(err) = self.deps.surfaces.deliver(surface, load) {
            self.fail(request, &manifest_url, err.into());
            return;
        }
        self.pending_options.clear(&manifest_url);

        let entry = self.registry.get_or_create(&manifest_url);
        entry.os_task_id = Some(task_id);
        entry.surface = Some(surface);

        let ctx = LogContext::for_experience(&manifest_url)
            .with_task(task_id.0)
            .with_surface(surface.id);
        log_system_event(
            Some(&ctx),
            "experience.open",
            "manifest delivered",
            SystemEventOutcome::Success,
        );
        self.emit(KernelEvent::Delivered {
            manifest_url: manifest_url.clone(),
            bundle_url,
            surface,
            task_id,
            load_nux,
        });
        self.phase(request, &manifest_url, OpenPhase::Running);
    }

    fn handoff_expired(&mut self, ticket: WaitTicket, manifest_url: &str) {
        if !self.gate.cancel(&OPEN_SURFACE_KEY, ticket) {
            return;
        }
        let ctx = LogContext::for_experience(manifest_url);
        xp_warn!(
            context = ctx,
            "no surface reported within {:?}; abandoning handoff",
            self.settings.optimistic_timeout
        );
        log_system_event(
            Some(&ctx),
            "experience.open",
            "optimistic handoff abandoned",
            SystemEventOutcome::Skipped,
        );
        self.emit(KernelEvent::HandoffAbandoned {
            manifest_url: manifest_url.to_owned(),
        });
    }

    fn fail(&mut self, request: RequestId, manifest_url: &str, err: KernelError) {
        let reported = self.errors.handle_error(&err);
        let ctx = LogContext::for_experience(manifest_url).with_phase(OpenPhase::Failed.as_str());
        xp_error!(context = ctx, "experience open failed: {err}");
        self.emit(KernelEvent::Failed {
            manifest_url: manifest_url.to_owned(),
            message: reported.message,
            error_id: reported.id,
        });
        self.phase(request, manifest_url, OpenPhase::Failed);
    }

    /// Terminate the first launcher task left behind with nothing in it.
    fn kill_orphaned_tasks(&mut self) {
        let Some(orphan) = self
            .deps
            .tasks
            .list_tasks()
            .into_iter()
            .find(|task| task.is_orphaned_launcher())
        else {
            return;
        };
        match self.deps.tasks.terminate(orphan.task_id) {
            Ok(()) => {
                debug!(task_id = %orphan.task_id, "orphaned launcher task terminated");
                self.emit(KernelEvent::TaskReclaimed {
                    task_id: orphan.task_id,
                });
            }
            Err(err) => warn!(task_id = %orphan.task_id, error = %err, "could not terminate orphaned task"),
        }
    }

    fn reload(&mut self, manifest_url: &str) {
        let manifest_url = normalize_manifest_url(manifest_url, self.host.deep_link_delimiter);
        let surfaces = Arc::clone(&self.deps.surfaces);
        let live = self
            .registry
            .get(&manifest_url)
            .and_then(|entry| entry.live_surface(&*surfaces));

        if let Some(surface) = live {
            let ctx = LogContext::for_experience(&manifest_url).with_surface(surface.id);
            if surfaces.is_loading(surface) {
                log_system_event(
                    Some(&ctx),
                    "experience.reload",
                    "surface already loading",
                    SystemEventOutcome::Skipped,
                );
                self.emit(KernelEvent::ReloadSkipped { manifest_url });
                return;
            }
            surfaces.show_loading(surface);
            self.kill_activity_stack(surface);
            log_system_event(
                Some(&ctx),
                "experience.reload",
                "surface torn down for reload",
                SystemEventOutcome::Success,
            );
        }
        self.open(&manifest_url, None, true);
    }

    fn kill_activity_stack(&mut self, surface: SurfaceHandle) {
        let task_id = self.deps.surfaces.task_of(surface).or_else(|| {
            self.registry
                .find_by_surface(surface)
                .and_then(|entry| entry.os_task_id)
        });
        let Some(task_id) = task_id else {
            if let Some(url) = self
                .registry
                .find_by_surface(surface)
                .map(|entry| entry.manifest_url.clone())
            {
                self.registry.remove(&url);
            }
            warn!(%surface, "no task known for surface; nothing to terminate");
            return;
        };

        if let Some(url) = self
            .registry
            .find_by_os_task_id(task_id)
            .map(|entry| entry.manifest_url.clone())
        {
            self.registry.remove(&url);
        }
        if let Err(err) = self.deps.tasks.terminate(task_id) {
            warn!(%task_id, error = %err, "failed to terminate task");
        }
    }

    fn surface_destroyed(&mut self, surface: SurfaceHandle) {
        debug!(%surface, "surface destroyed");
        self.handoff
            .lock()
            .retain(|pending, _| pending != surface);
    }

    fn task_destroyed(&mut self, task_id: TaskId) {
        if let Some(url) = self
            .registry
            .find_by_os_task_id(task_id)
            .map(|entry| entry.manifest_url.clone())
        {
            debug!(%task_id, manifest_url = %url, "task destroyed; dropping registry entry");
            self.registry.remove(&url);
        }
        self.handoff
            .lock()
            .retain(|_, pending| pending != task_id);
    }

    fn bundle_url_for_surface(&self, surface: SurfaceHandle, hot: bool) -> Option<String> {
        let entry = self.registry.find_by_surface(surface).or_else(|| {
            self.deps
                .surfaces
                .task_of(surface)
                .and_then(|task_id| self.registry.find_by_os_task_id(task_id))
        })?;
        let bundle_url = entry.bundle_url.as_deref()?;
        Some(if hot {
            with_hot_reload(bundle_url)
        } else {
            bundle_url.to_owned()
        })
    }

    fn home_bundle_url(&self) -> String {
        if self.settings.use_remote_bundle {
            return self.settings.remote_kernel_url.clone();
        }
        let base = self
            .deps
            .preferences
            .get_string(LOCAL_KERNEL_URL_KEY)
            .unwrap_or_else(|| self.settings.default_local_kernel_url.clone());
        format!("{}{LOCAL_BUNDLE_PATH}", base.trim_end_matches('/'))
    }

    fn home_launch_options(&self) -> Value {
        let mut exp = Map::new();
        if let Some(referrer) = self.deps.preferences.get_string(REFERRER_KEY) {
            exp.insert("referrer".into(), Value::String(referrer));
        }
        exp.insert(
            "nuxHasFinishedFirstRun".into(),
            Value::Bool(self.deps.preferences.get_bool(NUX_HAS_FINISHED_FIRST_RUN_KEY)),
        );
        json!({ "exp": exp })
    }

    fn phase(&self, request: RequestId, manifest_url: &str, phase: OpenPhase) {
        debug!(request, %manifest_url, phase = phase.as_str(), "open phase");
        self.emit(KernelEvent::PhaseChanged {
            request,
            manifest_url: manifest_url.to_owned(),
            phase,
        });
    }

    fn emit(&self, event: KernelEvent) {
        let _ = self.events.send(event);
    }
}
