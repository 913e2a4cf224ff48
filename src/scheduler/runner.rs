//! The progress-tracking scheduler.
//!
//! [`Scheduler`] owns the tracker registry and the resume list, starts a
//! tracker per accepted task, and reacts to host events. It is cheap to
//! clone; every clone drives the same set of trackers.

use crate::client::RemoteTaskClient;
use crate::config::SchedulerConfig;
use crate::error::{Result, TrackerError};
use crate::host::HostEvent;
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::completion::{CancelReason, CompletionDetector, Terminal, TrackerEvent};
use crate::scheduler::registry::{
    self, SharedRegistry, TaskRegistry, TrackerSnapshot, TrackerState, TrackerStatus,
};
use crate::scheduler::resume::{
    self, ResumeList, ResumeStore, ResumptionManager, SharedResumeStore,
};
use crate::scheduler::retry::retry_fixed;
use crate::scheduler::tasks::Task;
use crate::tracker::{self, TrackerDeps, TrackerTimings};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the tracker event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Background scheduler tracking many tasks concurrently.
#[derive(Clone)]
pub struct Scheduler {
    client: Arc<dyn RemoteTaskClient>,
    clock: Arc<dyn Clock>,
    registry: SharedRegistry,
    resume: SharedResumeStore,
    events: broadcast::Sender<TrackerEvent>,
    timings: TrackerTimings,
    auto_track_on_enroll: bool,
    enabled: Arc<AtomicBool>,
    resumed: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler with an in-memory resume list and the system clock.
    ///
    /// # Errors
    ///
    /// [`TrackerError::Config`] if `config` fails validation.
    pub fn new(config: &SchedulerConfig, client: Arc<dyn RemoteTaskClient>) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            client,
            clock: Arc::new(SystemClock),
            registry: TaskRegistry::shared(),
            resume: ResumeStore::in_memory().shared(),
            events,
            timings: TrackerTimings::from_config(config),
            auto_track_on_enroll: config.tracker.auto_track_on_enroll,
            enabled: Arc::new(AtomicBool::new(config.tracker.enabled)),
            resumed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a scheduler whose resume list lives at the configured path.
    pub fn from_config(
        config: &SchedulerConfig,
        client: Arc<dyn RemoteTaskClient>,
    ) -> Result<Self> {
        let store = ResumeStore::open_or_empty(config.storage.resolved_resume_path());
        Ok(Self::new(config, client)?.with_resume_store(store))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_resume_store(mut self, store: ResumeStore) -> Self {
        self.resume = store.shared();
        self
    }

    /// Subscribe to tracker events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub fn is_tracking(&self, task_id: &str) -> bool {
        registry::lock(&self.registry).has(task_id)
    }

    pub fn snapshot(&self, task_id: &str) -> Option<TrackerSnapshot> {
        registry::lock(&self.registry).get(task_id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        registry::lock(&self.registry).ids()
    }

    /// Current contents of the resume list.
    pub fn persisted(&self) -> ResumeList {
        resume::lock_store(&self.resume).list().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn detector(&self) -> CompletionDetector {
        CompletionDetector::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.resume),
            self.events.clone(),
        )
    }

    fn deps(&self) -> TrackerDeps {
        TrackerDeps {
            client: Arc::clone(&self.client),
            clock: Arc::clone(&self.clock),
            registry: Arc::clone(&self.registry),
            detector: self.detector(),
            events: self.events.clone(),
            timings: self.timings,
        }
    }

    /// Start tracking `task`.
    ///
    /// The registry slot is reserved before anything is awaited, so
    /// concurrent starts for the same id cannot both succeed.
    ///
    /// # Errors
    ///
    /// [`TrackerError::AlreadyTracking`] if a tracker exists for the id,
    /// [`TrackerError::Disabled`] if tracking is switched off.
    pub fn start_tracking(&self, task: Task) -> Result<()> {
        if !self.is_enabled() {
            return Err(TrackerError::Disabled);
        }

        let state = TrackerState::new(&task, self.clock.now());
        let cancel = state.cancel_token();
        {
            let mut registry = registry::lock(&self.registry);
            if !registry.set(state) {
                return Err(TrackerError::AlreadyTracking(task.id));
            }
            registry.set_status(&task.id, TrackerStatus::WaitingForEnrollment);
        }
        resume::lock_store(&self.resume).add(&task.id, task.kind);

        let task_id = task.id.clone();
        debug!(task_id = %task_id, kind = %task.kind, "starting tracker");
        let deps = self.deps();
        let driver = tokio::spawn(tracker::drive(task, deps.clone(), cancel.clone()));
        let abort = driver.abort_handle();
        tokio::spawn(tracker::supervise(task_id.clone(), driver, deps, cancel));
        if !registry::lock(&self.registry).attach_progress_timer(&task_id, abort) {
            debug!(task_id = %task_id, "tracker finished before its timer was attached");
        }
        Ok(())
    }

    /// Enroll `task` remotely, then start tracking it.
    pub async fn accept(&self, task: Task) -> Result<()> {
        if !self.is_enabled() {
            return Err(TrackerError::Disabled);
        }
        if self.is_tracking(&task.id) {
            return Err(TrackerError::AlreadyTracking(task.id));
        }

        let client = self.client.as_ref();
        let task_id = task.id.as_str();
        retry_fixed(self.timings.retry, task_id, "enrollment", move || {
            client.enroll(task_id)
        })
        .await?;
        info!(task_id, "task accepted");
        self.start_tracking(task)
    }

    /// Stop the tracker for `task_id`. Returns `false` if none was running.
    pub fn cancel(&self, task_id: &str, reason: CancelReason) -> bool {
        self.detector().finish(task_id, Terminal::Cancelled(reason))
    }

    /// Stop every tracker. Returns how many were stopped.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let ids = self.active_ids();
        let detector = self.detector();
        ids.iter()
            .filter(|id| detector.finish(id, Terminal::Cancelled(reason)))
            .count()
    }

    /// Re-attach trackers for `persisted` and rewrite the resume list to
    /// exactly the trackers active afterwards.
    pub async fn resume_all(&self, persisted: ResumeList) -> ResumeList {
        let manager = ResumptionManager::new(Arc::clone(&self.client), Arc::clone(&self.clock));
        let tasks = manager.collect(&persisted).await;

        for task in tasks {
            let task_id = task.id.clone();
            match self.start_tracking(task) {
                Ok(()) => info!(task_id = %task_id, "resumed tracker"),
                Err(TrackerError::AlreadyTracking(_)) => {}
                Err(e) => debug!(task_id = %task_id, error = %e, "not resuming"),
            }
        }

        let snapshots = registry::lock(&self.registry).snapshots();
        let mut active = ResumeList::default();
        for snapshot in snapshots {
            active.insert(&snapshot.task_id, snapshot.kind);
        }
        resume::lock_store(&self.resume).replace(active.clone());
        info!(persisted = persisted.len(), active = active.len(), "resumption sweep done");
        active
    }

    /// Run the resumption sweep against the stored list, once per scheduler.
    ///
    /// Returns `None` if the sweep already ran.
    pub async fn resume_from_store(&self) -> Option<ResumeList> {
        if self.resumed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let persisted = self.persisted();
        Some(self.resume_all(persisted).await)
    }

    /// Switch tracking on or off. Disabling stops every tracker and clears
    /// the resume list.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was == enabled {
            return;
        }
        info!(enabled, "progress tracking toggled");
        if !enabled {
            self.cancel_all(CancelReason::Disabled);
            resume::lock_store(&self.resume).clear();
        }
    }

    /// React to a host event.
    pub async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::TaskListRefreshed { tasks } => {
                let detector = self.detector();
                for task in tasks.iter().filter(|task| task.is_completed()) {
                    let progress = task.progress.unwrap_or(task.target.raw);
                    if detector.finish(&task.id, Terminal::Completed { progress }) {
                        debug!(task_id = %task.id, "completed remotely");
                    }
                }
                if self.is_enabled() {
                    self.resume_from_store().await;
                }
            }
            HostEvent::TaskEnrolled { task } => {
                if !self.auto_track_on_enroll || task.is_completed() {
                    return;
                }
                match self.start_tracking(task) {
                    Ok(()) | Err(TrackerError::AlreadyTracking(_)) => {}
                    Err(e) => debug!(error = %e, "ignoring enrollment"),
                }
            }
            HostEvent::ApplicationExited { application_id } => {
                let ids = registry::lock(&self.registry).ids_for_application(&application_id);
                for id in ids {
                    self.cancel(&id, CancelReason::ActivityStopped);
                }
            }
            HostEvent::ShuttingDown => {
                let stopped = self.cancel_all(CancelReason::Shutdown);
                if stopped > 0 {
                    warn!(stopped, "stopped trackers for shutdown; they resume on next start");
                }
            }
        }
    }
}
