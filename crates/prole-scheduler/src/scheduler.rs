//! In-memory registry of builds running on this worker.

use prole_config::DEFAULT_RETAINED_BUILDS;
use prole_core::{Build, BuildEvent, BuildId, BuildOutcome, BuildStatus, Error, EventHub, Result};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::builder::BuildOrchestrator;

/// Where a scheduled build is in its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Running,
    Finished {
        status: BuildStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RunState {
    fn finished(outcome: &BuildOutcome) -> Self {
        RunState::Finished {
            status: outcome.status(),
            error: outcome.error().map(|e| e.to_string()),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunState::Finished { .. })
    }
}

struct BuildRecord {
    hub: Arc<EventHub<BuildEvent>>,
    state: watch::Receiver<RunState>,
}

#[derive(Default)]
struct Registry {
    builds: HashMap<BuildId, BuildRecord>,
    /// Finished builds, oldest first.
    finished: VecDeque<BuildId>,
}

impl Registry {
    /// Record `id` as finished, forgetting the oldest finished builds beyond `retain`.
    fn finish(&mut self, id: BuildId, retain: usize) {
        self.finished.push_back(id);
        while self.finished.len() > retain {
            if let Some(evicted) = self.finished.pop_front() {
                self.builds.remove(&evicted);
                debug!(build = %evicted, "Evicted finished build");
            }
        }
    }
}

/// Runs builds on background tasks, one event hub per build.
///
/// Running builds are always tracked. Only the most recent finished builds
/// are kept; older ones are forgotten.
pub struct Scheduler {
    orchestrator: Arc<BuildOrchestrator>,
    registry: Arc<RwLock<Registry>>,
    retain: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<BuildOrchestrator>) -> Self {
        Self {
            orchestrator,
            registry: Arc::new(RwLock::new(Registry::default())),
            retain: DEFAULT_RETAINED_BUILDS,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Keep at most `retain` finished builds.
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain = retain;
        self
    }

    /// Start running `build` in the background.
    ///
    /// Fails if a build with the same guid was already started here.
    pub fn start(&self, build: Build) -> Result<BuildId> {
        let id = build.guid;
        let hub = Arc::new(EventHub::new());
        let (state_tx, state_rx) = watch::channel(RunState::Running);

        match self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .builds
            .entry(id)
        {
            Entry::Occupied(_) => {
                return Err(Error::InvalidInput(format!("build {} already exists", id)));
            }
            Entry::Vacant(entry) => {
                entry.insert(BuildRecord {
                    hub: hub.clone(),
                    state: state_rx,
                });
            }
        }

        let orchestrator = self.orchestrator.clone();
        let registry = self.registry.clone();
        let retain = self.retain;
        let handle = tokio::spawn(async move {
            let outcome = orchestrator.build(&build, hub).await;
            state_tx.send_replace(RunState::finished(&outcome));
            registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .finish(id, retain);
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);

        info!(build = %id, "Build scheduled");
        Ok(id)
    }

    /// The event hub of a build started here.
    pub fn hub(&self, id: BuildId) -> Option<Arc<EventHub<BuildEvent>>> {
        self.read().builds.get(&id).map(|record| record.hub.clone())
    }

    pub fn status(&self, id: BuildId) -> Option<RunState> {
        self.read().builds.get(&id).map(|record| record.state.borrow().clone())
    }

    /// Wait for a build to finish, returning its final state.
    pub async fn wait(&self, id: BuildId) -> Option<RunState> {
        let mut state = self.read().builds.get(&id).map(|record| record.state.clone())?;
        if state.wait_for(RunState::is_finished).await.is_err() {
            warn!(build = %id, "Build task ended without recording an outcome");
        }
        let result = state.borrow().clone();
        Some(result)
    }

    /// Wait for every build started so far to finish.
    pub async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if !tasks.is_empty() {
            info!(builds = tasks.len(), "Draining in-flight builds");
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Build task failed");
            }
        }
    }

    /// Number of builds tracked here: running plus retained finished builds.
    pub fn len(&self) -> usize {
        self.read().builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }
}
