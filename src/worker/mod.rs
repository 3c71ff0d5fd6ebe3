//! Render worker process management
//!
//! One warm `--preload` worker instance is shared by every chart that has
//! acquired it. The instance is started by the first `acquire`, stopped by
//! the last `release`, and restarted after an unexpected exit while it is
//! still in use. Jobs either go over the warm instance's stdin
//! ([`JobMode::Persistent`]) or run in their own short-lived `--fast`
//! process ([`JobMode::PerJob`]).

mod locate;
mod process;

pub use locate::{probe_runtime, WorkerCommand, WorkerLocator};

use crate::codec::{encode_job, EncodedJob};
use crate::config::{JobMode, WorkerConfig};
use crate::dispatcher::RenderBackend;
use crate::error::RenderError;
use crate::model::{RenderArtifact, RenderRequest};
use log::{debug, error, info, warn};
use process::{run_one_shot, BoxFuture, ExitHandler, ExitNotice, WarmProcess};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};

/// Lifecycle of the shared worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Starting,
    Ready,
    /// Exited unexpectedly or was recycled; a restart is pending or possible
    Degraded,
    Terminated,
}

/// Point-in-time view of the manager, for logs and the CLI
#[derive(Debug, Clone, Serialize)]
pub struct WorkerDiagnostics {
    pub health: WorkerHealth,
    pub mode: JobMode,
    pub ref_count: usize,
    pub pid: Option<u32>,
    pub generation: u64,
    pub command: Option<String>,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub crashes: u64,
    pub restarts: u64,
    /// Set while the manager refuses work until [`WorkerProcessManager::retry`]
    pub unavailable: Option<String>,
}

#[derive(Debug, Default)]
struct WorkerStats {
    jobs_succeeded: u64,
    jobs_failed: u64,
    crashes: u64,
    restarts: u64,
}

#[derive(Default)]
struct ManagerState {
    ref_count: usize,
    command: Option<WorkerCommand>,
    process: Option<WarmProcess>,
    generation: u64,
    /// Automatic restarts since the last successful job
    restart_streak: u32,
    /// The last process died on its own and has not been replaced yet
    crashed: bool,
    latched: Option<RenderError>,
}

struct Inner {
    config: WorkerConfig,
    locator: WorkerLocator,
    state: Mutex<ManagerState>,
    stats: parking_lot::Mutex<WorkerStats>,
    health: watch::Sender<WorkerHealth>,
}

/// Reference-counted owner of the render worker process
#[derive(Clone)]
pub struct WorkerProcessManager {
    inner: Arc<Inner>,
}

impl WorkerProcessManager {
    pub fn new(config: WorkerConfig) -> Self {
        let locator = WorkerLocator::new(&config);
        Self::with_locator(config, locator)
    }

    pub fn with_locator(config: WorkerConfig, locator: WorkerLocator) -> Self {
        let (health, _) = watch::channel(WorkerHealth::Terminated);
        Self {
            inner: Arc::new(Inner {
                config,
                locator,
                state: Mutex::new(ManagerState::default()),
                stats: parking_lot::Mutex::new(WorkerStats::default()),
                health,
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Register one user, starting the shared process for the first
    ///
    /// On failure the count is left unchanged.
    pub async fn acquire(&self) -> Result<(), RenderError> {
        let mut state = self.inner.state.lock().await;
        if let Some(err) = &state.latched {
            return Err(err.clone());
        }

        if state.process.is_none() {
            if let Err(err) = self.start_locked(&mut state).await {
                self.settle_health_after_failure(&state);
                return Err(err);
            }
        }

        state.ref_count += 1;
        debug!("Render worker acquired (users: {})", state.ref_count);
        Ok(())
    }

    /// Drop one user; the last one stops the process
    pub async fn release(&self) {
        let mut state = self.inner.state.lock().await;
        if state.ref_count == 0 {
            warn!("⚠️ Render worker released more often than acquired");
            return;
        }

        state.ref_count -= 1;
        debug!("Render worker released (users: {})", state.ref_count);

        if state.ref_count == 0 {
            if let Some(process) = state.process.take() {
                info!("🛑 Last user gone, stopping render worker");
                process.shutdown(self.inner.config.shutdown_grace()).await;
            }
            self.set_health(WorkerHealth::Terminated);
        }
    }

    /// Stop the process regardless of outstanding users
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.ref_count = 0;
        if let Some(process) = state.process.take() {
            info!("🛑 Shutting down render worker");
            process.shutdown(self.inner.config.shutdown_grace()).await;
        }
        self.set_health(WorkerHealth::Terminated);
    }

    /// Clear an unavailable latch and try to bring the process back
    pub async fn retry(&self) -> Result<(), RenderError> {
        let mut state = self.inner.state.lock().await;
        state.latched = None;
        state.restart_streak = 0;
        // Search again, the environment may have been fixed
        state.command = None;

        if state.ref_count > 0 && state.process.is_none() {
            info!("🔄 Retrying render worker startup");
            if let Err(err) = self.start_locked(&mut state).await {
                self.settle_health_after_failure(&state);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Execute one encoded job and return its artifact or typed failure
    pub async fn run_job(&self, job: &EncodedJob) -> Result<RenderArtifact, RenderError> {
        let result = self.execute(job).await;

        match &result {
            Ok(artifact) => {
                self.inner.stats.lock().jobs_succeeded += 1;
                self.inner.state.lock().await.restart_streak = 0;
                debug!("Job {} rendered to {}", job.sequence, artifact.path.display());
            }
            Err(err) => {
                self.inner.stats.lock().jobs_failed += 1;
                warn!("❌ Job {} for '{}' failed: {}", job.sequence, job.element, err);
            }
        }
        result
    }

    async fn execute(&self, job: &EncodedJob) -> Result<RenderArtifact, RenderError> {
        let timeout = self.inner.config.job_timeout();

        match self.inner.config.mode {
            JobMode::PerJob => {
                let command = {
                    let state = self.inner.state.lock().await;
                    Self::check_usable(&state)?;
                    state
                        .command
                        .clone()
                        .ok_or_else(|| RenderError::unavailable("render worker not located"))?
                };
                debug!("Running job {} for '{}' in a one-shot worker", job.sequence, job.element);
                run_one_shot(&command, job, timeout).await
            }
            JobMode::Persistent => {
                let (generation, channel) = {
                    let mut state = self.inner.state.lock().await;
                    Self::check_usable(&state)?;
                    if state.process.is_none() {
                        let started = if state.crashed {
                            self.restart_locked(&mut state).await
                        } else {
                            self.start_locked(&mut state).await
                        };
                        if let Err(err) = started {
                            if state.latched.is_none() {
                                self.settle_health_after_failure(&state);
                            }
                            return Err(err);
                        }
                    }
                    match &state.process {
                        Some(process) => (process.generation, process.channel.clone()),
                        None => return Err(RenderError::unavailable("render worker not running")),
                    }
                };

                let mut channel = channel.lock().await;
                debug!("Sending job {} for '{}' to the warm worker", job.sequence, job.element);
                let result = channel.exchange(job, timeout).await;
                drop(channel);

                if matches!(result, Err(RenderError::RenderTimeout { .. })) {
                    self.recycle(generation).await;
                }
                result
            }
        }
    }

    pub async fn diagnostics(&self) -> WorkerDiagnostics {
        let state = self.inner.state.lock().await;
        let stats = self.inner.stats.lock();
        WorkerDiagnostics {
            health: *self.inner.health.borrow(),
            mode: self.inner.config.mode,
            ref_count: state.ref_count,
            pid: state.process.as_ref().and_then(|p| p.pid),
            generation: state.generation,
            command: state.command.as_ref().map(WorkerCommand::display),
            jobs_succeeded: stats.jobs_succeeded,
            jobs_failed: stats.jobs_failed,
            crashes: stats.crashes,
            restarts: stats.restarts,
            unavailable: state.latched.as_ref().map(ToString::to_string),
        }
    }

    pub fn health(&self) -> WorkerHealth {
        *self.inner.health.borrow()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<WorkerHealth> {
        self.inner.health.subscribe()
    }

    fn check_usable(state: &ManagerState) -> Result<(), RenderError> {
        if let Some(err) = &state.latched {
            return Err(err.clone());
        }
        if state.ref_count == 0 {
            return Err(RenderError::unavailable("render worker has not been acquired"));
        }
        Ok(())
    }

    async fn start_locked(&self, state: &mut ManagerState) -> Result<(), RenderError> {
        self.set_health(WorkerHealth::Starting);

        let command = match &state.command {
            Some(command) => command.clone(),
            None => {
                let command = self.inner.locator.locate().await?;
                state.command = Some(command.clone());
                command
            }
        };

        state.generation += 1;
        info!(
            "🚀 Starting render worker: {} --preload",
            command.display()
        );
        let process = WarmProcess::spawn(
            &command,
            &self.inner.config,
            state.generation,
            self.exit_handler(),
        )
        .await?;

        state.process = Some(process);
        state.crashed = false;
        self.set_health(WorkerHealth::Ready);
        Ok(())
    }

    /// Counted restart after a crash; latches unavailable once the budget is spent
    async fn restart_locked(&self, state: &mut ManagerState) -> Result<(), RenderError> {
        let max_restarts = self.inner.config.max_restarts;
        if state.restart_streak >= max_restarts {
            error!(
                "❌ Render worker still failing after {} restart(s), marking it unavailable",
                max_restarts
            );
            let err = RenderError::unavailable(format!(
                "worker kept exiting after {} restart(s)",
                max_restarts
            ));
            state.latched = Some(err.clone());
            self.set_health(WorkerHealth::Terminated);
            return Err(err);
        }

        state.restart_streak += 1;
        self.inner.stats.lock().restarts += 1;
        info!(
            "🔄 Restarting render worker (attempt {}/{})",
            state.restart_streak, max_restarts
        );
        self.start_locked(state).await
    }

    fn settle_health_after_failure(&self, state: &ManagerState) {
        if state.ref_count > 0 {
            self.set_health(WorkerHealth::Degraded);
        } else {
            self.set_health(WorkerHealth::Terminated);
        }
    }

    fn exit_handler(&self) -> ExitHandler {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Box::new(move |notice: ExitNotice| -> BoxFuture<()> {
            Box::pin(async move {
                if let Some(inner) = inner.upgrade() {
                    WorkerProcessManager { inner }.handle_exit(notice).await;
                }
            })
        })
    }

    async fn handle_exit(&self, notice: ExitNotice) {
        {
            let mut state = self.inner.state.lock().await;
            let current = state
                .process
                .as_ref()
                .map_or(false, |p| p.generation == notice.generation);
            if !current {
                return;
            }
            state.process = None;
            state.crashed = true;
            self.inner.stats.lock().crashes += 1;

            match notice.status {
                Some(status) => warn!("💥 Render worker exited unexpectedly: {}", status),
                None => warn!("💥 Render worker exited unexpectedly"),
            }

            if state.ref_count == 0 {
                self.set_health(WorkerHealth::Terminated);
                return;
            }
            self.set_health(WorkerHealth::Degraded);
        }

        self.restart_after_crash().await;
    }

    async fn restart_after_crash(&self) {
        loop {
            tokio::time::sleep(self.inner.config.restart_backoff()).await;

            let mut state = self.inner.state.lock().await;
            if state.ref_count == 0 || state.process.is_some() || state.latched.is_some() {
                return;
            }

            match self.restart_locked(&mut state).await {
                Ok(()) => return,
                Err(_) if state.latched.is_some() => return,
                Err(err) => {
                    warn!("⚠️ Render worker restart failed: {}", err);
                    self.set_health(WorkerHealth::Degraded);
                }
            }
        }
    }

    /// Replace a warm process whose protocol state is unknown after a timeout
    async fn recycle(&self, generation: u64) {
        let mut state = self.inner.state.lock().await;
        let current = state
            .process
            .as_ref()
            .map_or(false, |p| p.generation == generation);
        if !current {
            return;
        }
        if let Some(process) = state.process.take() {
            warn!("⏳ Recycling render worker after a timed out job");
            process.shutdown(self.inner.config.shutdown_grace()).await;
        }
        self.set_health(WorkerHealth::Degraded);
    }

    fn set_health(&self, health: WorkerHealth) {
        self.inner.health.send_if_modified(|current| {
            if *current == health {
                false
            } else {
                debug!("Render worker health: {:?} -> {:?}", current, health);
                *current = health;
                true
            }
        });
    }
}

impl RenderBackend for WorkerProcessManager {
    fn render(
        &self,
        request: RenderRequest,
    ) -> impl Future<Output = Result<RenderArtifact, RenderError>> + Send {
        let manager = self.clone();
        async move {
            let job = encode_job(&request)?;
            manager.run_job(&job).await
        }
    }
}
