// Shared helpers for integration tests
//
// Fake render workers are small shell scripts written into a temporary
// directory. They follow the worker contract: `--preload` starts a warm
// instance, `<job.json> --fast` renders one job, and success is reported
// with a `Chart generated: <path>` line.

#![allow(dead_code)]

use sensorchart::config::{JobMode, PipelineConfig, WorkerConfig};
use sensorchart::worker::{WorkerLocator, WorkerProcessManager};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

/// Idles when warm, renders a job file containing the "temp" series
pub const PER_JOB_WORKER: &str = r#"#!/bin/sh
if [ "$1" = "--preload" ]; then
    while read line; do :; done
    exit 0
fi
echo "Loading data from $1"
if grep -q '"name": "temp"' "$1"; then
    echo "Chart generated: /tmp/x.png"
else
    echo "Error generating chart: no temp series"
    exit 1
fi
"#;

/// Never answers a job
pub const HANGING_WORKER: &str = r#"#!/bin/sh
if [ "$1" = "--preload" ]; then
    while read line; do :; done
    exit 0
fi
exec sleep 30
"#;

/// Hangs on the first job, answers every later one
pub const SLOW_FIRST_WORKER: &str = r#"#!/bin/sh
if [ "$1" = "--preload" ]; then
    while read line; do :; done
    exit 0
fi
if [ ! -e "@STATE@" ]; then
    touch "@STATE@"
    exec sleep 30
fi
echo "Chart generated: /tmp/second.png"
"#;

/// Reads job paths from stdin and answers each one
pub const PERSISTENT_WORKER: &str = r#"#!/bin/sh
echo "Python version: 3.11"
echo "Worker ready"
while read job; do
    if [ -f "$job" ]; then
        echo "Chart generated: /tmp/persistent.png"
    else
        echo "Error: job file missing"
    fi
done
"#;

/// The first instance dies on its first job; later instances behave
pub const CRASH_ONCE_WORKER: &str = r#"#!/bin/sh
echo "Worker ready"
if [ ! -e "@STATE@" ]; then
    touch "@STATE@"
    read job
    exit 3
fi
while read job; do
    echo "Chart generated: /tmp/restarted.png"
done
"#;

/// Every instance dies on its first job
pub const ALWAYS_CRASHING_WORKER: &str = r#"#!/bin/sh
echo "Worker ready"
read job
exit 3
"#;

/// Takes half a second per job and leaves `@STATE@.overlap` behind if two
/// jobs ever run at once
pub const EXCLUSIVE_WORKER: &str = r#"#!/bin/sh
if [ "$1" = "--preload" ]; then
    while read line; do :; done
    exit 0
fi
if ! mkdir "@STATE@.lock" 2>/dev/null; then
    touch "@STATE@.overlap"
fi
sleep 0.5
rmdir "@STATE@.lock" 2>/dev/null
echo "Chart generated: /tmp/exclusive.png"
"#;

/// Never completes the handshake
pub const SILENT_WORKER: &str = r#"#!/bin/sh
exec sleep 30
"#;

pub struct FakeWorker {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl FakeWorker {
    /// Write `script` as an executable; `@STATE@` becomes a scratch file path
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = dir.path().join("state");
        let path = dir.path().join("chart-worker");

        fs::write(&path, script.replace("@STATE@", &state.to_string_lossy()))
            .expect("write worker script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod worker");

        Self { dir, path }
    }

    pub fn worker_config(&self, mode: JobMode) -> WorkerConfig {
        WorkerConfig {
            executable: Some(self.path.clone()),
            mode,
            ready_marker: match mode {
                JobMode::Persistent => Some("Worker ready".to_string()),
                JobMode::PerJob => None,
            },
            startup_timeout_ms: 2000,
            job_timeout_ms: 2000,
            shutdown_grace_ms: 500,
            restart_backoff_ms: 50,
            ..WorkerConfig::default()
        }
    }

    pub fn manager(&self, config: WorkerConfig) -> WorkerProcessManager {
        let locator = WorkerLocator::with_roots(&config, Some(self.dir.path().to_path_buf()), None);
        WorkerProcessManager::with_locator(config, locator)
    }

    pub fn pipeline_config(&self, mode: JobMode) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.worker = self.worker_config(mode);
        config.coalescer.debounce_ms = 50;
        config.dispatcher.settle_delay_ms = 20;
        config
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// Set by [`EXCLUSIVE_WORKER`] when jobs overlapped
    pub fn overlap_marker(&self) -> PathBuf {
        self.dir.path().join("state.overlap")
    }
}

/// Persistent worker that accepts jobs but never answers
pub const MUTE_WORKER: &str = r#"#!/bin/sh
echo "Worker ready"
while read job; do :; done
"#;

/// Whether a process with this id still exists (and is not yet reaped)
pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
