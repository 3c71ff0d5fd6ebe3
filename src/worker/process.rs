//! Worker subprocess plumbing: the warm `--preload` instance with its
//! supervisor task, the stdin/stdout job channel, and one-shot `--fast`
//! runs.

use super::locate::WorkerCommand;
use crate::codec::{classify_line, decode_response, EncodedJob, WorkerExit};
use crate::config::WorkerConfig;
use crate::error::RenderError;
use crate::model::RenderArtifact;
use log::{debug, info, warn};
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Reported by the supervisor when the warm process dies on its own
#[derive(Debug)]
pub(crate) struct ExitNotice {
    pub generation: u64,
    pub status: Option<ExitStatus>,
}

pub(crate) type ExitHandler = Box<dyn FnOnce(ExitNotice) -> BoxFuture<()> + Send>;

/// Exclusive request/response lane to the warm process
pub(crate) struct JobChannel {
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl JobChannel {
    /// Hand one job to the warm process and read until its verdict line
    pub async fn exchange(
        &mut self,
        job: &EncodedJob,
        timeout: Duration,
    ) -> Result<RenderArtifact, RenderError> {
        let job_file = write_job_file(job)?;
        let request_line = format!("{}\n", job_file.path().display());

        let exchange = async {
            self.stdin
                .write_all(request_line.as_bytes())
                .await
                .map_err(|e| RenderError::crashed(format!("writing job: {}", e)))?;
            self.stdin
                .flush()
                .await
                .map_err(|e| RenderError::crashed(format!("writing job: {}", e)))?;

            let mut transcript = String::new();
            loop {
                match self.lines.next_line().await {
                    Ok(Some(line)) => {
                        transcript.push_str(&line);
                        transcript.push('\n');
                        if classify_line(&line).is_some() {
                            return decode_response(&transcript, WorkerExit::Streaming);
                        }
                    }
                    Ok(None) => {
                        return Err(RenderError::crashed("worker closed its output mid-job"))
                    }
                    Err(e) => return Err(RenderError::crashed(format!("reading result: {}", e))),
                }
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::RenderTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// The shared long-lived worker instance
pub(crate) struct WarmProcess {
    pub generation: u64,
    pub pid: Option<u32>,
    pub channel: Arc<Mutex<JobChannel>>,
    stop_tx: Option<oneshot::Sender<Duration>>,
    stopped_rx: Option<oneshot::Receiver<()>>,
}

impl WarmProcess {
    /// Spawn `<worker> --preload`, wait for the handshake, start supervising
    pub async fn spawn(
        command: &WorkerCommand,
        config: &WorkerConfig,
        generation: u64,
        on_exit: ExitHandler,
    ) -> Result<Self, RenderError> {
        let mut cmd = command.command();
        cmd.arg("--preload")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            RenderError::unavailable(format!("failed to start {}: {}", command.display(), e))
        })?;

        let pid = child.id();
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => return Err(RenderError::unavailable("worker pipes unavailable")),
        };
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr);
        }

        let mut lines = BufReader::new(stdout).lines();
        handshake(&mut child, &mut lines, config).await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        supervise(
            child,
            generation,
            config.shutdown_grace(),
            stop_rx,
            stopped_tx,
            on_exit,
        );

        info!(
            "✅ Render worker ready (pid {:?}, generation {})",
            pid, generation
        );

        Ok(Self {
            generation,
            pid,
            channel: Arc::new(Mutex::new(JobChannel { stdin, lines })),
            stop_tx: Some(stop_tx),
            stopped_rx: Some(stopped_rx),
        })
    }

    /// Terminate gracefully, killing after `grace`; resolves once reaped
    pub async fn shutdown(mut self, grace: Duration) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(grace);
        }
        if let Some(stopped_rx) = self.stopped_rx.take() {
            let _ = stopped_rx.await;
        }
    }
}

async fn handshake(
    child: &mut Child,
    lines: &mut Lines<BufReader<ChildStdout>>,
    config: &WorkerConfig,
) -> Result<(), RenderError> {
    let Some(marker) = config.ready_marker.as_deref() else {
        tokio::task::yield_now().await;
        return match child.try_wait() {
            Ok(Some(status)) => Err(RenderError::unavailable(format!(
                "worker exited during startup: {}",
                status
            ))),
            _ => Ok(()),
        };
    };

    let wait_for_marker = async {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.contains(marker) => return Ok(()),
                Ok(Some(line)) => debug!("worker: {}", line),
                Ok(None) => {
                    return Err(RenderError::unavailable(
                        "worker exited before completing the handshake",
                    ))
                }
                Err(e) => return Err(RenderError::unavailable(format!("handshake: {}", e))),
            }
        }
    };

    match tokio::time::timeout(config.startup_timeout(), wait_for_marker).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "⏳ Render worker handshake timed out after {} ms",
                config.startup_timeout_ms
            );
            Err(RenderError::unavailable(format!(
                "worker handshake timed out after {} ms",
                config.startup_timeout_ms
            )))
        }
    }
}

enum Supervision {
    Exited(std::io::Result<ExitStatus>),
    Stop(Duration),
}

fn supervise(
    mut child: Child,
    generation: u64,
    fallback_grace: Duration,
    mut stop_rx: oneshot::Receiver<Duration>,
    stopped_tx: oneshot::Sender<()>,
    on_exit: ExitHandler,
) {
    tokio::spawn(async move {
        let event = tokio::select! {
            status = child.wait() => Supervision::Exited(status),
            requested = &mut stop_rx => Supervision::Stop(requested.unwrap_or(fallback_grace)),
        };

        match event {
            Supervision::Stop(grace) => {
                terminate(&mut child, grace).await;
                let _ = stopped_tx.send(());
            }
            Supervision::Exited(status) => {
                // Unblock any shutdown racing with the exit before reporting it
                let _ = stopped_tx.send(());
                on_exit(ExitNotice {
                    generation,
                    status: status.ok(),
                })
                .await;
            }
        }
    });
}

async fn terminate(child: &mut Child, grace: Duration) {
    request_terminate(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("Render worker exited with {}", status),
        Ok(Err(e)) => warn!("⚠️ Error waiting for render worker: {}", e),
        Err(_) => {
            warn!("⚠️ Render worker ignored terminate, killing it");
            if let Err(e) = child.kill().await {
                warn!("⚠️ Error killing render worker: {}", e);
            }
        }
    }
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child we spawned and have not reaped
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!("SIGTERM to {} failed: {}", pid, std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

fn forward_stderr(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("worker stderr: {}", line);
        }
    });
}

fn write_job_file(job: &EncodedJob) -> Result<NamedTempFile, RenderError> {
    let mut file = tempfile::Builder::new()
        .prefix("sensorchart-job-")
        .suffix(".json")
        .tempfile()?;
    file.write_all(&job.payload)?;
    file.flush()?;
    Ok(file)
}

/// Run one job in a short-lived `<worker> <job.json> --fast` process
pub(crate) async fn run_one_shot(
    command: &WorkerCommand,
    job: &EncodedJob,
    timeout: Duration,
) -> Result<RenderArtifact, RenderError> {
    let job_file = write_job_file(job)?;

    let mut cmd = command.command();
    cmd.arg(job_file.path())
        .arg("--fast")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        RenderError::unavailable(format!("failed to start {}: {}", command.display(), e))
    })?;

    // Dropping the child on timeout kills it
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(RenderError::failed(format!("waiting for worker: {}", e))),
        Err(_) => {
            return Err(RenderError::RenderTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let exit = if output.status.success() {
        WorkerExit::Success
    } else {
        WorkerExit::Failure(output.status.code())
    };
    decode_response(&text, exit)
}
