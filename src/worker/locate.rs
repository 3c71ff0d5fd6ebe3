//! Render worker discovery
//!
//! Search order: explicit configured path, then the sibling-directory
//! convention around the application (`venv/` and `python/` next to the
//! executable, up to three parents, the working directory, extra search
//! dirs), then platform-default interpreter locations.

use crate::config::WorkerConfig;
use crate::error::RenderError;
use log::{debug, info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const PARENT_LEVELS: usize = 3;

/// A fully resolved worker invocation, minus the per-run arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    /// Leading arguments (launcher wrapper, generator script)
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

pub struct WorkerLocator {
    config: WorkerConfig,
    app_dir: Option<PathBuf>,
    working_dir: Option<PathBuf>,
}

impl WorkerLocator {
    /// Locator rooted at the running executable and the current directory
    pub fn new(config: &WorkerConfig) -> Self {
        let app_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .map(|dir| bundle_base(&dir));
        let working_dir = std::env::current_dir().ok();
        Self::with_roots(config, app_dir, working_dir)
    }

    pub fn with_roots(
        config: &WorkerConfig,
        app_dir: Option<PathBuf>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            config: config.clone(),
            app_dir,
            working_dir,
        }
    }

    /// Directories probed by the sibling convention, in order
    pub fn candidate_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(app_dir) = &self.app_dir {
            roots.extend(app_dir.ancestors().take(PARENT_LEVELS + 1).map(Path::to_path_buf));
        }
        if let Some(cwd) = &self.working_dir {
            roots.push(cwd.clone());
        }
        roots.extend(self.config.search_dirs.iter().cloned());

        let mut unique = Vec::with_capacity(roots.len());
        for root in roots {
            if !unique.contains(&root) {
                unique.push(root);
            }
        }
        unique
    }

    /// Interpreter candidates: virtualenvs first, then system locations
    pub fn runtime_candidates(&self) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = self
            .candidate_roots()
            .iter()
            .map(|root| venv_python(&root.join("venv")))
            .filter(|path| path.is_file())
            .collect();

        for name in ["python3", "python"] {
            if let Some(found) = resolve_executable(Path::new(name)) {
                candidates.push(found);
            }
        }
        candidates.extend(platform_default_runtimes().into_iter().map(PathBuf::from));

        let mut unique = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !unique.contains(&candidate) {
                unique.push(candidate);
            }
        }
        unique
    }

    pub fn script_candidates(&self) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = self
            .candidate_roots()
            .iter()
            .map(|root| root.join("python").join(&self.config.script_name))
            .collect();

        #[cfg(target_os = "macos")]
        if let Some(app_dir) = &self.app_dir {
            candidates.push(
                app_dir
                    .join("Contents")
                    .join("Resources")
                    .join("python")
                    .join(&self.config.script_name),
            );
        }

        candidates.retain(|path| path.is_file());
        candidates
    }

    /// Resolve the worker command, probing interpreters as needed
    pub async fn locate(&self) -> Result<WorkerCommand, RenderError> {
        if let Some(executable) = &self.config.executable {
            let program = resolve_executable(executable).ok_or_else(|| {
                RenderError::unavailable(format!(
                    "configured worker executable not found: {}",
                    executable.display()
                ))
            })?;

            let mut command = WorkerCommand::new(program);
            // Without a script the executable is a self-contained worker
            if let Some(script) = &self.config.script {
                command.args = self.script_args(script)?;
            }
            info!("🔍 Using configured render worker: {}", command.display());
            return Ok(command);
        }

        let runtime = self.find_runtime().await?;
        let script = match &self.config.script {
            Some(script) => script.clone(),
            None => self.script_candidates().into_iter().next().ok_or_else(|| {
                RenderError::unavailable(format!(
                    "chart generator script '{}' not found near the application",
                    self.config.script_name
                ))
            })?,
        };

        let mut command = WorkerCommand::new(runtime);
        command.args = self.script_args(&script)?;
        info!("🔍 Located render worker: {}", command.display());
        Ok(command)
    }

    fn script_args(&self, script: &Path) -> Result<Vec<OsString>, RenderError> {
        if !script.is_file() {
            return Err(RenderError::unavailable(format!(
                "chart generator script not found: {}",
                script.display()
            )));
        }

        let wrapper = self
            .config
            .wrapper_name
            .as_ref()
            .and_then(|name| script.parent().map(|dir| dir.join(name)))
            .filter(|path| path.is_file());

        let mut args = Vec::new();
        if let Some(wrapper) = wrapper {
            debug!("Launching through wrapper {}", wrapper.display());
            args.push(wrapper.into_os_string());
        }
        args.push(script.as_os_str().to_os_string());
        Ok(args)
    }

    async fn find_runtime(&self) -> Result<PathBuf, RenderError> {
        let timeout = self.config.probe_timeout();
        for candidate in self.runtime_candidates() {
            if probe_runtime(&candidate, timeout).await {
                debug!("✅ Runtime responds: {}", candidate.display());
                return Ok(candidate);
            }
            debug!("Runtime candidate rejected: {}", candidate.display());
        }

        warn!("⚠️ No usable render runtime found, charts will not be available");
        Err(RenderError::unavailable("no usable worker runtime found"))
    }
}

/// Ask `<runtime> --version` to answer within `timeout`
pub async fn probe_runtime(runtime: &Path, timeout: Duration) -> bool {
    let mut cmd = Command::new(runtime);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(_) => return false,
    };

    matches!(
        tokio::time::timeout(timeout, child.wait_with_output()).await,
        Ok(Ok(output)) if output.status.success()
    )
}

/// Bare names are looked up on `PATH`; anything else must be an executable file
fn resolve_executable(path: &Path) -> Option<PathBuf> {
    resolve_in(path, std::env::var_os("PATH"))
}

fn resolve_in(path: &Path, search_path: Option<OsString>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    match which::which_in(path, search_path, cwd) {
        Ok(found) => Some(found),
        Err(e) => {
            debug!("{} not usable: {}", path.display(), e);
            None
        }
    }
}

fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

fn platform_default_runtimes() -> Vec<&'static str> {
    if cfg!(windows) {
        vec![
            "C:\\Python311\\python.exe",
            "C:\\Python310\\python.exe",
            "C:\\Program Files\\Python311\\python.exe",
            "C:\\Program Files\\Python310\\python.exe",
        ]
    } else {
        vec![
            "/usr/bin/python3",
            "/usr/local/bin/python3",
            "/opt/homebrew/bin/python3",
        ]
    }
}

/// Inside a macOS bundle, search from the directory holding the `.app`
fn bundle_base(exe_dir: &Path) -> PathBuf {
    let as_text = exe_dir.to_string_lossy();
    if as_text.contains(".app/Contents/MacOS") {
        if let Some(base) = exe_dir.ancestors().nth(3) {
            return base.to_path_buf();
        }
    }
    exe_dir.to_path_buf()
}
