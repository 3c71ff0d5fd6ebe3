//! Configuration management for the render pipeline
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It combines settings for debouncing, dispatch,
//! the render worker process, and request telemetry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct containing all pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineConfig {
    /// Change-notification debouncing
    #[serde(default)]
    pub coalescer: CoalescerConfig,

    /// Per-element dispatch behaviour
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Render worker location and lifecycle
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Request storm observation
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoalescerConfig {
    /// Quiet period after the last change before a render fires (milliseconds)
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delay before a queued request is dispatched after a completion (milliseconds)
    pub settle_delay_ms: u64,
}

/// Where render jobs execute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Jobs are written to the shared warm process over stdin
    Persistent,
    /// Each job spawns a short-lived `--fast` process
    PerJob,
}

/// Render worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Explicit worker executable; skips the search when set
    pub executable: Option<PathBuf>,

    /// Explicit chart generator script
    pub script: Option<PathBuf>,

    /// File name of the chart generator script to search for
    pub script_name: String,

    /// Launcher inserted before the script when found next to it
    pub wrapper_name: Option<String>,

    /// Extra directories searched after the sibling convention
    pub search_dirs: Vec<PathBuf>,

    /// Job execution mode
    pub mode: JobMode,

    /// Line the warm process prints once ready; `None` means spawn is enough
    pub ready_marker: Option<String>,

    /// Startup handshake bound (milliseconds)
    pub startup_timeout_ms: u64,

    /// Per-job bound (milliseconds)
    pub job_timeout_ms: u64,

    /// Grace period between terminate and kill (milliseconds)
    pub shutdown_grace_ms: u64,

    /// Bound for `<runtime> --version` probes during the search (milliseconds)
    pub probe_timeout_ms: u64,

    /// Delay before restarting a crashed process (milliseconds)
    pub restart_backoff_ms: u64,

    /// Automatic restarts allowed before the worker is latched unavailable
    pub max_restarts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Global counters reset after this long (seconds)
    pub observation_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: None,
            script: None,
            script_name: "chart_generator.py".to_string(),
            wrapper_name: Some("run_with_venv.py".to_string()),
            search_dirs: Vec::new(),
            mode: JobMode::PerJob,
            ready_marker: None,
            startup_timeout_ms: 5000,
            job_timeout_ms: 8000,
            shutdown_grace_ms: 1000,
            probe_timeout_ms: 1000,
            restart_backoff_ms: 100,
            max_restarts: 1,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            observation_window_secs: 600,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { debug: false }
    }
}

impl CoalescerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl DispatcherConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl WorkerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

impl TelemetryConfig {
    pub fn observation_window(&self) -> Duration {
        Duration::from_secs(self.observation_window_secs)
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let rest = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(rest)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: PipelineConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.coalescer.debounce_ms == 0 {
            anyhow::bail!("Invalid debounce_ms: must be greater than 0");
        }

        let worker = &self.worker;
        for (name, value) in [
            ("startup_timeout_ms", worker.startup_timeout_ms),
            ("job_timeout_ms", worker.job_timeout_ms),
            ("shutdown_grace_ms", worker.shutdown_grace_ms),
            ("probe_timeout_ms", worker.probe_timeout_ms),
        ] {
            if value == 0 {
                anyhow::bail!("Invalid {}: must be greater than 0", name);
            }
        }

        if worker.script_name.trim().is_empty() {
            anyhow::bail!("Invalid script_name: must not be empty");
        }

        if let Some(marker) = &worker.ready_marker {
            if marker.trim().is_empty() {
                anyhow::bail!("Invalid ready_marker: must not be blank when set");
            }
        }

        if self.telemetry.observation_window_secs == 0 {
            anyhow::bail!("Invalid observation_window_secs: must be greater than 0");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Sections of the partial config that differ from the defaults win
    pub fn merge_partial(mut self, partial: PipelineConfig) -> Self {
        let default_config = PipelineConfig::default();

        if partial.coalescer != default_config.coalescer {
            self.coalescer = partial.coalescer;
        }
        if partial.dispatcher != default_config.dispatcher {
            self.dispatcher = partial.dispatcher;
        }
        if partial.worker != default_config.worker {
            self.worker = partial.worker;
        }
        if partial.telemetry != default_config.telemetry {
            self.telemetry = partial.telemetry;
        }
        if partial.general != default_config.general {
            self.general = partial.general;
        }

        self
    }
}

#[cfg(test)]
mod tests;
