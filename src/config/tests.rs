//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization/deserialization,
//! and partial merging.

use super::*;
use anyhow::Result;
use proptest::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = PipelineConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.coalescer.debounce(), Duration::from_millis(500));
    assert_eq!(config.dispatcher.settle_delay(), Duration::from_millis(100));
    assert_eq!(config.worker.startup_timeout(), Duration::from_secs(5));
    assert_eq!(config.worker.job_timeout(), Duration::from_secs(8));
    assert_eq!(config.worker.max_restarts, 1);
    assert_eq!(config.worker.mode, JobMode::PerJob);
    assert_eq!(
        config.telemetry.observation_window(),
        Duration::from_secs(600)
    );
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original = PipelineConfig::default();
    original.worker.executable = Some(PathBuf::from("/opt/charts/bin/worker"));
    original.worker.mode = JobMode::Persistent;
    original.worker.ready_marker = Some("Worker ready".to_string());

    let toml_string = toml::to_string(&original)?;
    let deserialized: PipelineConfig = toml::from_str(&toml_string)?;

    assert_eq!(original, deserialized);
    Ok(())
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("sensorchart.toml");

    let test_config = r#"
[coalescer]
debounce_ms = 250

[worker]
executable = "/usr/local/bin/chart-worker"
mode = "persistent"
ready_marker = "Worker ready"
job_timeout_ms = 4000

[general]
debug = true
"#;
    fs::write(&file_path, test_config)?;

    let config = PipelineConfig::load(&file_path)?;

    assert_eq!(config.coalescer.debounce_ms, 250);
    assert_eq!(
        config.worker.executable,
        Some(PathBuf::from("/usr/local/bin/chart-worker"))
    );
    assert_eq!(config.worker.mode, JobMode::Persistent);
    assert_eq!(config.worker.job_timeout_ms, 4000);
    // Unspecified fields fall back to defaults
    assert_eq!(config.worker.startup_timeout_ms, 5000);
    assert_eq!(config.worker.script_name, "chart_generator.py");
    assert_eq!(config.dispatcher.settle_delay_ms, 100);
    assert!(config.general.debug);

    Ok(())
}

#[test]
fn test_empty_file_yields_defaults() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("empty.toml");
    fs::write(&file_path, "")?;

    let config = PipelineConfig::load(&file_path)?;
    assert_eq!(config, PipelineConfig::default());
    Ok(())
}

#[test]
fn test_invalid_toml_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("broken.toml");
    fs::write(&file_path, "[worker\nmode = ")?;

    let err = PipelineConfig::load(&file_path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
    Ok(())
}

#[test]
fn test_missing_file_is_rejected() {
    let err = PipelineConfig::load("/nonexistent/sensorchart.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_validation_rejects_zero_bounds() {
    let mut config = PipelineConfig::default();
    config.worker.job_timeout_ms = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("job_timeout_ms"));

    let mut config = PipelineConfig::default();
    config.coalescer.debounce_ms = 0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.telemetry.observation_window_secs = 0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.worker.ready_marker = Some("   ".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_job_mode_is_rejected() {
    let result: std::result::Result<PipelineConfig, _> =
        toml::from_str("[worker]\nmode = \"threaded\"\n");
    assert!(result.is_err());
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = PipelineConfig::default();
    config.worker.search_dirs = vec![PathBuf::from("/srv/charts")];
    config.save(&file_path)?;

    let reloaded = PipelineConfig::load(&file_path)?;
    assert_eq!(reloaded, config);
    Ok(())
}

#[test]
fn test_merge_partial_overrides_changed_sections() {
    let base = PipelineConfig::default();

    let mut partial = PipelineConfig::default();
    partial.coalescer.debounce_ms = 50;
    partial.worker.mode = JobMode::Persistent;

    let merged = base.merge_partial(partial);
    assert_eq!(merged.coalescer.debounce_ms, 50);
    assert_eq!(merged.worker.mode, JobMode::Persistent);
    assert_eq!(merged.dispatcher, DispatcherConfig::default());
    assert_eq!(merged.telemetry, TelemetryConfig::default());
}

#[test]
fn test_merge_partial_keeps_base_when_partial_is_default() {
    let mut base = PipelineConfig::default();
    base.dispatcher.settle_delay_ms = 5;

    let merged = base.clone().merge_partial(PipelineConfig::default());
    assert_eq!(merged, base);
}

prop_compose! {
    fn valid_worker_config()(
        startup in 1u64..60_000,
        job in 1u64..60_000,
        grace in 1u64..10_000,
        probe in 1u64..10_000,
        backoff in 0u64..5_000,
        max_restarts in 0u32..5,
        persistent in any::<bool>(),
    ) -> WorkerConfig {
        WorkerConfig {
            mode: if persistent { JobMode::Persistent } else { JobMode::PerJob },
            startup_timeout_ms: startup,
            job_timeout_ms: job,
            shutdown_grace_ms: grace,
            probe_timeout_ms: probe,
            restart_backoff_ms: backoff,
            max_restarts,
            ..WorkerConfig::default()
        }
    }
}

proptest! {
    #[test]
    fn prop_valid_configs_roundtrip(
        worker in valid_worker_config(),
        debounce in 1u64..5_000,
        window in 1u64..86_400,
    ) {
        let config = PipelineConfig {
            coalescer: CoalescerConfig { debounce_ms: debounce },
            worker,
            telemetry: TelemetryConfig { observation_window_secs: window },
            ..PipelineConfig::default()
        };

        prop_assert!(config.validate().is_ok());

        let text = toml::to_string(&config).unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        prop_assert_eq!(parsed, config);
    }
}
