//! # sensorchart
//!
//! Command-line front end for the render pipeline: locate the chart
//! worker, render a chart spec, or render demo sine waves.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use sensorchart::worker::WorkerLocator;
use sensorchart::{
    generate_sine_waves, ChartElement, ChartSpec, ElementId, JobMode, PipelineConfig,
    RenderArtifact, RenderEvent, RenderPipeline, SineWave,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sensorchart")]
#[command(about = "Render sensor charts through an external chart worker")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/sensorchart/sensorchart.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Send jobs to the warm worker instead of one process per job
    #[arg(long)]
    persistent: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved worker command
    Locate,

    /// Render a chart spec (JSON) and print the artifact path
    Render {
        /// Chart spec file
        spec: PathBuf,
    },

    /// Render a set of sine waves
    Sine {
        /// Wave frequencies in Hz
        #[arg(short, long, num_args = 1.., default_values_t = [1.0, 2.0, 5.0])]
        frequency: Vec<f64>,

        /// Amplitude shared by every wave
        #[arg(short, long, default_value_t = 1.0)]
        amplitude: f64,

        /// Length of the x axis in seconds
        #[arg(long, default_value_t = 1.0)]
        duration: f64,

        /// Samples per wave
        #[arg(short, long, default_value_t = 500)]
        points: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = PipelineConfig::load(&cli.config);
    let debug = cli.debug || loaded.as_ref().map_or(false, |c| c.general.debug);

    // Initialize logging
    let filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut config = match loaded {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            warn!("⚠️ {:#}", e);
            info!("📝 Using default configuration");
            PipelineConfig::default()
        }
    };

    if cli.persistent {
        config.worker.mode = JobMode::Persistent;
    }

    match cli.command {
        Command::Locate => locate(&config).await,
        Command::Render { spec } => {
            let contents = std::fs::read_to_string(&spec)
                .with_context(|| format!("Failed to read chart spec: {}", spec.display()))?;
            let chart: ChartSpec = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse chart spec: {}", spec.display()))?;
            let artifact = render(&config, chart).await?;
            println!("{}", artifact.path.display());
            Ok(())
        }
        Command::Sine {
            frequency,
            amplitude,
            duration,
            points,
        } => {
            let waves: Vec<SineWave> = frequency
                .into_iter()
                .map(|frequency| SineWave {
                    frequency,
                    amplitude,
                    phase: 0.0,
                })
                .collect();
            let chart = generate_sine_waves(&waves, (0.0, duration), points, "Sine Waves");
            let artifact = render(&config, chart).await?;
            println!("{}", artifact.path.display());
            Ok(())
        }
    }
}

async fn locate(config: &PipelineConfig) -> Result<()> {
    let locator = WorkerLocator::new(&config.worker);
    for root in locator.candidate_roots() {
        debug!("Search root: {}", root.display());
    }

    let command = locator.locate().await.context("No render worker found")?;
    println!("{}", command.display());
    Ok(())
}

async fn render(config: &PipelineConfig, chart: ChartSpec) -> Result<RenderArtifact> {
    let (mut pipeline, mut events) = RenderPipeline::new(config);
    let element = ElementId::from("cli");

    pipeline
        .add_element(ChartElement::with_spec(element.clone(), chart))
        .await
        .context("Render worker could not be started")?;

    let Some(sequence) = pipeline.render_now(&element) else {
        pipeline.shutdown().await;
        anyhow::bail!("Chart has no visible series to render");
    };

    let deadline = config.worker.job_timeout() + Duration::from_secs(1);
    let outcome = tokio::time::timeout(deadline, async {
        while let Some(event) = events.recv().await {
            match event {
                RenderEvent::Started { sequence: s, .. } if s == sequence => {
                    info!("🎨 Rendering chart {}", s);
                }
                RenderEvent::Delivered {
                    sequence: s,
                    artifact,
                    ..
                } if s == sequence => return Ok(artifact),
                RenderEvent::Failed {
                    sequence: s, error, ..
                } if s == sequence => return Err(anyhow::Error::new(error)),
                other => debug!("Ignoring event {:?}", other),
            }
        }
        anyhow::bail!("Render pipeline closed before answering")
    })
    .await;

    let diagnostics = pipeline.worker().diagnostics().await;
    debug!(
        "Worker diagnostics: {}",
        serde_json::to_string(&diagnostics).unwrap_or_default()
    );
    pipeline.shutdown().await;

    match outcome {
        Ok(result) => result,
        Err(_) => anyhow::bail!("No render result within {:?}", deadline),
    }
}
