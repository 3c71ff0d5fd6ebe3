//! # Sensorchart Render Pipeline
//!
//! Turns bursts of chart state changes into renders performed by an
//! external chart worker process, keeping at most one render in flight per
//! chart and always showing the result of the latest request.
//!
//! ## Architecture
//!
//! - `coalescer`: per-element debouncing of change notifications
//! - `dispatcher`: at-most-one-in-flight dispatch with latest-wins delivery
//! - `worker`: discovery and reference-counted lifecycle of the worker process
//! - `telemetry`: request counters for spotting render storms
//! - `codec`: job description encoding and worker output decoding
//! - `element`: element-side chart state
//! - `pipeline`: everything above wired together
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sensorchart::{ChartElement, DataSeries, PipelineConfig, RenderEvent, RenderPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::default();
//!     let (mut pipeline, mut events) = RenderPipeline::new(&config);
//!
//!     let mut chart = ChartElement::new("greenhouse");
//!     chart.set_series(DataSeries::new("temp", vec![(0.0, 20.0), (1.0, 21.0)]));
//!     pipeline.add_element(chart).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let RenderEvent::Delivered { artifact, .. } = event {
//!             println!("{}", artifact.path.display());
//!             break;
//!         }
//!     }
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod coalescer;
pub mod config;
pub mod dispatcher;
pub mod element;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod telemetry;
pub mod worker;

// Re-export main types for easy access
pub use coalescer::{RenderRequestCoalescer, Trigger};
pub use codec::{decode_response, encode_job, EncodedJob, WorkerExit};
pub use config::{JobMode, PipelineConfig};
pub use dispatcher::{RenderBackend, RenderDispatcher, RenderEvent};
pub use element::ChartElement;
pub use error::{FailureKind, RenderError};
pub use model::{
    generate_sine_waves, AxisRange, ChartSpec, ChartType, DataSeries, ElementId, LineStyle,
    MarkerStyle, RenderArtifact, RenderRequest, RenderResult, Rgb, SequenceId, SineWave,
};
pub use pipeline::RenderPipeline;
pub use telemetry::RequestTelemetry;
pub use worker::{WorkerDiagnostics, WorkerHealth, WorkerProcessManager};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
