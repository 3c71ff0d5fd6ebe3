//! Render job encoding and worker response decoding
//!
//! The job description is JSON with keys in a fixed order and series in
//! name order, so equal requests encode to byte-identical payloads. The
//! worker answers with free-form text containing one
//! `Chart generated: <path>` line on success; lines starting with
//! `Error` are explicit failure reports.

use crate::error::RenderError;
use crate::model::{ElementId, RenderArtifact, RenderRequest, Rgb, SequenceId};
use serde::Serialize;

/// Prefix of the success line in worker output
pub const ARTIFACT_MARKER: &str = "Chart generated:";

/// Prefix of explicit failure lines in worker output
pub const ERROR_MARKER: &str = "Error";

/// A serialized request ready for the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedJob {
    pub element: ElementId,
    pub sequence: SequenceId,
    pub payload: Vec<u8>,
}

#[derive(Serialize)]
struct JobDescription<'a> {
    title: &'a str,
    x_label: &'a str,
    y_label: &'a str,
    chart_type: &'static str,
    interpolate: bool,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    x_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y_max: Option<f64>,
    series: Vec<JobSeries<'a>>,
}

#[derive(Serialize)]
struct JobSeries<'a> {
    name: &'a str,
    color: String,
    visible: bool,
    line_style: &'static str,
    marker: &'static str,
    line_width: f64,
    x_values: &'a [f64],
    y_values: &'a [f64],
}

/// Serialize a request into the worker's job description
///
/// Hidden series are left out. A series without a colour gets the
/// palette colour of its position among all series, hidden ones included,
/// so toggling visibility never recolours the others.
pub fn encode_job(request: &RenderRequest) -> Result<EncodedJob, RenderError> {
    let spec = request.spec();

    let series = spec
        .series
        .values()
        .enumerate()
        .filter(|(_, s)| s.visible)
        .map(|(index, s)| {
            if s.x().len() != s.y().len() {
                return Err(RenderError::failed(format!(
                    "series '{}' has mismatched columns",
                    s.name()
                )));
            }
            Ok(JobSeries {
                name: s.name(),
                color: s.color.unwrap_or_else(|| Rgb::for_series_index(index)).to_hex(),
                visible: s.visible,
                line_style: s.line_style.symbol(),
                marker: s.marker.symbol(),
                line_width: s.line_width,
                x_values: s.x(),
                y_values: s.y(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let description = JobDescription {
        title: &spec.title,
        x_label: &spec.x_label,
        y_label: &spec.y_label,
        chart_type: spec.chart_type.as_str(),
        interpolate: spec.interpolate,
        width: spec.width,
        height: spec.height,
        x_min: spec.x_range.map(|r| r.min),
        x_max: spec.x_range.map(|r| r.max),
        y_min: spec.y_range.map(|r| r.min),
        y_max: spec.y_range.map(|r| r.max),
        series,
    };

    let payload = serde_json::to_vec_pretty(&description)?;

    Ok(EncodedJob {
        element: request.element().clone(),
        sequence: request.sequence(),
        payload,
    })
}

/// How the worker run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// One-shot process exited with status zero
    Success,
    /// One-shot process exited abnormally (code is `None` when killed by a signal)
    Failure(Option<i32>),
    /// Answer read from the persistent process, which keeps running
    Streaming,
}

/// Meaningful line in worker output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    Artifact(String),
    Error(String),
}

/// Classify one line of worker output; chatter yields `None`
pub fn classify_line(line: &str) -> Option<ResponseLine> {
    if let Some(index) = line.find(ARTIFACT_MARKER) {
        let path = line[index + ARTIFACT_MARKER.len()..].trim();
        return Some(ResponseLine::Artifact(path.to_string()));
    }
    let trimmed = line.trim_start();
    if trimmed.starts_with(ERROR_MARKER) {
        return Some(ResponseLine::Error(trimmed.trim_end().to_string()));
    }
    None
}

/// Turn worker output into an artifact reference or a typed failure
pub fn decode_response(output: &str, exit: WorkerExit) -> Result<RenderArtifact, RenderError> {
    let mut artifact = None;
    let mut first_error = None;

    for line in output.lines() {
        match classify_line(line) {
            Some(ResponseLine::Artifact(path)) if artifact.is_none() => artifact = Some(path),
            Some(ResponseLine::Error(message)) if first_error.is_none() => {
                first_error = Some(message)
            }
            _ => {}
        }
    }

    if let WorkerExit::Failure(code) = exit {
        let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        let detail = first_error.unwrap_or_else(|| tail(output));
        return Err(RenderError::failed(format!(
            "worker exited with status {}: {}",
            status, detail
        )));
    }

    match artifact {
        Some(path) if !path.is_empty() => Ok(RenderArtifact::new(path)),
        Some(_) => Err(RenderError::empty("artifact marker without a path")),
        None => match first_error {
            Some(message) => Err(RenderError::failed(message)),
            None => Err(RenderError::empty("no artifact marker in worker output")),
        },
    }
}

fn tail(output: &str) -> String {
    output
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string()
}
