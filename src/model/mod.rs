//! Chart data model
//!
//! Series, styling enums, and the immutable [`RenderRequest`] snapshot
//! that travels from the dispatcher to the worker.

use crate::error::RenderError;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

mod color;
mod sine;

pub use color::Rgb;
pub use sine::{generate_sine_waves, SineWave};

/// Identifier of one visual element (one chart on screen)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-element, monotonically increasing request number (first is 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub u64);

impl SequenceId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Line,
    Scatter,
    Bar,
    Area,
    Step,
    Sine,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Scatter => "scatter",
            ChartType::Bar => "bar",
            ChartType::Area => "area",
            ChartType::Step => "step",
            ChartType::Sine => "sine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
    DashDot,
}

impl LineStyle {
    /// Matplotlib-style line pattern
    pub fn symbol(self) -> &'static str {
        match self {
            LineStyle::Solid => "-",
            LineStyle::Dashed => "--",
            LineStyle::Dotted => ":",
            LineStyle::DashDot => "-.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    #[default]
    None,
    Circle,
    Square,
    Triangle,
    Star,
}

impl MarkerStyle {
    /// Matplotlib-style marker code; empty for no marker
    pub fn symbol(self) -> &'static str {
        match self {
            MarkerStyle::None => "",
            MarkerStyle::Circle => "o",
            MarkerStyle::Square => "s",
            MarkerStyle::Triangle => "^",
            MarkerStyle::Star => "*",
        }
    }
}

/// One named series of (x, y) samples with its styling
///
/// The x and y columns always have equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesColumns")]
pub struct DataSeries {
    name: String,
    x: Vec<f64>,
    y: Vec<f64>,
    /// `None` picks a palette colour from the series position
    pub color: Option<Rgb>,
    pub visible: bool,
    pub line_style: LineStyle,
    pub marker: MarkerStyle,
    pub line_width: f64,
}

impl DataSeries {
    pub fn new(name: impl Into<String>, points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let (x, y) = points.into_iter().unzip();
        Self {
            name: name.into(),
            x,
            y,
            color: None,
            visible: true,
            line_style: LineStyle::default(),
            marker: MarkerStyle::default(),
            line_width: 2.0,
        }
    }

    pub fn from_columns(
        name: impl Into<String>,
        x: Vec<f64>,
        y: Vec<f64>,
    ) -> Result<Self, RenderError> {
        let name = name.into();
        if x.len() != y.len() {
            return Err(RenderError::failed(format!(
                "series '{}' has {} x values but {} y values",
                name,
                x.len(),
                y.len()
            )));
        }
        let mut series = Self::new(name, std::iter::empty::<(f64, f64)>());
        series.x = x;
        series.y = y;
        Ok(series)
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_style(mut self, line_style: LineStyle, marker: MarkerStyle) -> Self {
        self.line_style = line_style;
        self.marker = marker;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Serialized shape of a series, validated on the way in
#[derive(Deserialize)]
struct SeriesColumns {
    name: String,
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default)]
    color: Option<Rgb>,
    #[serde(default = "default_visible")]
    visible: bool,
    #[serde(default)]
    line_style: LineStyle,
    #[serde(default)]
    marker: MarkerStyle,
    #[serde(default = "default_line_width")]
    line_width: f64,
}

fn default_visible() -> bool {
    true
}

fn default_line_width() -> f64 {
    2.0
}

impl TryFrom<SeriesColumns> for DataSeries {
    type Error = RenderError;

    fn try_from(raw: SeriesColumns) -> Result<Self, Self::Error> {
        let mut series = DataSeries::from_columns(raw.name, raw.x, raw.y)?;
        series.color = raw.color;
        series.visible = raw.visible;
        series.line_style = raw.line_style;
        series.marker = raw.marker;
        series.line_width = raw.line_width;
        Ok(series)
    }
}

/// Inclusive axis range; only emitted when both ends are known
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Everything the worker needs to draw one chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartSpec {
    /// Keyed by series name; ordered so encoding is deterministic
    #[serde(deserialize_with = "series_keyed_by_name")]
    pub series: BTreeMap<String, DataSeries>,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub chart_type: ChartType,
    pub interpolate: bool,
    pub width: u32,
    pub height: u32,
    pub x_range: Option<AxisRange>,
    pub y_range: Option<AxisRange>,
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self {
            series: BTreeMap::new(),
            title: String::new(),
            x_label: "X".to_string(),
            y_label: "Y".to_string(),
            chart_type: ChartType::Line,
            interpolate: false,
            width: 800,
            height: 600,
            x_range: None,
            y_range: None,
        }
    }
}

impl ChartSpec {
    /// Insert a series under its own name, replacing any previous one
    pub fn insert_series(&mut self, series: DataSeries) {
        self.series.insert(series.name().to_string(), series);
    }

    pub fn with_series(mut self, series: DataSeries) -> Self {
        self.insert_series(series);
        self
    }

    /// Series that will actually be drawn
    pub fn visible_series(&self) -> impl Iterator<Item = &DataSeries> {
        self.series.values().filter(|s| s.visible)
    }
}

fn series_keyed_by_name<'de, D>(deserializer: D) -> Result<BTreeMap<String, DataSeries>, D::Error>
where
    D: Deserializer<'de>,
{
    let series = BTreeMap::<String, DataSeries>::deserialize(deserializer)?;
    if let Some((key, mismatched)) = series.iter().find(|(key, s)| key.as_str() != s.name()) {
        return Err(de::Error::custom(format!(
            "series key '{}' does not match series name '{}'",
            key,
            mismatched.name()
        )));
    }
    Ok(series)
}

/// Immutable render request, stamped by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    element: ElementId,
    sequence: SequenceId,
    spec: ChartSpec,
}

impl RenderRequest {
    pub fn new(element: ElementId, sequence: SequenceId, spec: ChartSpec) -> Self {
        Self {
            element,
            sequence,
            spec,
        }
    }

    pub fn element(&self) -> &ElementId {
        &self.element
    }

    pub fn sequence(&self) -> SequenceId {
        self.sequence
    }

    pub fn spec(&self) -> &ChartSpec {
        &self.spec
    }
}

/// Reference to a rendered image on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArtifact {
    pub path: PathBuf,
}

impl RenderArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Worker answer for one sequence id; consumed once by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub sequence: SequenceId,
    pub outcome: Result<RenderArtifact, RenderError>,
}
