//! Element-side chart state
//!
//! A [`ChartElement`] is what one on-screen chart knows about itself. Every
//! mutation bumps its revision; [`ChartElement::snapshot`] produces the
//! immutable spec handed to the render pipeline.

use crate::model::{AxisRange, ChartSpec, ChartType, DataSeries, ElementId, Rgb};

#[derive(Debug, Clone)]
pub struct ChartElement {
    id: ElementId,
    spec: ChartSpec,
    revision: u64,
}

impl ChartElement {
    pub fn new(id: impl Into<ElementId>) -> Self {
        Self::with_spec(id, ChartSpec::default())
    }

    pub fn with_spec(id: impl Into<ElementId>, spec: ChartSpec) -> Self {
        Self {
            id: id.into(),
            spec,
            revision: 0,
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn spec(&self) -> &ChartSpec {
        &self.spec
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Add or replace a series by name
    pub fn set_series(&mut self, series: DataSeries) {
        self.spec.insert_series(series);
        self.touch();
    }

    pub fn remove_series(&mut self, name: &str) -> Option<DataSeries> {
        let removed = self.spec.series.remove(name);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn clear_series(&mut self) {
        if !self.spec.series.is_empty() {
            self.spec.series.clear();
            self.touch();
        }
    }

    /// Returns `false` if no such series exists
    pub fn set_series_visible(&mut self, name: &str, visible: bool) -> bool {
        match self.spec.series.get_mut(name) {
            Some(series) => {
                series.visible = visible;
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn set_series_color(&mut self, name: &str, color: Rgb) -> bool {
        match self.spec.series.get_mut(name) {
            Some(series) => {
                series.color = Some(color);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.spec.title = title.into();
        self.touch();
    }

    pub fn set_axis_labels(&mut self, x_label: impl Into<String>, y_label: impl Into<String>) {
        self.spec.x_label = x_label.into();
        self.spec.y_label = y_label.into();
        self.touch();
    }

    pub fn set_chart_type(&mut self, chart_type: ChartType) {
        self.spec.chart_type = chart_type;
        self.touch();
    }

    pub fn set_interpolate(&mut self, interpolate: bool) {
        self.spec.interpolate = interpolate;
        self.touch();
    }

    pub fn set_ranges(&mut self, x_range: Option<AxisRange>, y_range: Option<AxisRange>) {
        self.spec.x_range = x_range;
        self.spec.y_range = y_range;
        self.touch();
    }

    /// New target size in pixels; a zero dimension is ignored
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || (width, height) == (self.spec.width, self.spec.height) {
            return false;
        }
        self.spec.width = width;
        self.spec.height = height;
        self.touch();
        true
    }

    /// Copy of the chart to render; `None` if no visible series has samples
    ///
    /// Hidden series stay in the copy so palette positions do not shift;
    /// the encoder leaves them out of the job.
    pub fn snapshot(&self) -> Option<ChartSpec> {
        self.spec
            .visible_series()
            .any(|series| !series.is_empty())
            .then(|| self.spec.clone())
    }
}
