//! Synthetic sine-wave charts, handy for smoke-testing a worker

use super::{ChartSpec, ChartType, DataSeries, Rgb};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineWave {
    pub frequency: f64,
    pub amplitude: f64,
    pub phase: f64,
}

/// Build a chart with one series per wave over `x_range`, sampled at `points`
pub fn generate_sine_waves(
    waves: &[SineWave],
    x_range: (f64, f64),
    points: usize,
    title: &str,
) -> ChartSpec {
    let (start, end) = x_range;
    let step = if points == 0 {
        0.0
    } else {
        (end - start) / points as f64
    };

    let mut spec = ChartSpec {
        title: title.to_string(),
        x_label: "Time (s)".to_string(),
        y_label: "Amplitude".to_string(),
        chart_type: ChartType::Line,
        interpolate: true,
        ..ChartSpec::default()
    };

    for (index, wave) in waves.iter().enumerate() {
        let samples = (0..points).map(|j| {
            let x = start + j as f64 * step;
            let y = wave.amplitude * (2.0 * PI * wave.frequency * x + wave.phase).sin();
            (x, y)
        });

        let series = DataSeries::new(format!("Sine {} Hz", wave.frequency), samples)
            .with_color(Rgb::for_series_index(index));
        spec.insert_series(series);
    }

    spec
}
