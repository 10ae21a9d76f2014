use serde::{Deserialize, Serialize};

/// Default cap on the number of points written per exported series.
pub const DEFAULT_MAX_POINTS: usize = 300;

/// Mean and sample standard deviation of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
}

/// Two-pass mean and Bessel-corrected standard deviation.
///
/// Empty input yields `{0, 0}`; a single value has zero spread.
pub fn mean_std(values: &[f64]) -> MeanStd {
    if values.is_empty() {
        return MeanStd::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = if values.len() > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    MeanStd {
        mean,
        std: variance.sqrt(),
    }
}

/// Largest value of a series, `0` when empty.
pub fn max_or_zero(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
        .unwrap_or(0.0)
}

/// Nearest-neighbour stride subsampling for export payloads.
///
/// Returns the series unchanged when it already fits; otherwise picks index
/// `floor(i * len / max_points)` for each `i` in `0..max_points`.
pub fn downsample<T: Clone>(series: &[T], max_points: usize) -> Vec<T> {
    let len = series.len();
    if len <= max_points {
        return series.to_vec();
    }
    (0..max_points)
        .map(|i| series[i * len / max_points].clone())
        .collect()
}
