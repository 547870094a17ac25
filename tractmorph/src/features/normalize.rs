use serde::{Deserialize, Serialize};

/// Mean and population standard deviation fitted on one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaler {
    pub mean: f64,
    pub std: f64,
}

impl ColumnScaler {
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return ColumnScaler { mean: 0.0, std: 0.0 };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        ColumnScaler {
            mean,
            std: var.sqrt(),
        }
    }

    /// z-score; a constant column maps to 0.
    pub fn transform(&self, value: f64) -> f64 {
        if self.std > 0.0 && self.std.is_finite() {
            (value - self.mean) / self.std
        } else {
            0.0
        }
    }
}

/// Standardize every column independently (ddof = 0).
/// Returns the normalized columns and the fitted parameters; nothing is kept between calls.
pub fn standardize(columns: &[Vec<f64>]) -> (Vec<Vec<f64>>, Vec<ColumnScaler>) {
    columns
        .iter()
        .map(|column| {
            let scaler = ColumnScaler::fit(column);
            let normalized: Vec<f64> = column.iter().map(|&v| scaler.transform(v)).collect();
            (normalized, scaler)
        })
        .unzip()
}
