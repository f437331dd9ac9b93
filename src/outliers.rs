//! Quantile-band outlier filtering for baseline pools.

/// Linearly interpolated quantile of an ascending-sorted slice.
///
/// `q` is clamped to `[0, 1]`. Returns `None` on an empty slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let weight = pos - lower as f64;
    Some(sorted[lower] * (1.0 - weight) + sorted[upper] * weight)
}

/// Keep only the values inside the closed `[low, high]` quantile band.
///
/// Both cut points are computed over the full input, so a tight band over a
/// spread-out pool can reject everything.
pub fn quantile_band(values: &[f64], low: f64, high: f64) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let (Some(lo), Some(hi)) = (quantile(&sorted, low), quantile(&sorted, high)) else {
        return Vec::new();
    };
    values
        .iter()
        .copied()
        .filter(|v| *v >= lo && *v <= hi)
        .collect()
}

/// Arithmetic mean; `0.0` on an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
