//! Per-sample z-score normalisation of predicted waveforms.
//!
//! Each row of a `[N, D]` prediction is shifted to zero mean and scaled by its
//! unbiased (`D - 1`) standard deviation along the time axis, the same
//! estimator as the tensor backend's default `std`.
//!
//! # Degenerate input
//!
//! A constant row (zero variance) divides by zero and yields non-finite
//! values. This is not guarded: a constant predicted clip is a known
//! degenerate input and the resulting NaNs propagate into the loss.

use ndarray::{Array2, ArrayView2, Axis};

/// Z-score every row of `x` along the time axis.
///
/// Returns a new array with the same shape as `x`.
pub fn normalize_rows(x: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = x.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let n = row.len() as f64;
        let mean = row.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = row.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();
        row.mapv_inplace(|v| ((v as f64 - mean) / std) as f32);
    }
    out
}

/// Tensor counterpart of [`normalize_rows`] for `[N, D]` predictions.
#[cfg(feature = "tch-backend")]
pub fn normalize_tensor(x: &tch::Tensor) -> tch::Tensor {
    let mean = x.mean_dim(&[-1_i64][..], true, tch::Kind::Float);
    let std = x.std_dim(&[-1_i64][..], true, true);
    (x - mean) / std
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
