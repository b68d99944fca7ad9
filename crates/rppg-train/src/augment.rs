//! Heart-rate-conditioned temporal augmentation.
//!
//! Each clip of a training batch is resampled in time according to the heart
//! rate estimated from its own label:
//!
//! | estimated HR      | with probability 0.5                                  |
//! |-------------------|-------------------------------------------------------|
//! | `hr > 90`         | 2× temporal stretch from a random start (slower pulse) |
//! | `hr < 75`         | 2× decimation of the first half, then repeated (faster pulse) |
//! | `75 <= hr <= 90`  | unchanged                                             |
//!
//! After all clips are processed a single batch-wide coin flip decides whether
//! the whole batch is mirrored along the width axis.
//!
//! ```text
//! stretch, offset o:   out[t] = src[(t+o)/2]                   (t+o even)
//!                      out[t] = (src[(t+o)/2] + src[(t+o)/2+1]) / 2  (t+o odd)
//! compress:            out[t] = src[2t]                        (2t < D)
//!                      out[t] = out[t - D/2]                   (otherwise)
//! ```
//!
//! With `o <= D/2 - 1` the largest source index touched by the stretch is
//! `(3D/2 - 2) / 2 + 1 < D` for every `D >= 2`, so the stretch never reads
//! past the end of the clip.

use ndarray::{Array1, Array2, Array4, Array5, ArrayView1, ArrayView2, ArrayView4, ArrayView5, Axis};
use rand::Rng;
use tracing::debug;

use crate::error::{TrainError, TrainResult};
use crate::heart_rate::HeartRateEstimator;

/// Clips whose estimated rate is above this are stretched.
pub const HIGH_HR_BPM: f64 = 90.0;

/// Clips whose estimated rate is below this are compressed.
pub const LOW_HR_BPM: f64 = 75.0;

// ---------------------------------------------------------------------------
// Per-clip plan
// ---------------------------------------------------------------------------

/// Random draws made for one clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipDraw {
    /// Uniform in `[0, 1)`; the clip is resampled only when `< 0.5`.
    pub rand1: f64,
    /// Stretch start offset, uniform in `0..=D/2 - 1`.
    pub offset: usize,
}

/// Resampling applied to a single clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resample {
    /// 2× upsampling by repetition/averaging starting at `offset`.
    Stretch {
        /// Start position in the doubled timeline.
        offset: usize,
    },
    /// 2× decimation of the first half, duplicated into the second half.
    Compress,
    /// Copy through unchanged.
    Identity,
}

/// Pick the resampling for a clip with estimated rate `hr`.
///
/// A `NaN` rate (no estimate) falls through to [`Resample::Identity`].
pub fn choose_resample(hr: f64, draw: ClipDraw) -> Resample {
    if draw.rand1 >= 0.5 {
        return Resample::Identity;
    }
    if hr > HIGH_HR_BPM {
        Resample::Stretch { offset: draw.offset }
    } else if hr < LOW_HR_BPM {
        Resample::Compress
    } else {
        Resample::Identity
    }
}

/// Apply `plan` to one clip (`[D, C, H, W]`) and its label (`[D]`).
///
/// The output always has the same length `D` as the input.
pub fn resample_clip(
    clip: ArrayView4<'_, f32>,
    label: ArrayView1<'_, f32>,
    plan: Resample,
) -> (Array4<f32>, Array1<f32>) {
    let d = clip.len_of(Axis(0));
    match plan {
        Resample::Identity => (clip.to_owned(), label.to_owned()),
        Resample::Stretch { offset } => {
            let mut out = Array4::<f32>::zeros(clip.raw_dim());
            let mut out_label = Array1::<f32>::zeros(d);
            for tt in offset..offset + d {
                let t = tt - offset;
                let src = tt / 2;
                if tt % 2 == 0 {
                    out.index_axis_mut(Axis(0), t).assign(&clip.index_axis(Axis(0), src));
                    out_label[t] = label[src];
                } else {
                    let blended = &clip.index_axis(Axis(0), src) / 2.0
                        + &clip.index_axis(Axis(0), src + 1) / 2.0;
                    out.index_axis_mut(Axis(0), t).assign(&blended);
                    out_label[t] = label[src] / 2.0 + label[src + 1] / 2.0;
                }
            }
            (out, out_label)
        }
        Resample::Compress => {
            let mut out = Array4::<f32>::zeros(clip.raw_dim());
            let mut out_label = Array1::<f32>::zeros(d);
            let half = d / 2;
            for tt in 0..d {
                if 2 * tt < d {
                    out.index_axis_mut(Axis(0), tt).assign(&clip.index_axis(Axis(0), tt * 2));
                    out_label[tt] = label[tt * 2];
                } else {
                    let frame = out.index_axis(Axis(0), tt - half).to_owned();
                    out.index_axis_mut(Axis(0), tt).assign(&frame);
                    out_label[tt] = out_label[tt - half];
                }
            }
            (out, out_label)
        }
    }
}

/// Mirror a `[N, D, C, H, W]` batch along the width axis.
pub fn mirror_width(data: ArrayView5<'_, f32>) -> Array5<f32> {
    let mut out = data.to_owned();
    out.invert_axis(Axis(4));
    out.as_standard_layout().into_owned()
}

// ---------------------------------------------------------------------------
// TemporalAugmenter
// ---------------------------------------------------------------------------

/// Applies heart-rate-conditioned resampling and batch mirroring.
///
/// The rate of each clip is estimated from its own label at the validation
/// sampling rate.
pub struct TemporalAugmenter<H, R> {
    estimator: H,
    rng: R,
    fs: f64,
    diff_flag: bool,
}

impl<H: HeartRateEstimator, R: Rng> TemporalAugmenter<H, R> {
    /// Create an augmenter.
    pub fn new(estimator: H, rng: R, fs: f64, diff_flag: bool) -> Self {
        Self { estimator, rng, fs, diff_flag }
    }

    /// Augment a batch.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ShapeMismatch`] when `labels` is not `[N, D]`
    /// for `data` of shape `[N, D, C, H, W]`, or when `D < 2`.
    pub fn augment(
        &mut self,
        data: ArrayView5<'_, f32>,
        labels: ArrayView2<'_, f32>,
    ) -> TrainResult<(Array5<f32>, Array2<f32>)> {
        let (n, d, _, _, _) = data.dim();
        if labels.dim() != (n, d) {
            return Err(TrainError::shape_mismatch(vec![n, d], labels.shape().to_vec()));
        }
        if d < 2 {
            return Err(TrainError::shape_mismatch(vec![n, 2], vec![n, d]));
        }

        let mut data_aug = Array5::<f32>::zeros(data.raw_dim());
        let mut labels_aug = Array2::<f32>::zeros((n, d));

        for idx in 0..n {
            let label = labels.index_axis(Axis(0), idx);
            let hr = self.estimator.estimate(label, label, self.diff_flag, self.fs).hr_bpm;
            let draw = ClipDraw {
                rand1: self.rng.gen::<f64>(),
                offset: self.rng.gen_range(0..=d / 2 - 1),
            };
            let plan = choose_resample(hr, draw);
            debug!(idx, hr, ?plan, "temporal augmentation");

            let (clip, clip_label) = resample_clip(data.index_axis(Axis(0), idx), label, plan);
            data_aug.index_axis_mut(Axis(0), idx).assign(&clip);
            labels_aug.index_axis_mut(Axis(0), idx).assign(&clip_label);
        }

        // One draw for the whole batch.
        let rand2: f64 = self.rng.gen();
        if rand2 < 0.5 {
            data_aug = mirror_width(data_aug.view());
        }
        Ok((data_aug, labels_aug))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
