//! Per-clip losses and their batch aggregation.
//!
//! The loss collaborator is always evaluated one clip at a time, never on the
//! whole batch at once. [`LossAccumulator`] drives it:
//!
//! ```text
//! L_batch = (1 / N) · Σ_i loss(pred[i], labels[i], epoch, fs, diff_flag)
//! ```
//!
//! Two implementations of [`PerSampleLoss`] are provided:
//!
//! - [`NegPearsonLoss`] over ndarray signals (evaluation, tests),
//! - `TchNegPearsonLoss` over tch tensors (differentiable, behind the
//!   `tch-backend` feature).

use std::ops::{Add, Div};

use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{TrainError, TrainResult};

// ---------------------------------------------------------------------------
// Context and trait
// ---------------------------------------------------------------------------

/// Extra arguments forwarded to every per-clip loss call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossContext {
    /// Current epoch index. Validation passes the total epoch count.
    pub epoch: usize,
    /// Sampling rate of the signals in Hz.
    pub fs: f64,
    /// Whether labels are first-difference normalised.
    pub diff_flag: bool,
}

/// A loss evaluated on a single clip of a `[N, D]` batch.
pub trait PerSampleLoss {
    /// Container holding a `[N, D]` batch of signals.
    type Batch: ?Sized;
    /// Scalar loss for one clip.
    type Loss: Add<Output = Self::Loss> + Div<f64, Output = Self::Loss>;

    /// Number of clips `N` in `batch`.
    fn num_items(&self, batch: &Self::Batch) -> usize;

    /// Loss of clip `idx`.
    fn item_loss(
        &self,
        pred: &Self::Batch,
        labels: &Self::Batch,
        idx: usize,
        ctx: LossContext,
    ) -> Self::Loss;
}

// ---------------------------------------------------------------------------
// LossAccumulator
// ---------------------------------------------------------------------------

/// Computes per-clip losses and their batch mean.
#[derive(Debug, Clone)]
pub struct LossAccumulator<L> {
    loss: L,
}

impl<L: PerSampleLoss> LossAccumulator<L> {
    /// Wrap a per-clip loss.
    pub fn new(loss: L) -> Self {
        Self { loss }
    }

    /// The wrapped loss.
    pub fn loss(&self) -> &L {
        &self.loss
    }

    /// One loss value per clip, in batch order.
    ///
    /// # Errors
    ///
    /// [`TrainError::ShapeMismatch`] when `pred` and `labels` hold a different
    /// number of clips.
    pub fn per_item(
        &self,
        pred: &L::Batch,
        labels: &L::Batch,
        ctx: LossContext,
    ) -> TrainResult<Vec<L::Loss>> {
        let n = self.check_items(pred, labels)?;
        Ok((0..n).map(|i| self.loss.item_loss(pred, labels, i, ctx)).collect())
    }

    /// Sum of the per-clip losses divided by `N`.
    ///
    /// # Errors
    ///
    /// [`TrainError::EmptyBatch`] for `N = 0`, [`TrainError::ShapeMismatch`]
    /// when the clip counts disagree.
    pub fn batch_mean(
        &self,
        pred: &L::Batch,
        labels: &L::Batch,
        ctx: LossContext,
    ) -> TrainResult<L::Loss> {
        let n = self.check_items(pred, labels)?;
        let mut total = self.loss.item_loss(pred, labels, 0, ctx);
        for i in 1..n {
            total = total + self.loss.item_loss(pred, labels, i, ctx);
        }
        Ok(total / n as f64)
    }

    fn check_items(&self, pred: &L::Batch, labels: &L::Batch) -> TrainResult<usize> {
        let n = self.loss.num_items(pred);
        let m = self.loss.num_items(labels);
        if n != m {
            return Err(TrainError::shape_mismatch(vec![n], vec![m]));
        }
        if n == 0 {
            return Err(TrainError::EmptyBatch);
        }
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// NegPearsonLoss (ndarray)
// ---------------------------------------------------------------------------

/// `1 - r` where `r` is the Pearson correlation of prediction and label.
///
/// Ranges over `[0, 2]`; `NaN` when either signal is constant.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegPearsonLoss;

impl NegPearsonLoss {
    /// Loss for a single pair of equal-length signals.
    pub fn pair(pred: ArrayView1<'_, f32>, label: ArrayView1<'_, f32>) -> f64 {
        1.0 - pearson(pred, label)
    }
}

impl PerSampleLoss for NegPearsonLoss {
    type Batch = Array2<f32>;
    type Loss = f64;

    fn num_items(&self, batch: &Array2<f32>) -> usize {
        batch.len_of(Axis(0))
    }

    fn item_loss(
        &self,
        pred: &Array2<f32>,
        labels: &Array2<f32>,
        idx: usize,
        _ctx: LossContext,
    ) -> f64 {
        Self::pair(pred.index_axis(Axis(0), idx), labels.index_axis(Axis(0), idx))
    }
}

/// Pearson correlation of two equal-length signals, accumulated in `f64`.
pub fn pearson(x: ArrayView1<'_, f32>, y: ArrayView1<'_, f32>) -> f64 {
    let n = x.len().min(y.len()) as f64;
    let (mut sx, mut sy, mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y.iter()) {
        let (a, b) = (a as f64, b as f64);
        sx += a;
        sy += b;
        sxy += a * b;
        sxx += a * a;
        syy += b * b;
    }
    let num = n * sxy - sx * sy;
    let den = ((n * sxx - sx * sx) * (n * syy - sy * sy)).sqrt();
    num / den
}

// ---------------------------------------------------------------------------
// TchNegPearsonLoss
// ---------------------------------------------------------------------------

#[cfg(feature = "tch-backend")]
pub use tch_loss::TchNegPearsonLoss;

#[cfg(feature = "tch-backend")]
mod tch_loss {
    use super::{LossContext, PerSampleLoss};
    use tch::{Kind, Tensor};

    /// Differentiable negative-Pearson loss on `[N, D]` tensors.
    ///
    /// Each call returns a 0-d tensor attached to the autograd graph of
    /// `pred`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TchNegPearsonLoss;

    impl PerSampleLoss for TchNegPearsonLoss {
        type Batch = Tensor;
        type Loss = Tensor;

        fn num_items(&self, batch: &Tensor) -> usize {
            batch.size().first().copied().unwrap_or(0).max(0) as usize
        }

        fn item_loss(&self, pred: &Tensor, labels: &Tensor, idx: usize, _ctx: LossContext) -> Tensor {
            let x = pred.get(idx as i64);
            let y = labels.get(idx as i64).to_kind(Kind::Float);
            let n = x.size()[0] as f64;
            let sx = x.sum(Kind::Float);
            let sy = y.sum(Kind::Float);
            let sxy = (&x * &y).sum(Kind::Float);
            let sxx = (&x * &x).sum(Kind::Float);
            let syy = (&y * &y).sum(Kind::Float);
            let num = &sxy * n - &sx * &sy;
            let den = ((&sxx * n - &sx * &sx) * (&syy * n - &sy * &sy)).sqrt();
            -(num / den) + 1.0
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
