//! Integration tests for [`rppg_train::losses`].
//!
//! The ndarray loss is always tested. The tensor loss needs the
//! `tch-backend` feature.
//!
//! All inputs are constructed from fixed, deterministic data.

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use rppg_train::error::TrainError;
use rppg_train::losses::{pearson, LossAccumulator, LossContext, NegPearsonLoss};

fn ctx() -> LossContext {
    LossContext { epoch: 0, fs: 30.0, diff_flag: true }
}

fn wave(len: usize, freq: f32, phase: f32) -> Array1<f32> {
    Array1::from_shape_fn(len, |t| (freq * t as f32 + phase).sin())
}

fn batch(rows: &[Array1<f32>]) -> Array2<f32> {
    let d = rows[0].len();
    Array2::from_shape_fn((rows.len(), d), |(i, t)| rows[i][t])
}

// ---------------------------------------------------------------------------
// NegPearsonLoss
// ---------------------------------------------------------------------------

/// The loss is invariant to affine rescaling of the prediction.
#[test]
fn loss_ignores_gain_and_offset() {
    let label = wave(64, 0.3, 0.0);
    let pred = label.mapv(|v| 4.0 * v - 2.5);
    assert_abs_diff_eq!(NegPearsonLoss::pair(pred.view(), label.view()), 0.0, epsilon = 1e-6);
}

/// The loss stays within `[0, 2]` for arbitrary non-constant signals.
#[test]
fn loss_lies_in_unit_range() {
    let label = wave(48, 0.21, 0.0);
    for phase in [0.0_f32, 0.7, 1.6, 3.1, 4.4] {
        let pred = wave(48, 0.21, phase);
        let l = NegPearsonLoss::pair(pred.view(), label.view());
        assert!((0.0..=2.0 + 1e-9).contains(&l), "loss {l} outside [0, 2]");
    }
}

#[test]
fn pearson_is_symmetric() {
    let a = wave(32, 0.4, 0.0);
    let b = wave(32, 0.4, 0.9);
    assert_abs_diff_eq!(pearson(a.view(), b.view()), pearson(b.view(), a.view()), epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// LossAccumulator
// ---------------------------------------------------------------------------

/// A batch of `N` identical clips has the same mean loss as one clip.
#[test]
fn identical_items_mean_equals_single_item() {
    let acc = LossAccumulator::new(NegPearsonLoss);
    let p = wave(40, 0.25, 0.5);
    let l = wave(40, 0.25, 0.0);

    let single = acc.batch_mean(&batch(&[p.clone()]), &batch(&[l.clone()]), ctx()).unwrap();
    for n in [2_usize, 3, 8] {
        let preds = batch(&vec![p.clone(); n]);
        let labels = batch(&vec![l.clone(); n]);
        let mean = acc.batch_mean(&preds, &labels, ctx()).unwrap();
        assert_abs_diff_eq!(mean, single, epsilon = 1e-9);
    }
}

/// Per-item losses come back in batch order.
#[test]
fn per_item_preserves_batch_order() {
    let acc = LossAccumulator::new(NegPearsonLoss);
    let l = wave(40, 0.25, 0.0);
    let preds = batch(&[l.clone(), l.mapv(|v| -v)]);
    let labels = batch(&[l.clone(), l]);

    let items = acc.per_item(&preds, &labels, ctx()).unwrap();
    assert_eq!(items.len(), 2);
    assert_abs_diff_eq!(items[0], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(items[1], 2.0, epsilon = 1e-6);

    let mean = acc.batch_mean(&preds, &labels, ctx()).unwrap();
    assert_abs_diff_eq!(mean, 1.0, epsilon = 1e-6);
}

#[test]
fn empty_and_mismatched_batches_are_errors() {
    let acc = LossAccumulator::new(NegPearsonLoss);
    let empty = Array2::<f32>::zeros((0, 16));
    assert!(matches!(acc.batch_mean(&empty, &empty, ctx()), Err(TrainError::EmptyBatch)));

    let two = Array2::<f32>::zeros((2, 16));
    let three = Array2::<f32>::zeros((3, 16));
    assert!(matches!(
        acc.per_item(&two, &three, ctx()),
        Err(TrainError::ShapeMismatch { .. })
    ));
}

// ---------------------------------------------------------------------------
// Tensor loss
// ---------------------------------------------------------------------------

#[cfg(feature = "tch-backend")]
mod tch_tests {
    use super::*;
    use rppg_train::losses::TchNegPearsonLoss;
    use tch::{Kind, Tensor};

    fn to_tensor(a: &Array2<f32>) -> Tensor {
        let (n, d) = a.dim();
        Tensor::from_slice(a.as_slice().unwrap()).reshape([n as i64, d as i64])
    }

    /// Gradients flow through the batch mean back to the prediction.
    #[test]
    fn batch_mean_is_differentiable() {
        let acc = LossAccumulator::new(TchNegPearsonLoss);
        let l = wave(32, 0.3, 0.0);
        let p = wave(32, 0.3, 0.8);
        let labels = to_tensor(&batch(&[l.clone(), l]));
        let pred = to_tensor(&batch(&[p.clone(), p])).set_requires_grad(true);

        let loss = acc.batch_mean(&pred, &labels, ctx()).unwrap();
        loss.backward();
        let grad = pred.grad();
        assert_eq!(grad.size(), vec![2, 32]);
        assert!(grad.abs().sum(Kind::Float).double_value(&[]) > 0.0);
    }
}
