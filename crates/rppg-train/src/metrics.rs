//! Heart-rate evaluation of reassembled test predictions.
//!
//! A [`MetricsCollector`] receives the per-subject prediction and label maps
//! built by the test pass. The default [`HeartRateMetricsCollector`]:
//!
//! 1. concatenates each subject's chunks in sort-index order,
//! 2. estimates predicted and ground-truth heart rate for the subject,
//! 3. aggregates across subjects:
//!
//! ```text
//! MAE   = mean |hr_pred − hr_gt|
//! RMSE  = sqrt(mean (hr_pred − hr_gt)²)
//! MAPE  = 100 × mean |hr_pred − hr_gt| / hr_gt
//! ρ     = Pearson(hr_pred, hr_gt)
//! ```
//!
//! Subjects whose rate cannot be estimated are reported but excluded from the
//! aggregates. The report is logged and written to `{log_dir}/metrics.json`.

use std::path::PathBuf;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::SubjectPredictionMap;
use crate::config::TrainingConfig;
use crate::error::TrainResult;
use crate::heart_rate::{FftHeartRateEstimator, HeartRateEstimator};

/// File written under the log directory.
pub const METRICS_FILE: &str = "metrics.json";

/// Consumes the reassembled test predictions.
pub trait MetricsCollector {
    /// Evaluate `predictions` against `labels`.
    ///
    /// # Errors
    ///
    /// Implementations fail only on I/O or serialisation problems.
    fn collect(
        &mut self,
        predictions: &SubjectPredictionMap,
        labels: &SubjectPredictionMap,
        config: &TrainingConfig,
    ) -> TrainResult<()>;
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Estimated rates for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectHeartRate {
    /// Subject identifier.
    pub subject: String,
    /// Rate estimated from the prediction in BPM.
    pub predicted_bpm: f64,
    /// Rate estimated from the label in BPM.
    pub reference_bpm: f64,
}

/// Aggregated heart-rate metrics over the test set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateMetrics {
    /// Subjects with a finite estimate on both sides.
    pub num_subjects: usize,
    /// Mean absolute error in BPM.
    pub mae: f64,
    /// Root mean squared error in BPM.
    pub rmse: f64,
    /// Mean absolute percentage error.
    pub mape: f64,
    /// Pearson correlation between predicted and reference rates.
    pub pearson: f64,
    /// Per-subject breakdown, ordered by subject id.
    pub per_subject: Vec<SubjectHeartRate>,
}

impl HeartRateMetrics {
    /// Aggregate a per-subject breakdown.
    pub fn from_subjects(per_subject: Vec<SubjectHeartRate>) -> Self {
        let valid: Vec<(f64, f64)> = per_subject
            .iter()
            .filter(|s| s.predicted_bpm.is_finite() && s.reference_bpm.is_finite())
            .map(|s| (s.predicted_bpm, s.reference_bpm))
            .collect();
        let n = valid.len() as f64;

        let mae = valid.iter().map(|(p, r)| (p - r).abs()).sum::<f64>() / n;
        let rmse = (valid.iter().map(|(p, r)| (p - r).powi(2)).sum::<f64>() / n).sqrt();
        let mape = valid.iter().map(|(p, r)| ((p - r) / r).abs()).sum::<f64>() / n * 100.0;

        let pred: Vec<f64> = valid.iter().map(|v| v.0).collect();
        let refs: Vec<f64> = valid.iter().map(|v| v.1).collect();

        HeartRateMetrics {
            num_subjects: valid.len(),
            mae,
            rmse,
            mape,
            pearson: pearson_f64(&pred, &refs),
            per_subject,
        }
    }

    /// One-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "subjects={} MAE={:.3} RMSE={:.3} MAPE={:.3}% Pearson={:.4}",
            self.num_subjects, self.mae, self.rmse, self.mape, self.pearson
        )
    }
}

fn pearson_f64(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    if x.len() < 2 {
        return f64::NAN;
    }
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    sxy / (sxx * syy).sqrt()
}

// ---------------------------------------------------------------------------
// HeartRateMetricsCollector
// ---------------------------------------------------------------------------

/// Default collector: per-subject heart rate, then MAE/RMSE/MAPE/Pearson.
#[derive(Debug, Clone)]
pub struct HeartRateMetricsCollector<H = FftHeartRateEstimator> {
    estimator: H,
    write_report: bool,
    last: Option<HeartRateMetrics>,
}

impl Default for HeartRateMetricsCollector<FftHeartRateEstimator> {
    fn default() -> Self {
        Self::new(FftHeartRateEstimator::default())
    }
}

impl<H: HeartRateEstimator> HeartRateMetricsCollector<H> {
    /// Collector using `estimator`, writing `metrics.json` after each run.
    pub fn new(estimator: H) -> Self {
        Self { estimator, write_report: true, last: None }
    }

    /// Disable writing `metrics.json`; results stay available via
    /// [`last`](Self::last).
    pub fn without_report(mut self) -> Self {
        self.write_report = false;
        self
    }

    /// Metrics of the most recent [`collect`](MetricsCollector::collect).
    pub fn last(&self) -> Option<&HeartRateMetrics> {
        self.last.as_ref()
    }

    /// Evaluate without side effects.
    pub fn evaluate(
        &self,
        predictions: &SubjectPredictionMap,
        labels: &SubjectPredictionMap,
        config: &TrainingConfig,
    ) -> HeartRateMetrics {
        let mut per_subject = Vec::with_capacity(predictions.len());
        for (subject, chunks) in predictions {
            let label_chunks = match labels.get(subject) {
                Some(l) => l,
                None => {
                    warn!("No labels for subject {subject}; skipping");
                    continue;
                }
            };
            let pred = concat_chunks(chunks.values());
            let label = concat_chunks(label_chunks.values());
            let est = self.estimator.estimate(pred.view(), label.view(), config.diff_flag(), config.test_fs);
            per_subject.push(SubjectHeartRate {
                subject: subject.clone(),
                predicted_bpm: est.hr_bpm,
                reference_bpm: est.reference_bpm,
            });
        }
        HeartRateMetrics::from_subjects(per_subject)
    }
}

impl<H: HeartRateEstimator> MetricsCollector for HeartRateMetricsCollector<H> {
    fn collect(
        &mut self,
        predictions: &SubjectPredictionMap,
        labels: &SubjectPredictionMap,
        config: &TrainingConfig,
    ) -> TrainResult<()> {
        let metrics = self.evaluate(predictions, labels, config);
        info!("Test metrics: {}", metrics.summary());

        if self.write_report {
            std::fs::create_dir_all(&config.log_dir)?;
            let path: PathBuf = config.log_dir.join(METRICS_FILE);
            let json = serde_json::to_string_pretty(&metrics)?;
            std::fs::write(&path, json)?;
            info!("Metrics written to {}", path.display());
        }
        self.last = Some(metrics);
        Ok(())
    }
}

fn concat_chunks<'a>(chunks: impl Iterator<Item = &'a Array1<f32>>) -> Array1<f32> {
    let mut out = Vec::new();
    for c in chunks {
        out.extend(c.iter().copied());
    }
    Array1::from(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
