//! End-to-end tests for [`rppg_train::trainer`].
//!
//! Every run uses the synthetic dataset, a tiny baseline network on CPU and
//! writes checkpoints, reports and tables into a [`tempfile::TempDir`].

#![cfg(feature = "tch-backend")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use approx::assert_abs_diff_eq;
use rppg_train::aggregate::{ExtractionRecord, LONG_TABLE_FILE, WIDE_TABLE_FILE};
use rppg_train::config::{ToolboxMode, TrainingConfig};
use rppg_train::dataset::DataSplits;
use rppg_train::error::TrainError;
use rppg_train::losses::{LossContext, PerSampleLoss, TchNegPearsonLoss};
use rppg_train::metrics::{HeartRateMetricsCollector, METRICS_FILE};
use rppg_train::model::{BaselineConfig, BaselineRppgNet, RppgModel};
use rppg_train::normalize::normalize_tensor;
use rppg_train::schedule::OneCycleLr;
use rppg_train::trainer::{run_toolbox, Trainer};
use tch::{Device, Kind, Tensor};
use tempfile::TempDir;

const SAMPLES: usize = 4;

fn tiny_config(tmp: &TempDir) -> TrainingConfig {
    let mut cfg = TrainingConfig::default();
    cfg.chunk_len = 16;
    cfg.batch_size = 2;
    cfg.num_epochs = 2;
    cfg.learning_rate = 1e-3;
    cfg.model_dir = tmp.path().join("models");
    cfg.log_dir = tmp.path().join("logs");
    cfg.extract_output_dir = tmp.path().join("extract");
    cfg
}

fn tiny_model() -> BaselineRppgNet {
    tch::manual_seed(0);
    let cfg_model = BaselineConfig { hidden: 4, ..BaselineConfig::default() };
    BaselineRppgNet::new(&cfg_model, Device::Cpu)
}

fn trainer(cfg: TrainingConfig) -> Trainer<BaselineRppgNet> {
    Trainer::new(cfg, tiny_model(), Device::Cpu).unwrap()
}

/// Negative Pearson loss that remembers the index and context of every call.
#[derive(Clone, Default)]
struct RecordingLoss {
    calls: Arc<Mutex<Vec<(usize, LossContext)>>>,
}

impl RecordingLoss {
    fn calls(&self) -> Vec<(usize, LossContext)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PerSampleLoss for RecordingLoss {
    type Batch = Tensor;
    type Loss = Tensor;

    fn num_items(&self, batch: &Tensor) -> usize {
        TchNegPearsonLoss.num_items(batch)
    }

    fn item_loss(&self, pred: &Tensor, labels: &Tensor, idx: usize, ctx: LossContext) -> Tensor {
        self.calls.lock().unwrap().push((idx, ctx));
        TchNegPearsonLoss.item_loss(pred, labels, idx, ctx)
    }
}

fn recording_trainer(cfg: TrainingConfig, loss: RecordingLoss) -> Trainer<BaselineRppgNet, RecordingLoss> {
    let metrics = HeartRateMetricsCollector::default().without_report();
    Trainer::with_components(cfg, tiny_model(), Device::Cpu, loss, metrics).unwrap()
}

fn to_tensor(a: &ndarray::Array5<f32>) -> Tensor {
    let shape: Vec<i64> = a.shape().iter().map(|&s| s as i64).collect();
    let flat: Vec<f32> = a.iter().copied().collect();
    Tensor::from_slice(&flat).reshape(shape.as_slice())
}

fn to_vec(t: &Tensor) -> Vec<f32> {
    Vec::<f32>::try_from(&t.to_kind(Kind::Float).contiguous().reshape([-1])).unwrap()
}

/// Training writes one checkpoint per epoch, records the best epoch and the
/// test pass writes the metrics report.
#[test]
fn train_and_test_writes_checkpoints_and_metrics() {
    let tmp = TempDir::new().unwrap();
    let cfg = tiny_config(&tmp);
    let splits = DataSplits::synthetic(&cfg, SAMPLES);
    let mut t = trainer(cfg.clone());

    run_toolbox(&mut t, &splits).unwrap();

    for epoch in 0..cfg.num_epochs {
        assert!(t.checkpointer().checkpoint_path(epoch).exists(), "epoch {epoch} checkpoint missing");
    }
    let state = t.epoch_state();
    assert!(state.min_valid_loss.unwrap().is_finite());
    assert!(state.best_epoch < cfg.num_epochs);

    assert!(cfg.log_dir.join(METRICS_FILE).exists());
    assert_eq!(t.metrics().last().unwrap().per_subject.len(), 1);
}

/// With `use_last_epoch` no validation split is needed.
#[test]
fn last_epoch_selection_skips_validation() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = tiny_config(&tmp);
    cfg.use_last_epoch = true;
    cfg.augment = true;
    let mut splits = DataSplits::synthetic(&cfg, SAMPLES);
    splits.valid = None;
    let mut t = trainer(cfg);

    run_toolbox(&mut t, &splits).unwrap();
    assert_eq!(t.epoch_state().min_valid_loss, None);
}

/// Validating without a validation split is a configuration error.
#[test]
fn best_epoch_selection_requires_validation_split() {
    let tmp = TempDir::new().unwrap();
    let cfg = tiny_config(&tmp);
    let mut splits = DataSplits::synthetic(&cfg, SAMPLES);
    splits.valid = None;
    let mut t = trainer(cfg);
    assert!(matches!(t.train(&splits), Err(TrainError::Configuration(_))));
}

#[test]
fn missing_training_split_is_a_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let mut t = trainer(tiny_config(&tmp));
    assert!(matches!(t.train(&DataSplits::default()), Err(TrainError::Configuration(_))));
}

/// `only_test` refuses to run without existing inference weights.
#[test]
fn only_test_requires_existing_weights() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = tiny_config(&tmp);
    cfg.toolbox_mode = ToolboxMode::OnlyTest;
    cfg.inference_model_path = Some(tmp.path().join("absent.pth"));
    let splits = DataSplits::synthetic(&cfg, SAMPLES);
    let mut t = trainer(cfg);
    assert!(matches!(run_toolbox(&mut t, &splits), Err(TrainError::Configuration(_))));
}

/// Weights saved by a training run can be used for extraction.
#[test]
fn extract_writes_prediction_tables() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = tiny_config(&tmp);
    cfg.use_last_epoch = true;
    cfg.num_epochs = 1;
    let splits = DataSplits::synthetic(&cfg, SAMPLES);

    let mut t = trainer(cfg.clone());
    t.train(&splits).unwrap();
    let weights = t.checkpointer().checkpoint_path(0);

    cfg.toolbox_mode = ToolboxMode::ExtractOnly;
    cfg.inference_model_path = Some(weights);
    let mut t = trainer(cfg.clone());
    let (wide, long) = t.extract(&splits).unwrap();

    assert_eq!(wide, cfg.extract_output_dir.join(WIDE_TABLE_FILE));
    assert_eq!(long, cfg.extract_output_dir.join(LONG_TABLE_FILE));
    let wide_text = std::fs::read_to_string(&wide).unwrap();
    assert_eq!(wide_text.lines().count(), SAMPLES + 1);
    let long_text = std::fs::read_to_string(&long).unwrap();
    assert_eq!(long_text.lines().count(), SAMPLES * cfg.chunk_len + 1);
}

/// Validation scores every clip with the final epoch index and the
/// validation sampling rate.
#[test]
fn validation_loss_sees_final_epoch_and_valid_rate() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = tiny_config(&tmp);
    cfg.train_fs = 30.0;
    cfg.valid_fs = 25.0;
    let splits = DataSplits::synthetic(&cfg, SAMPLES);
    let loss = RecordingLoss::default();
    let mut t = recording_trainer(cfg.clone(), loss.clone());

    t.valid(&splits).unwrap();

    let expected = LossContext { epoch: cfg.num_epochs, fs: 25.0, diff_flag: cfg.diff_flag() };
    let calls = loss.calls();
    assert_eq!(calls.len(), SAMPLES);
    assert!(calls.iter().all(|&(_, ctx)| ctx == expected), "{calls:?}");
}

/// The learning-rate schedule advances once per batch, and each batch loss
/// carries its own epoch index and the training rate.
#[test]
fn schedule_steps_once_per_batch() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = tiny_config(&tmp);
    cfg.train_fs = 30.0;
    cfg.valid_fs = 25.0;
    let splits = DataSplits::synthetic(&cfg, SAMPLES);
    let batches = splits.train.as_ref().unwrap().num_batches();
    assert_eq!(batches, 2);
    let loss = RecordingLoss::default();
    let mut t = recording_trainer(cfg.clone(), loss.clone());

    t.train(&splits).unwrap();

    let schedule = OneCycleLr::new(cfg.learning_rate, cfg.num_epochs, batches);
    let expected: Vec<f64> = (0..schedule.total_steps()).map(|s| schedule.lr(s)).collect();
    assert_eq!(t.lr_history().len(), cfg.num_epochs * batches);
    assert_eq!(t.lr_history(), expected.as_slice());
    assert!(t.lr_history()[0] != t.lr_history()[1], "rate must change within an epoch");

    let calls = loss.calls();
    let batch_epochs: Vec<usize> = calls
        .iter()
        .filter(|(idx, ctx)| *idx == 0 && ctx.fs == cfg.train_fs)
        .map(|(_, ctx)| ctx.epoch)
        .collect();
    assert_eq!(batch_epochs, vec![0, 0, 1, 1]);
    let valid_calls = calls.iter().filter(|(_, ctx)| ctx.fs == cfg.valid_fs).count();
    assert_eq!(valid_calls, cfg.num_epochs * SAMPLES);
    assert!(calls
        .iter()
        .filter(|(_, ctx)| ctx.fs == cfg.valid_fs)
        .all(|(_, ctx)| ctx.epoch == cfg.num_epochs));
}

/// Extracted tables hold the raw model output, not the normalised waveform.
#[test]
fn extract_writes_raw_model_output() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = tiny_config(&tmp);
    cfg.use_last_epoch = true;
    cfg.num_epochs = 1;
    let splits = DataSplits::synthetic(&cfg, SAMPLES);

    let mut t = trainer(cfg.clone());
    t.train(&splits).unwrap();
    cfg.toolbox_mode = ToolboxMode::ExtractOnly;
    cfg.inference_model_path = Some(t.checkpointer().checkpoint_path(0));
    let mut t = trainer(cfg.clone());
    let (wide, _) = t.extract(&splits).unwrap();

    let text = std::fs::read_to_string(&wide).unwrap();
    let written: HashMap<String, Vec<f32>> = text
        .lines()
        .skip(1)
        .map(|line| {
            let mut cells = line.split(',');
            let key = cells.next().unwrap().to_string();
            (key, cells.map(|c| c.parse().unwrap()).collect())
        })
        .collect();
    assert_eq!(written.len(), SAMPLES);

    let _guard = tch::no_grad_guard();
    let mut differs_from_normalised = false;
    for batch in splits.extract.as_ref().unwrap().iter() {
        let batch = batch.unwrap();
        let pred = t.model().forward_t(&to_tensor(&batch.data), false);
        let raw = to_vec(&pred);
        let normalised = to_vec(&normalize_tensor(&pred));
        for (ib, meta) in batch.meta.iter().enumerate() {
            let row = &written[&ExtractionRecord::key(meta)];
            assert_eq!(row.len(), cfg.chunk_len);
            for (j, &v) in row.iter().enumerate() {
                let k = ib * cfg.chunk_len + j;
                assert_abs_diff_eq!(v, raw[k], epsilon = 1e-5);
                differs_from_normalised |= (v - normalised[k]).abs() > 1e-3;
            }
        }
    }
    assert!(differs_from_normalised);
}
