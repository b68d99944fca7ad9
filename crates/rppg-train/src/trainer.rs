//! Training, evaluation and extraction orchestration.
//!
//! [`Trainer`] owns the model, the optimiser schedule and the best-epoch state
//! and exposes the four entry points of a run:
//!
//! | entry point            | needs split  | weights                                    |
//! |------------------------|--------------|--------------------------------------------|
//! | [`Trainer::train`]     | `train`      | trained in place, checkpoint every epoch    |
//! | [`Trainer::valid`]     | `valid`      | current                                     |
//! | [`Trainer::test`]      | `test`       | inference path, last epoch or best epoch    |
//! | [`Trainer::extract`]   | `extract`    | inference path                              |
//!
//! [`run_toolbox`] dispatches on the configured [`ToolboxMode`].

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array, Dimension};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};
use tracing::{debug, info, warn};

use crate::aggregate::{ChunkAggregator, ExtractionRecord};
use crate::augment::TemporalAugmenter;
use crate::checkpoint::Checkpointer;
use crate::config::{ToolboxMode, TrainingConfig};
use crate::dataset::{DataSplits, RppgBatch};
use crate::error::{TrainError, TrainResult};
use crate::heart_rate::FftHeartRateEstimator;
use crate::losses::{LossAccumulator, LossContext, PerSampleLoss, TchNegPearsonLoss};
use crate::metrics::{HeartRateMetricsCollector, MetricsCollector};
use crate::model::RppgModel;
use crate::normalize::normalize_tensor;
use crate::schedule::OneCycleLr;
use crate::selection::{EpochState, ModelSelector};

/// Batches between running-loss log lines.
const LOG_EVERY: usize = 100;

/// Device requested by `config`, falling back to CPU when CUDA is missing.
pub fn select_device(config: &TrainingConfig) -> Device {
    if !config.use_gpu {
        return Device::Cpu;
    }
    if tch::Cuda::is_available() {
        if config.num_gpus > 1 {
            warn!("{} GPUs requested; training runs on device {} only", config.num_gpus, config.gpu_device_id);
        }
        Device::Cuda(config.gpu_device_id)
    } else {
        warn!("CUDA requested but not available; using CPU");
        Device::Cpu
    }
}

/// Drives the training, validation, test and extraction passes of one run.
pub struct Trainer<M, L = TchNegPearsonLoss, C = HeartRateMetricsCollector> {
    config: TrainingConfig,
    model: M,
    device: Device,
    loss: LossAccumulator<L>,
    metrics: C,
    checkpointer: Checkpointer,
    selector: ModelSelector,
    state: EpochState,
    augmenter: TemporalAugmenter<FftHeartRateEstimator, StdRng>,
    lr_history: Vec<f64>,
}

impl<M: RppgModel> Trainer<M> {
    /// Trainer with the default negative-Pearson loss and heart-rate metrics.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Config`] when `config` fails validation.
    pub fn new(config: TrainingConfig, model: M, device: Device) -> TrainResult<Self> {
        Self::with_components(
            config,
            model,
            device,
            TchNegPearsonLoss,
            HeartRateMetricsCollector::default(),
        )
    }
}

impl<M, L, C> Trainer<M, L, C>
where
    M: RppgModel,
    L: PerSampleLoss<Batch = Tensor, Loss = Tensor>,
    C: MetricsCollector,
{
    /// Trainer with a custom per-clip loss and metrics collector.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Config`] when `config` fails validation.
    pub fn with_components(
        config: TrainingConfig,
        model: M,
        device: Device,
        loss: L,
        metrics: C,
    ) -> TrainResult<Self> {
        config.validate()?;
        let augmenter = TemporalAugmenter::new(
            FftHeartRateEstimator::default(),
            StdRng::seed_from_u64(config.seed),
            config.valid_fs,
            config.diff_flag(),
        );
        Ok(Trainer {
            checkpointer: Checkpointer::from_config(&config),
            selector: ModelSelector::from_use_last_epoch(config.use_last_epoch),
            state: EpochState::default(),
            loss: LossAccumulator::new(loss),
            config,
            model,
            device,
            metrics,
            augmenter,
            lr_history: Vec::new(),
        })
    }

    /// Return a reference to the active training configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The model being trained.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Best-epoch state accumulated so far.
    pub fn epoch_state(&self) -> &EpochState {
        &self.state
    }

    /// The metrics collector.
    pub fn metrics(&self) -> &C {
        &self.metrics
    }

    /// Checkpoint naming for this run.
    pub fn checkpointer(&self) -> &Checkpointer {
        &self.checkpointer
    }

    /// Learning rate applied at each optimiser step of the last
    /// [`train`](Self::train) call.
    pub fn lr_history(&self) -> &[f64] {
        &self.lr_history
    }

    // -----------------------------------------------------------------------
    // train
    // -----------------------------------------------------------------------

    /// Train for `num_epochs` epochs.
    ///
    /// Every epoch ends with a checkpoint. Unless `use_last_epoch` is set, the
    /// validation split is evaluated after each epoch and the best epoch
    /// recorded.
    ///
    /// # Errors
    ///
    /// [`TrainError::Configuration`] without a training split (or without a
    /// validation split when validation is required).
    pub fn train(&mut self, splits: &DataSplits) -> TrainResult<()> {
        let train = splits.train.as_ref().ok_or_else(|| TrainError::missing_split("training"))?;

        let epochs = self.config.num_epochs;
        let steps_per_epoch = train.num_batches();
        let schedule = OneCycleLr::new(self.config.learning_rate, epochs, steps_per_epoch);
        let mut opt = nn::AdamW { wd: 0.0, ..Default::default() }
            .build(self.model.var_store(), schedule.lr(0))?;
        let ctx = LossContext {
            epoch: 0,
            fs: self.config.train_fs,
            diff_flag: self.config.diff_flag(),
        };

        info!(
            "Training {} for {epochs} epochs, {steps_per_epoch} steps per epoch",
            train.dataset().name()
        );

        self.lr_history.clear();
        let mut step = 0usize;
        for epoch in 0..epochs {
            info!("==== Training Epoch: {epoch} ====");
            let bar = progress_bar(steps_per_epoch, format!("Train epoch {epoch}"));
            let ctx = LossContext { epoch, ..ctx };
            let mut running_loss = 0.0;
            let mut epoch_losses = Vec::with_capacity(steps_per_epoch);

            for (idx, batch) in train.iter_epoch(epoch).enumerate() {
                let mut batch = batch?;
                if self.config.augment {
                    let (data, labels) = self.augmenter.augment(batch.data.view(), batch.labels.view())?;
                    batch.data = data;
                    batch.labels = labels;
                }
                let (data, labels) = self.batch_tensors(&batch);

                let lr = schedule.lr(step);
                opt.set_lr(lr);
                opt.set_momentum(schedule.momentum(step));
                opt.zero_grad();

                let pred = normalize_tensor(&self.model.forward_t(&data, true));
                let loss = self.loss.batch_mean(&pred, &labels, ctx)?;
                loss.backward();
                opt.step();
                self.lr_history.push(lr);
                step += 1;

                let value = loss.double_value(&[]);
                running_loss += value;
                epoch_losses.push(value);
                if idx % LOG_EVERY == LOG_EVERY - 1 {
                    info!("[{epoch}, {:5}] loss: {:.3}", idx + 1, running_loss / LOG_EVERY as f64);
                    running_loss = 0.0;
                }
                bar.set_message(format!("loss={value:.4} lr={lr:.2e}"));
                bar.inc(1);
            }
            bar.finish_and_clear();

            let mean_loss = mean(&epoch_losses);
            info!(epoch, mean_loss, "epoch finished");
            self.checkpointer.save(self.model.var_store(), epoch)?;

            if self.selector.validates() {
                let valid_loss = self.valid(splits)?;
                info!("validation loss: {valid_loss:.6}");
                if self.state.update(valid_loss, epoch) {
                    info!("Update best model! Best epoch: {epoch}");
                }
            }
        }

        if self.selector.validates() {
            if let Some(min_loss) = self.state.min_valid_loss {
                info!("best trained epoch: {}, min_val_loss: {min_loss:.6}", self.state.best_epoch);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // valid
    // -----------------------------------------------------------------------

    /// Mean per-clip loss over the whole validation split.
    ///
    /// The loss receives `num_epochs` as its epoch index and the validation
    /// sampling rate.
    ///
    /// # Errors
    ///
    /// [`TrainError::Configuration`] without a validation split,
    /// [`TrainError::EmptyBatch`] when the split yields no clips.
    pub fn valid(&mut self, splits: &DataSplits) -> TrainResult<f64> {
        let valid = splits.valid.as_ref().ok_or_else(|| TrainError::missing_split("validation"))?;
        info!("===Validating===");

        let ctx = LossContext {
            epoch: self.config.num_epochs,
            fs: self.config.valid_fs,
            diff_flag: self.config.diff_flag(),
        };
        let _guard = tch::no_grad_guard();
        let bar = progress_bar(valid.num_batches(), "Validation".to_string());
        let mut losses = Vec::new();
        for batch in valid.iter() {
            let batch = batch?;
            let (data, labels) = self.batch_tensors(&batch);
            let pred = normalize_tensor(&self.model.forward_t(&data, false));
            for item in self.loss.per_item(&pred, &labels, ctx)? {
                losses.push(item.double_value(&[]));
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        if losses.is_empty() {
            return Err(TrainError::EmptyBatch);
        }
        Ok(mean(&losses))
    }

    // -----------------------------------------------------------------------
    // test
    // -----------------------------------------------------------------------

    /// Predict the test split, reassemble per-subject signals and hand them to
    /// the metrics collector.
    ///
    /// In `only_test` mode the inference weights are loaded; otherwise the
    /// last-epoch or best-epoch checkpoint of this run.
    ///
    /// # Errors
    ///
    /// [`TrainError::Configuration`] without a test split or, in `only_test`
    /// mode, when the inference path is unset or missing.
    /// [`TrainError::WeightsNotFound`] when the selected checkpoint is absent.
    pub fn test(&mut self, splits: &DataSplits) -> TrainResult<()> {
        let test = splits.test.as_ref().ok_or_else(|| TrainError::missing_split("test"))?;
        info!("===Testing===");

        let weights = if self.config.toolbox_mode == ToolboxMode::OnlyTest {
            self.inference_weights()?
        } else {
            let epoch = self.selector.selected_epoch(&self.state, self.config.last_epoch());
            match self.selector {
                ModelSelector::LastEpoch => info!("Testing uses last epoch as non-pretrained model!"),
                ModelSelector::BestValidation => info!("Testing uses best epoch selected using model selection as non-pretrained model!"),
            }
            self.checkpointer.checkpoint_path(epoch)
        };
        info!("Testing with weights {}", weights.display());
        Checkpointer::load(self.model.var_store_mut(), &weights)?;

        let _guard = tch::no_grad_guard();
        let mut aggregator = ChunkAggregator::new(self.config.chunk_len);
        let bar = progress_bar(test.num_batches(), "Test".to_string());
        for batch in test.iter() {
            let batch = batch?;
            let (data, _) = self.batch_tensors(&batch);
            let pred = normalize_tensor(&self.model.forward_t(&data, false));
            let pred_flat = tensor_to_vec(&pred)?;
            let labels_flat: Vec<f32> = batch.labels.iter().copied().collect();
            aggregator.insert_batch(&pred_flat, &labels_flat, &batch.meta)?;
            bar.inc(1);
        }
        bar.finish_and_clear();

        debug!("Reassembled {} subjects", aggregator.num_subjects());
        let (predictions, labels) = aggregator.into_maps();
        self.metrics.collect(&predictions, &labels, &self.config)
    }

    // -----------------------------------------------------------------------
    // extract
    // -----------------------------------------------------------------------

    /// Run inference on the extraction split and write the raw (not
    /// normalised) predictions as two CSV tables.
    ///
    /// Returns the paths of the wide and long tables. Success is also logged
    /// by the writer, so callers such as [`run_toolbox`] may drop the paths.
    ///
    /// # Errors
    ///
    /// [`TrainError::Configuration`] without an extraction split or when the
    /// inference path is unset or missing.
    pub fn extract(&mut self, splits: &DataSplits) -> TrainResult<(PathBuf, PathBuf)> {
        let data = splits.extract.as_ref().ok_or_else(|| TrainError::missing_split("extraction"))?;
        info!("===Extracting===");

        let weights = self.inference_weights()?;
        Checkpointer::load(self.model.var_store_mut(), &weights)?;

        let _guard = tch::no_grad_guard();
        let mut record = ExtractionRecord::new(self.config.chunk_len);
        let bar = progress_bar(data.num_batches(), "Extract".to_string());
        for batch in data.iter() {
            let batch = batch?;
            let (clips, _) = self.batch_tensors(&batch);
            let pred = self.model.forward_t(&clips, false);
            record.insert_batch(&tensor_to_vec(&pred)?, &batch.meta)?;
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!("Extracted {} chunks", record.len());
        record.write_tables(&self.config.extract_output_dir)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Configured inference weights; must exist on disk.
    fn inference_weights(&self) -> TrainResult<PathBuf> {
        let path = self
            .config
            .inference_model_path
            .as_ref()
            .ok_or_else(|| TrainError::configuration("Inference model path is not set"))?;
        if !path.exists() {
            return Err(TrainError::configuration(format!(
                "Inference model path {} does not exist",
                path.display()
            )));
        }
        Ok(path.clone())
    }

    fn batch_tensors(&self, batch: &RppgBatch) -> (Tensor, Tensor) {
        (
            array_to_tensor(&batch.data, self.device),
            array_to_tensor(&batch.labels, self.device),
        )
    }
}

/// Dispatch `trainer` according to its configured mode.
///
/// - `train_and_test`: train, then test.
/// - `only_test`: test with the inference weights.
/// - `extract_only`: extract with the inference weights.
pub fn run_toolbox<M, L, C>(trainer: &mut Trainer<M, L, C>, splits: &DataSplits) -> TrainResult<()>
where
    M: RppgModel,
    L: PerSampleLoss<Batch = Tensor, Loss = Tensor>,
    C: MetricsCollector,
{
    match trainer.config().toolbox_mode {
        ToolboxMode::TrainAndTest => {
            trainer.train(splits)?;
            trainer.test(splits)
        }
        ToolboxMode::OnlyTest => trainer.test(splits),
        ToolboxMode::ExtractOnly => trainer.extract(splits).map(|_| ()),
    }
}

fn progress_bar(len: usize, prefix: String) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar.set_prefix(prefix);
    bar
}

fn array_to_tensor<D: Dimension>(a: &Array<f32, D>, device: Device) -> Tensor {
    let shape: Vec<i64> = a.shape().iter().map(|&s| s as i64).collect();
    let flat: Vec<f32> = a.iter().copied().collect();
    Tensor::from_slice(&flat).reshape(shape.as_slice()).to_device(device)
}

/// Flatten a tensor into one value per element, in row-major order.
fn tensor_to_vec(t: &Tensor) -> TrainResult<Vec<f32>> {
    let flat = t.to_device(Device::Cpu).to_kind(Kind::Float).contiguous().reshape([-1]);
    Ok(Vec::<f32>::try_from(&flat)?)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
