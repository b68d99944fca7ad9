//! rPPG model interface and a small baseline network.
//!
//! The trainer talks to models only through [`RppgModel`]: a forward pass
//! from a clip batch to a waveform batch plus access to the parameter store
//! (optimiser construction, checkpoint save/load).
//!
//! # Baseline architecture
//!
//! ```text
//! Input [N, D, C, H, W]
//!   │
//!   ▼ spatial mean over (H, W)
//! [N, D, C] → transpose → [N, C, D]
//!   │
//!   ▼ Conv1d(C → hidden, k) → BatchNorm → ReLU
//!   ▼ Conv1d(hidden → hidden, k) → BatchNorm → ReLU
//!   ▼ Conv1d(hidden → 1, 1)
//! [N, 1, D] → squeeze → [N, D]
//! ```
//!
//! Padding keeps the temporal length unchanged for odd kernel sizes.

use tch::{nn, nn::Module, nn::ModuleT, Device, Kind, Tensor};

/// A model mapping `[N, D, C, H, W]` clips to `[N, D]` waveforms.
pub trait RppgModel {
    /// Forward pass. `train` toggles training-mode layers (batch norm).
    fn forward_t(&self, clips: &Tensor, train: bool) -> Tensor;

    /// The parameter store (optimiser construction, checkpoint save).
    fn var_store(&self) -> &nn::VarStore;

    /// Mutable parameter store (checkpoint load).
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    /// Count trainable parameters.
    fn num_parameters(&self) -> usize {
        self.var_store()
            .trainable_variables()
            .iter()
            .map(|t| t.numel())
            .sum()
    }
}

/// Hyper-parameters of [`BaselineRppgNet`].
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineConfig {
    /// Input colour channels. Default: **3**.
    pub in_channels: i64,
    /// Width of the temporal convolutions. Default: **32**.
    pub hidden: i64,
    /// Temporal kernel size (odd). Default: **5**.
    pub kernel_size: i64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self { in_channels: 3, hidden: 32, kernel_size: 5 }
    }
}

/// Spatially pooled temporal CNN.
///
/// All layers are registered in the internal `VarStore` at construction, so a
/// freshly built instance can load any checkpoint written by another instance
/// with the same [`BaselineConfig`].
pub struct BaselineRppgNet {
    vs: nn::VarStore,
    conv1: nn::Conv1D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv1D,
    bn2: nn::BatchNorm,
    head: nn::Conv1D,
}

impl BaselineRppgNet {
    /// Create a new model on `device` with freshly initialised weights.
    pub fn new(config: &BaselineConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let conv_cfg = nn::ConvConfig { padding: config.kernel_size / 2, ..Default::default() };

        let conv1 = nn::conv1d(&root / "conv1", config.in_channels, config.hidden, config.kernel_size, conv_cfg);
        let bn1 = nn::batch_norm1d(&root / "bn1", config.hidden, Default::default());
        let conv2 = nn::conv1d(&root / "conv2", config.hidden, config.hidden, config.kernel_size, conv_cfg);
        let bn2 = nn::batch_norm1d(&root / "bn2", config.hidden, Default::default());
        let head = nn::conv1d(&root / "head", config.hidden, 1, 1, Default::default());

        BaselineRppgNet { vs, conv1, bn1, conv2, bn2, head }
    }
}

impl RppgModel for BaselineRppgNet {
    fn forward_t(&self, clips: &Tensor, train: bool) -> Tensor {
        // [N, D, C, H, W] -> [N, D, C] -> [N, C, D]
        let x = clips
            .to_kind(Kind::Float)
            .mean_dim(&[3_i64, 4][..], false, Kind::Float)
            .transpose(1, 2);
        let x = self.bn1.forward_t(&self.conv1.forward(&x), train).relu();
        let x = self.bn2.forward_t(&self.conv2.forward(&x), train).relu();
        self.head.forward(&x).squeeze_dim(1)
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpointer;
    use tempfile::TempDir;

    fn clips(n: i64, d: i64) -> Tensor {
        Tensor::rand([n, d, 3, 6, 6], (Kind::Float, Device::Cpu))
    }

    #[test]
    fn forward_maps_clips_to_waveforms() {
        tch::manual_seed(0);
        let model = BaselineRppgNet::new(&BaselineConfig::default(), Device::Cpu);
        let out = model.forward_t(&clips(2, 20), true);
        assert_eq!(out.size(), vec![2, 20]);
        let out = tch::no_grad(|| model.forward_t(&clips(3, 11), false));
        assert_eq!(out.size(), vec![3, 11]);
    }

    #[test]
    fn model_has_trainable_parameters() {
        let model = BaselineRppgNet::new(&BaselineConfig::default(), Device::Cpu);
        assert!(model.num_parameters() > 0);
    }

    #[test]
    fn checkpoint_restores_identical_outputs() {
        tch::manual_seed(1);
        let tmp = TempDir::new().unwrap();
        let cfg = BaselineConfig { hidden: 8, ..BaselineConfig::default() };
        let a = BaselineRppgNet::new(&cfg, Device::Cpu);
        let path = Checkpointer::new(tmp.path(), "net").save(a.var_store(), 0).unwrap();

        tch::manual_seed(2);
        let mut b = BaselineRppgNet::new(&cfg, Device::Cpu);
        Checkpointer::load(b.var_store_mut(), &path).unwrap();

        let x = clips(2, 16);
        let ya = tch::no_grad(|| a.forward_t(&x, false));
        let yb = tch::no_grad(|| b.forward_t(&x, false));
        let diff = (ya - yb).abs().max().double_value(&[]);
        assert!(diff < 1e-6, "outputs differ by {diff}");
    }
}
