//! Dataset abstractions and concrete implementations for rPPG training.
//!
//! This module defines the [`RppgDataset`] trait plus two concrete
//! implementations:
//!
//! - [`NpyChunkDataset`]: reads preprocessed clip chunks stored as `.npy`
//!   files.
//! - [`SyntheticRppgDataset`]: generates fully-deterministic pulsatile clips;
//!   useful for unit tests, integration tests, and dry-run sanity checks.
//!
//! A [`DataLoader`] wraps any [`RppgDataset`] and yields collated
//! [`RppgBatch`]es with optional deterministic shuffle (seeded).
//! [`DataSplits`] bundles the loaders of one run.
//!
//! # Directory layout expected by `NpyChunkDataset`
//!
//! ```text
//! <root>/
//!   subject1_input0.npy    # frames  [D, H, W, C]
//!   subject1_label0.npy    # labels  [D]          (optional)
//!   subject1_input1.npy
//!   subject1_label1.npy
//!   subject2_input0.npy
//!   ...
//! ```
//!
//! Each `{clip}_input{k}.npy` file is one chunk; `{clip}` becomes the sample's
//! `clip_id` and `k` its `chunk_index`.
//!
//! # Example – synthetic dataset
//!
//! ```rust
//! use rppg_train::dataset::{RppgDataset, SyntheticConfig, SyntheticRppgDataset};
//!
//! let cfg = SyntheticConfig::default();
//! let ds = SyntheticRppgDataset::new(8, cfg.clone());
//!
//! assert_eq!(ds.len(), 8);
//! let sample = ds.get(0).unwrap();
//! assert_eq!(sample.clip.shape(), &[cfg.chunk_len, 3, cfg.height, cfg.width]);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array1, Array2, Array4, Array5, ArrayD, Axis, Ix4};
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::error::{DatasetError, TrainResult};

// ---------------------------------------------------------------------------
// RppgSample
// ---------------------------------------------------------------------------

/// Identifies where a chunk came from.
///
/// In test mode `clip_id` is the subject id and `chunk_index` the sort index;
/// in extraction mode they are the clip filename and chunk id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleMeta {
    /// Subject or clip identifier.
    pub clip_id: String,
    /// Position of the chunk within its clip.
    pub chunk_index: usize,
}

/// One chunk of video frames paired with its ground-truth waveform.
#[derive(Debug, Clone)]
pub struct RppgSample {
    /// Frames `[D, C, H, W]`.
    pub clip: Array4<f32>,
    /// Pulse waveform `[D]`.
    pub labels: Array1<f32>,
    /// Origin of the chunk.
    pub meta: SampleMeta,
}

// ---------------------------------------------------------------------------
// RppgBatch
// ---------------------------------------------------------------------------

/// A collated mini-batch.
///
/// Invariant: `data` is `[N, D, C, H, W]`, `labels` is `[N, D]` and `meta` has
/// `N` entries.
#[derive(Debug, Clone)]
pub struct RppgBatch {
    /// Frames `[N, D, C, H, W]`.
    pub data: Array5<f32>,
    /// Waveforms `[N, D]`.
    pub labels: Array2<f32>,
    /// Per-item origin.
    pub meta: Vec<SampleMeta>,
}

impl RppgBatch {
    /// Stack samples along a new leading batch axis.
    ///
    /// # Errors
    ///
    /// [`DatasetError::InconsistentShape`] when the samples disagree on their
    /// clip or label shape.
    pub fn collate(samples: Vec<RppgSample>) -> Result<Self, DatasetError> {
        let first = match samples.first() {
            Some(s) => s,
            None => {
                return Ok(RppgBatch {
                    data: Array5::zeros((0, 0, 0, 0, 0)),
                    labels: Array2::zeros((0, 0)),
                    meta: Vec::new(),
                })
            }
        };
        let (d, c, h, w) = first.clip.dim();
        let n = samples.len();

        let mut data = Array5::<f32>::zeros((n, d, c, h, w));
        let mut labels = Array2::<f32>::zeros((n, d));
        let mut meta = Vec::with_capacity(n);
        for (i, s) in samples.into_iter().enumerate() {
            if s.clip.dim() != (d, c, h, w) {
                return Err(DatasetError::InconsistentShape {
                    expected: vec![d, c, h, w],
                    actual: s.clip.shape().to_vec(),
                });
            }
            if s.labels.len() != d {
                return Err(DatasetError::InconsistentShape {
                    expected: vec![d],
                    actual: vec![s.labels.len()],
                });
            }
            data.index_axis_mut(Axis(0), i).assign(&s.clip);
            labels.index_axis_mut(Axis(0), i).assign(&s.labels);
            meta.push(s.meta);
        }
        Ok(RppgBatch { data, labels, meta })
    }

    /// Number of items `N`.
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    /// Returns `true` for a batch without items.
    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Chunk length `D`.
    pub fn chunk_len(&self) -> usize {
        self.labels.len_of(Axis(1))
    }
}

// ---------------------------------------------------------------------------
// RppgDataset trait
// ---------------------------------------------------------------------------

/// Common interface for all rPPG datasets.
///
/// Implementations must be `Send + Sync` so they can be shared across
/// data-loading threads without additional synchronisation.
pub trait RppgDataset: Send + Sync {
    /// Total number of samples in this dataset.
    fn len(&self) -> usize;

    /// Load the sample at position `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::IndexOutOfBounds`] when `idx >= self.len()` and
    /// dataset-specific errors for IO or format problems.
    fn get(&self, idx: usize) -> Result<RppgSample, DatasetError>;

    /// Returns `true` when the dataset contains no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable name for logging and progress display.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DataLoader
// ---------------------------------------------------------------------------

/// Batched, optionally-shuffled iterator over an [`RppgDataset`].
///
/// The shuffle order is fully deterministic: given the same `seed`, epoch and
/// dataset length the iteration order is always identical.
#[derive(Clone)]
pub struct DataLoader {
    dataset: Arc<dyn RppgDataset>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl DataLoader {
    /// Create a new `DataLoader`.
    ///
    /// # Parameters
    ///
    /// - `dataset`    – the underlying dataset.
    /// - `batch_size` – number of samples per batch. The last batch may be
    ///   smaller if the dataset length is not a multiple of `batch_size`.
    /// - `shuffle`    – if `true`, samples are shuffled deterministically.
    /// - `seed`       – base seed for the shuffle.
    pub fn new(dataset: Arc<dyn RppgDataset>, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        DataLoader { dataset, batch_size, shuffle, seed }
    }

    /// The wrapped dataset.
    pub fn dataset(&self) -> &dyn RppgDataset {
        self.dataset.as_ref()
    }

    /// Number of complete (or partial) batches yielded per epoch.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if n == 0 {
            return 0;
        }
        (n + self.batch_size - 1) / self.batch_size
    }

    /// Iterate one pass in epoch-0 order.
    pub fn iter(&self) -> DataLoaderIter<'_> {
        self.iter_epoch(0)
    }

    /// Iterate one pass; shuffled loaders draw a fresh order per `epoch`.
    ///
    /// A sample that fails to load ends its batch with `Some(Err(_))`, so the
    /// caller's `batch?` aborts the pass instead of training on a short batch.
    pub fn iter_epoch(&self, epoch: usize) -> DataLoaderIter<'_> {
        let n = self.dataset.len();
        let mut indices: Vec<usize> = (0..n).collect();
        if self.shuffle {
            let seed = self.seed ^ (epoch as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
            xorshift_shuffle(&mut indices, seed);
        }
        DataLoaderIter {
            dataset: self.dataset.as_ref(),
            indices,
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("dataset", &self.dataset.name())
            .field("len", &self.dataset.len())
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .finish()
    }
}

/// Iterator returned by [`DataLoader::iter_epoch`].
pub struct DataLoaderIter<'a> {
    dataset: &'a dyn RppgDataset,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a> Iterator for DataLoaderIter<'a> {
    type Item = Result<RppgBatch, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.cursor..end];
        self.cursor = end;

        let mut samples = Vec::with_capacity(batch_indices.len());
        for &idx in batch_indices {
            match self.dataset.get(idx) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    // Drain so a caller that keeps polling sees the end.
                    self.cursor = self.indices.len();
                    return Some(Err(e));
                }
            }
        }
        Some(RppgBatch::collate(samples))
    }
}

// ---------------------------------------------------------------------------
// Xorshift shuffle (deterministic, no external RNG state)
// ---------------------------------------------------------------------------

/// In-place Fisher-Yates shuffle using a 64-bit Xorshift PRNG seeded with
/// `seed`.
fn xorshift_shuffle(indices: &mut [usize], seed: u64) {
    let n = indices.len();
    if n <= 1 {
        return;
    }
    let mut state = if seed == 0 { 0x853c49e6748fea9b } else { seed };
    for i in (1..n).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state as usize) % (i + 1);
        indices.swap(i, j);
    }
}

// ---------------------------------------------------------------------------
// NpyChunkDataset
// ---------------------------------------------------------------------------

/// One `{clip}_input{k}.npy` file found by the directory scan.
#[derive(Debug, Clone)]
struct ChunkEntry {
    input_path: PathBuf,
    label_path: PathBuf,
    meta: SampleMeta,
}

/// Dataset over preprocessed chunks stored as `.npy` files.
///
/// Scanning is performed once at construction via
/// [`NpyChunkDataset::discover`]. Samples are loaded lazily from disk on each
/// [`RppgDataset::get`] call.
///
/// Input chunks are stored channels-last (`[D, H, W, C]`) and transposed to
/// `[D, C, H, W]` on load. A chunk without a label file gets an all-zero
/// waveform, which is how unlabelled extraction data is stored.
pub struct NpyChunkDataset {
    entries: Vec<ChunkEntry>,
    root: PathBuf,
    name: String,
}

impl NpyChunkDataset {
    /// Scan `root` for `{clip}_input{k}.npy` files.
    ///
    /// Entries are ordered by clip id, then chunk index.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::DirectoryNotFound`] if `root` does not exist, or
    /// [`DatasetError::Io`] for any filesystem access failure.
    pub fn discover(root: &Path) -> Result<Self, DatasetError> {
        if !root.is_dir() {
            return Err(DatasetError::DirectoryNotFound { path: root.to_path_buf() });
        }

        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(root)? {
            let path = dir_entry?.path();
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            let (clip_id, chunk_index) = match parse_chunk_file_name(file_name) {
                Some(parsed) => parsed,
                None => {
                    debug!("Ignoring {}", path.display());
                    continue;
                }
            };
            let label_path = root.join(format!("{clip_id}_label{chunk_index}.npy"));
            entries.push(ChunkEntry {
                input_path: path,
                label_path,
                meta: SampleMeta { clip_id, chunk_index },
            });
        }
        entries.sort_by(|a, b| {
            (a.meta.clip_id.as_str(), a.meta.chunk_index)
                .cmp(&(b.meta.clip_id.as_str(), b.meta.chunk_index))
        });

        info!(
            "NpyChunkDataset: {} chunks under {}",
            entries.len(),
            root.display()
        );

        let name = format!("NpyChunkDataset({})", root.display());
        Ok(NpyChunkDataset { entries, root: root.to_path_buf(), name })
    }

    /// Directory the dataset was discovered in.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RppgDataset for NpyChunkDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, idx: usize) -> Result<RppgSample, DatasetError> {
        let entry = self
            .entries
            .get(idx)
            .ok_or(DatasetError::IndexOutOfBounds { idx, len: self.entries.len() })?;

        let frames = read_npy_f32(&entry.input_path)?
            .into_dimensionality::<Ix4>()
            .map_err(|e| DatasetError::npy_read(&entry.input_path, format!("expected [D, H, W, C]: {e}")))?;
        let clip = frames.permuted_axes([0, 3, 1, 2]).as_standard_layout().to_owned();
        let d = clip.len_of(Axis(0));

        let labels = if entry.label_path.exists() {
            read_npy_f32(&entry.label_path)?
                .into_shape(d)
                .map_err(|e| DatasetError::npy_read(&entry.label_path, format!("expected [{d}]: {e}")))?
        } else {
            Array1::zeros(d)
        };

        Ok(RppgSample { clip, labels, meta: entry.meta.clone() })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Split `subject1_input3.npy` into `("subject1", 3)`.
fn parse_chunk_file_name(file_name: &str) -> Option<(String, usize)> {
    let stem = file_name.strip_suffix(".npy")?;
    let pos = stem.rfind("_input")?;
    let chunk_index = stem[pos + "_input".len()..].parse::<usize>().ok()?;
    Some((stem[..pos].to_string(), chunk_index))
}

/// Read an `.npy` file of `f32` or `f64` values as `f32`.
fn read_npy_f32(path: &Path) -> Result<ArrayD<f32>, DatasetError> {
    use ndarray_npy::ReadNpyExt;
    let file = std::fs::File::open(path)?;
    match ArrayD::<f32>::read_npy(file) {
        Ok(arr) => Ok(arr),
        Err(f32_err) => {
            let file = std::fs::File::open(path)?;
            ArrayD::<f64>::read_npy(file)
                .map(|arr| arr.mapv(|v| v as f32))
                .map_err(|_| DatasetError::npy_read(path, f32_err.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// SyntheticRppgDataset
// ---------------------------------------------------------------------------

/// Configuration for [`SyntheticRppgDataset`].
///
/// All fields are plain numbers; no randomness is involved.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Frames per chunk. Default: **32**.
    pub chunk_len: usize,
    /// Chunks generated per subject. Default: **4**.
    pub chunks_per_clip: usize,
    /// Frame height. Default: **8**.
    pub height: usize,
    /// Frame width. Default: **8**.
    pub width: usize,
    /// Sampling rate in Hz. Default: **30**.
    pub fs: f64,
    /// Pulse rate of subject 0 in BPM. Default: **72**.
    pub base_hr_bpm: f64,
    /// Rate increase per subject in BPM. Default: **6**.
    pub hr_step_bpm: f64,
    /// Emit first-difference labels instead of the raw pulse. Default: `true`.
    pub diff_labels: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            chunk_len: 32,
            chunks_per_clip: 4,
            height: 8,
            width: 8,
            fs: 30.0,
            base_hr_bpm: 72.0,
            hr_step_bpm: 6.0,
            diff_labels: true,
        }
    }
}

/// Fully-deterministic pulsatile video dataset.
///
/// Sample `idx` belongs to subject `idx / chunks_per_clip` and is chunk
/// `idx % chunks_per_clip` of that subject. With `f` the subject's pulse
/// frequency and `τ` the frame index within the subject's recording:
///
/// ```text
/// p(τ)          = sin(2π f τ / fs)
/// pixel[c,h,w]  = 0.5 + 0.05 × (c + 1) × p(τ) + 0.01 × (h + w) / (H + W)
/// label         = p(τ + 1) − p(τ)     (diff labels)
///               = p(τ)                (raw labels)
/// ```
pub struct SyntheticRppgDataset {
    num_samples: usize,
    config: SyntheticConfig,
}

impl SyntheticRppgDataset {
    /// Create a new synthetic dataset with `num_samples` chunks.
    pub fn new(num_samples: usize, config: SyntheticConfig) -> Self {
        SyntheticRppgDataset { num_samples, config }
    }

    /// Pulse rate of `subject` in BPM.
    pub fn subject_hr_bpm(&self, subject: usize) -> f64 {
        self.config.base_hr_bpm + subject as f64 * self.config.hr_step_bpm
    }

    #[inline]
    fn pulse(&self, subject: usize, tau: usize) -> f32 {
        let f = self.subject_hr_bpm(subject) / 60.0;
        (2.0 * std::f64::consts::PI * f * tau as f64 / self.config.fs).sin() as f32
    }
}

impl RppgDataset for SyntheticRppgDataset {
    fn len(&self) -> usize {
        self.num_samples
    }

    fn get(&self, idx: usize) -> Result<RppgSample, DatasetError> {
        if idx >= self.num_samples {
            return Err(DatasetError::IndexOutOfBounds { idx, len: self.num_samples });
        }

        let cfg = &self.config;
        let per_clip = cfg.chunks_per_clip.max(1);
        let subject = idx / per_clip;
        let chunk = idx % per_clip;
        let start = chunk * cfg.chunk_len;
        let spatial_norm = (cfg.height + cfg.width).max(1) as f32;

        let clip = Array4::from_shape_fn((cfg.chunk_len, 3, cfg.height, cfg.width), |(t, c, h, w)| {
            let p = self.pulse(subject, start + t);
            0.5 + 0.05 * (c as f32 + 1.0) * p + 0.01 * (h + w) as f32 / spatial_norm
        });
        let labels = Array1::from_shape_fn(cfg.chunk_len, |t| {
            if cfg.diff_labels {
                self.pulse(subject, start + t + 1) - self.pulse(subject, start + t)
            } else {
                self.pulse(subject, start + t)
            }
        });

        Ok(RppgSample {
            clip,
            labels,
            meta: SampleMeta { clip_id: format!("subject{subject}"), chunk_index: chunk },
        })
    }

    fn name(&self) -> &str {
        "SyntheticRppgDataset"
    }
}

// ---------------------------------------------------------------------------
// DataSplits
// ---------------------------------------------------------------------------

/// The loaders of one run. Absent splits are `None`.
#[derive(Debug, Clone, Default)]
pub struct DataSplits {
    /// Training data.
    pub train: Option<DataLoader>,
    /// Validation data.
    pub valid: Option<DataLoader>,
    /// Test data.
    pub test: Option<DataLoader>,
    /// Unlabelled data for extraction.
    pub extract: Option<DataLoader>,
}

impl DataSplits {
    /// Build `.npy` loaders for every data directory set in `config`.
    ///
    /// Only the training split is shuffled.
    ///
    /// # Errors
    ///
    /// Propagates [`DatasetError::DirectoryNotFound`] for a configured
    /// directory that does not exist.
    pub fn from_config(config: &TrainingConfig) -> TrainResult<Self> {
        let open = |dir: &Option<PathBuf>, shuffle: bool| -> TrainResult<Option<DataLoader>> {
            match dir {
                Some(dir) => {
                    let ds = NpyChunkDataset::discover(dir)?;
                    Ok(Some(DataLoader::new(Arc::new(ds), config.batch_size, shuffle, config.seed)))
                }
                None => Ok(None),
            }
        };
        Ok(DataSplits {
            train: open(&config.train_data_dir, config.shuffle_train)?,
            valid: open(&config.valid_data_dir, false)?,
            test: open(&config.test_data_dir, false)?,
            extract: open(&config.extract_data_dir, false)?,
        })
    }

    /// Synthetic loaders for every split, `num_samples` chunks each.
    pub fn synthetic(config: &TrainingConfig, num_samples: usize) -> Self {
        let syn = SyntheticConfig {
            chunk_len: config.chunk_len,
            fs: config.train_fs,
            diff_labels: config.diff_flag(),
            ..SyntheticConfig::default()
        };
        let loader = |shuffle: bool| {
            let ds = SyntheticRppgDataset::new(num_samples, syn.clone());
            Some(DataLoader::new(Arc::new(ds), config.batch_size, shuffle, config.seed))
        };
        DataSplits {
            train: loader(config.shuffle_train),
            valid: loader(false),
            test: loader(false),
            extract: loader(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
