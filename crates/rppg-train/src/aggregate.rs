//! Reassembly of chunked model outputs.
//!
//! Batch outputs are flattened to one value per time step before they reach
//! this module: item `ib` of a batch owns the window
//! `[ib * chunk_len, (ib + 1) * chunk_len)` of the flat vector.
//!
//! - [`ChunkAggregator`] files prediction and label windows under
//!   `(subject id, sort index)` for the metrics collector.
//! - [`ExtractionRecord`] files prediction windows under
//!   `"{clip}_{chunk}"` and writes them as two CSV tables.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use tracing::info;

use crate::dataset::SampleMeta;
use crate::error::{TrainError, TrainResult};

/// File name of the one-row-per-chunk extraction table.
pub const WIDE_TABLE_FILE: &str = "predictions_by_vid.csv";

/// File name of the one-row-per-sample extraction table.
pub const LONG_TABLE_FILE: &str = "predictions_by_segment.csv";

/// Subject id → sort index → chunk. Iteration is ordered on both levels.
pub type SubjectPredictionMap = BTreeMap<String, BTreeMap<usize, Array1<f32>>>;

/// Window of item `ib` in a flattened batch output.
fn item_window(flat: &[f32], ib: usize, chunk_len: usize) -> TrainResult<&[f32]> {
    let start = ib * chunk_len;
    let end = start + chunk_len;
    flat.get(start..end)
        .ok_or_else(|| TrainError::shape_mismatch(vec![end], vec![flat.len()]))
}

// ---------------------------------------------------------------------------
// ChunkAggregator
// ---------------------------------------------------------------------------

/// Collects test-set predictions and labels per subject.
#[derive(Debug, Clone)]
pub struct ChunkAggregator {
    chunk_len: usize,
    predictions: SubjectPredictionMap,
    labels: SubjectPredictionMap,
}

impl ChunkAggregator {
    /// Empty aggregator for windows of `chunk_len` samples.
    pub fn new(chunk_len: usize) -> Self {
        Self { chunk_len, predictions: BTreeMap::new(), labels: BTreeMap::new() }
    }

    /// File every item of one batch.
    ///
    /// `meta[ib]` names the subject and sort index of item `ib`. A repeated
    /// `(subject, index)` pair overwrites the earlier chunk.
    ///
    /// # Errors
    ///
    /// [`TrainError::ShapeMismatch`] when a window runs past the end of
    /// `pred` or `labels`.
    pub fn insert_batch(&mut self, pred: &[f32], labels: &[f32], meta: &[SampleMeta]) -> TrainResult<()> {
        for (ib, m) in meta.iter().enumerate() {
            let p = item_window(pred, ib, self.chunk_len)?;
            let l = item_window(labels, ib, self.chunk_len)?;
            self.predictions
                .entry(m.clip_id.clone())
                .or_default()
                .insert(m.chunk_index, Array1::from(p.to_vec()));
            self.labels
                .entry(m.clip_id.clone())
                .or_default()
                .insert(m.chunk_index, Array1::from(l.to_vec()));
        }
        Ok(())
    }

    /// Predictions collected so far.
    pub fn predictions(&self) -> &SubjectPredictionMap {
        &self.predictions
    }

    /// Labels collected so far.
    pub fn labels(&self) -> &SubjectPredictionMap {
        &self.labels
    }

    /// Number of subjects seen.
    pub fn num_subjects(&self) -> usize {
        self.predictions.len()
    }

    /// Consume the aggregator, returning `(predictions, labels)`.
    pub fn into_maps(self) -> (SubjectPredictionMap, SubjectPredictionMap) {
        (self.predictions, self.labels)
    }
}

// ---------------------------------------------------------------------------
// ExtractionRecord
// ---------------------------------------------------------------------------

/// Extracted waveforms keyed by `"{clip}_{chunk}"`.
///
/// Keys keep their first-insertion order; re-inserting a key replaces its
/// values in place.
#[derive(Debug, Clone)]
pub struct ExtractionRecord {
    chunk_len: usize,
    keys: Vec<String>,
    values: Vec<Vec<f32>>,
    index: HashMap<String, usize>,
}

impl ExtractionRecord {
    /// Empty record for windows of `chunk_len` samples.
    pub fn new(chunk_len: usize) -> Self {
        Self { chunk_len, keys: Vec::new(), values: Vec::new(), index: HashMap::new() }
    }

    /// Key under which a chunk is stored.
    pub fn key(meta: &SampleMeta) -> String {
        format!("{}_{}", meta.clip_id, meta.chunk_index)
    }

    /// Store `values` under `key`. Last write wins.
    pub fn insert(&mut self, key: String, values: Vec<f32>) {
        match self.index.get(&key) {
            Some(&i) => self.values[i] = values,
            None => {
                self.index.insert(key.clone(), self.keys.len());
                self.keys.push(key);
                self.values.push(values);
            }
        }
    }

    /// Store the window of every item of one flattened batch output.
    ///
    /// # Errors
    ///
    /// [`TrainError::ShapeMismatch`] when a window runs past the end of
    /// `pred`.
    pub fn insert_batch(&mut self, pred: &[f32], meta: &[SampleMeta]) -> TrainResult<()> {
        for (ib, m) in meta.iter().enumerate() {
            let window = item_window(pred, ib, self.chunk_len)?;
            self.insert(Self::key(m), window.to_vec());
        }
        Ok(())
    }

    /// Values stored under `key`.
    pub fn get(&self, key: &str) -> Option<&[f32]> {
        self.index.get(key).map(|&i| self.values[i].as_slice())
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `(key, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.keys.iter().map(String::as_str).zip(self.values.iter().map(Vec::as_slice))
    }

    /// Write the wide table: header `filename,0,…,chunk_len-1`, then one row
    /// per key.
    pub fn write_wide<W: Write>(&self, writer: W) -> TrainResult<()> {
        let mut w = csv::Writer::from_writer(writer);
        let header = std::iter::once("filename".to_string())
            .chain((0..self.chunk_len).map(|i| i.to_string()));
        w.write_record(header)?;
        for (key, values) in self.iter() {
            let row = std::iter::once(key.to_string()).chain(values.iter().map(|&v| format_value(v)));
            w.write_record(row)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Write the long table: header `filename,i,prediction`, then one row per
    /// `(key, position, value)`.
    pub fn write_long<W: Write>(&self, writer: W) -> TrainResult<()> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(["filename", "i", "prediction"])?;
        for (key, values) in self.iter() {
            for (i, v) in values.iter().enumerate() {
                w.write_record([key.to_string(), i.to_string(), format_value(*v)])?;
            }
        }
        w.flush()?;
        Ok(())
    }

    /// Write both tables into `dir`, creating it if needed.
    ///
    /// Returns the paths of the wide and long tables.
    pub fn write_tables(&self, dir: &Path) -> TrainResult<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let wide = dir.join(WIDE_TABLE_FILE);
        let long = dir.join(LONG_TABLE_FILE);
        self.write_wide(File::create(&wide)?)?;
        self.write_long(File::create(&long)?)?;
        info!("Saved predictions to {} and {}", wide.display(), long.display());
        Ok((wide, long))
    }
}

/// Table cell for one prediction. Whole numbers keep a trailing `.0` so every
/// cell reads back as a float.
fn format_value(v: f32) -> String {
    format!("{v:?}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
