//! Integration tests for [`rppg_train::aggregate`].
//!
//! Tables are written into a [`tempfile::TempDir`] and read back with the
//! `csv` reader.

use std::sync::Arc;

use rppg_train::aggregate::{ChunkAggregator, ExtractionRecord, LONG_TABLE_FILE, WIDE_TABLE_FILE};
use rppg_train::dataset::{DataLoader, SampleMeta, SyntheticConfig, SyntheticRppgDataset};
use rppg_train::error::TrainError;
use tempfile::TempDir;

fn meta(clip: &str, idx: usize) -> SampleMeta {
    SampleMeta { clip_id: clip.to_string(), chunk_index: idx }
}

fn read_rows(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    let header = rdr.headers().unwrap().iter().map(str::to_string).collect();
    let rows = rdr
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

// ---------------------------------------------------------------------------
// ExtractionRecord
// ---------------------------------------------------------------------------

/// Both tables land in the output directory with the expected layout.
#[test]
fn write_tables_emits_wide_and_long_csv() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("extract");

    let mut rec = ExtractionRecord::new(3);
    rec.insert_batch(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[meta("clipA", 0), meta("clipB", 2)])
        .unwrap();
    let (wide, long) = rec.write_tables(&out).unwrap();
    assert_eq!(wide, out.join(WIDE_TABLE_FILE));
    assert_eq!(long, out.join(LONG_TABLE_FILE));

    let (header, rows) = read_rows(&wide);
    assert_eq!(header, vec!["filename", "0", "1", "2"]);
    assert_eq!(rows, vec![vec!["clipA_0", "1.0", "2.0", "3.0"], vec!["clipB_2", "4.0", "5.0", "6.0"]]);

    let (header, rows) = read_rows(&long);
    assert_eq!(header, vec!["filename", "i", "prediction"]);
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[4], vec!["clipB_2", "1", "5.0"]);
}

/// Re-extracting a chunk replaces its row without moving it.
#[test]
fn repeated_chunk_overwrites_in_place() {
    let mut rec = ExtractionRecord::new(2);
    rec.insert_batch(&[1.0, 1.0, 2.0, 2.0], &[meta("a", 0), meta("b", 0)]).unwrap();
    rec.insert_batch(&[9.0, 9.0], &[meta("a", 0)]).unwrap();

    assert_eq!(rec.len(), 2);
    let keys: Vec<&str> = rec.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a_0", "b_0"]);
    assert_eq!(rec.get("a_0"), Some(&[9.0_f32, 9.0][..]));
}

#[test]
fn short_prediction_buffer_is_rejected() {
    let mut rec = ExtractionRecord::new(4);
    let err = rec.insert_batch(&[0.0; 6], &[meta("a", 0), meta("a", 1)]).unwrap_err();
    assert!(matches!(err, TrainError::ShapeMismatch { .. }));
}

/// An empty record still writes headers.
#[test]
fn empty_record_writes_header_only() {
    let rec = ExtractionRecord::new(2);
    assert!(rec.is_empty());
    let mut buf = Vec::new();
    rec.write_wide(&mut buf).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "filename,0,1\n");
}

// ---------------------------------------------------------------------------
// ChunkAggregator
// ---------------------------------------------------------------------------

/// Batches from a loader are filed by subject and chunk index, whatever the
/// batch boundaries.
#[test]
fn aggregator_reassembles_loader_batches() {
    let cfg = SyntheticConfig { chunk_len: 8, chunks_per_clip: 3, height: 2, width: 2, ..SyntheticConfig::default() };
    let ds = SyntheticRppgDataset::new(9, cfg);
    let loader = DataLoader::new(Arc::new(ds), 4, true, 11);

    let mut agg = ChunkAggregator::new(8);
    for batch in loader.iter() {
        let batch = batch.unwrap();
        let flat: Vec<f32> = batch.labels.iter().copied().collect();
        agg.insert_batch(&flat, &flat, &batch.meta).unwrap();
    }

    assert_eq!(agg.num_subjects(), 3);
    let (preds, labels) = agg.into_maps();
    for (subject, chunks) in &preds {
        let idx: Vec<usize> = chunks.keys().copied().collect();
        assert_eq!(idx, vec![0, 1, 2], "subject {subject}");
        assert!(chunks.values().all(|c| c.len() == 8));
    }
    assert_eq!(preds, labels);
}
