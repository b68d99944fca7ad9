//! Integration tests for [`rppg_train::config`].
//!
//! Filesystem tests write into a [`tempfile::TempDir`].

use std::path::PathBuf;

use rppg_train::config::{LabelType, ToolboxMode, TrainingConfig};
use rppg_train::error::ConfigError;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Default config invariants
// ---------------------------------------------------------------------------

/// The default configuration must pass its own validation.
#[test]
fn default_config_is_valid() {
    let cfg = TrainingConfig::default();
    cfg.validate().expect("default TrainingConfig must be valid");
}

/// Every numeric field in the default config must be strictly positive where
/// the domain requires it.
#[test]
fn default_config_all_positive_fields() {
    let cfg = TrainingConfig::default();

    assert!(cfg.chunk_len > 0, "chunk_len must be > 0");
    assert!(cfg.train_fs > 0.0, "train_fs must be > 0");
    assert!(cfg.valid_fs > 0.0, "valid_fs must be > 0");
    assert!(cfg.test_fs > 0.0, "test_fs must be > 0");
    assert!(cfg.batch_size > 0, "batch_size must be > 0");
    assert!(cfg.learning_rate > 0.0, "learning_rate must be > 0.0");
    assert!(cfg.num_epochs > 0, "num_epochs must be > 0");
}

/// Model selection is on and augmentation off unless asked for.
#[test]
fn default_config_selects_best_epoch() {
    let cfg = TrainingConfig::default();
    assert!(!cfg.use_last_epoch);
    assert!(!cfg.augment);
    assert_eq!(cfg.last_epoch(), cfg.num_epochs - 1);
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

/// A written configuration reads back unchanged.
#[test]
fn json_file_round_trip_preserves_fields() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("run.json");

    let mut cfg = TrainingConfig::default();
    cfg.toolbox_mode = ToolboxMode::ExtractOnly;
    cfg.label_type = LabelType::Standardized;
    cfg.test_data_dir = Some(PathBuf::from("/data/test"));
    cfg.inference_model_path = Some(PathBuf::from("/weights/best.pth"));
    cfg.num_epochs = 7;
    cfg.to_json(&path).unwrap();

    let back = TrainingConfig::from_json(&path).unwrap();
    assert_eq!(back.toolbox_mode, ToolboxMode::ExtractOnly);
    assert_eq!(back.label_type, LabelType::Standardized);
    assert_eq!(back.test_data_dir, Some(PathBuf::from("/data/test")));
    assert_eq!(back.inference_model_path, Some(PathBuf::from("/weights/best.pth")));
    assert_eq!(back.num_epochs, 7);
    assert!(!back.diff_flag());
}

/// Modes are spelled in snake case on disk.
#[test]
fn json_uses_snake_case_modes() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("run.json");
    std::fs::write(&path, r#"{ "toolbox_mode": "only_test", "use_last_epoch": true }"#).unwrap();

    let cfg = TrainingConfig::from_json(&path).unwrap();
    assert_eq!(cfg.toolbox_mode, ToolboxMode::OnlyTest);
    assert!(cfg.use_last_epoch);
    assert_eq!(cfg.chunk_len, TrainingConfig::default().chunk_len);
}

/// A missing file is reported as a read error with its path.
#[test]
fn missing_file_is_a_read_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("absent.json");
    match TrainingConfig::from_json(&path) {
        Err(ConfigError::FileRead { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected FileRead, got {other:?}"),
    }
}

/// Values that parse but fail validation are rejected on load.
#[test]
fn invalid_values_are_rejected_on_load() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("run.json");
    std::fs::write(&path, r#"{ "batch_size": 0 }"#).unwrap();
    assert!(matches!(
        TrainingConfig::from_json(&path),
        Err(ConfigError::InvalidValue { field: "batch_size", .. })
    ));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn non_finite_learning_rate_or_epochs_are_invalid() {
    let mut cfg = TrainingConfig::default();
    cfg.learning_rate = 0.0;
    assert!(cfg.validate().is_err());

    let mut cfg = TrainingConfig::default();
    cfg.num_epochs = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = TrainingConfig::default();
    cfg.valid_fs = f64::NAN;
    assert!(cfg.validate().is_err());
}

#[test]
fn toolbox_mode_round_trips_through_strings() {
    for mode in [ToolboxMode::TrainAndTest, ToolboxMode::OnlyTest, ToolboxMode::ExtractOnly] {
        let parsed: ToolboxMode = mode.to_string().parse().unwrap();
        assert_eq!(parsed, mode);
    }
    assert!("unsupervised".parse::<ToolboxMode>().is_err());
}
