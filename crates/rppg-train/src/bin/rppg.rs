//! `rppg` binary: entry point for the rPPG training toolbox.
//!
//! # Usage
//!
//! ```bash
//! cargo run --features tch-backend --bin rppg -- --config run.json
//! cargo run --features tch-backend --bin rppg -- --config run.json --mode only_test --weights best.pth
//! cargo run --features tch-backend --bin rppg -- --dry-run --cuda
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use rppg_train::config::{ToolboxMode, TrainingConfig};
use rppg_train::dataset::DataSplits;
use rppg_train::model::{BaselineConfig, BaselineRppgNet};
use rppg_train::trainer::{run_toolbox, select_device, Trainer};
use rppg_train::TrainResult;

/// Command-line arguments for the toolbox binary.
#[derive(Parser, Debug)]
#[command(
    name = "rppg",
    version,
    about = "rPPG training, evaluation and extraction toolbox",
    long_about = None
)]
struct Args {
    /// Path to the JSON configuration file.
    ///
    /// If not provided, the default `TrainingConfig` is used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the toolbox mode (`train_and_test`, `only_test`, `extract_only`).
    #[arg(long, value_name = "MODE")]
    mode: Option<ToolboxMode>,

    /// Use `<DIR>/{train,valid,test,extract}` as the data directories.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override the checkpoint directory from the config.
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Override the inference weights used by `only_test` and `extract_only`.
    #[arg(long, value_name = "FILE")]
    weights: Option<PathBuf>,

    /// Enable CUDA (overrides config `use_gpu`).
    #[arg(long, default_value_t = false)]
    cuda: bool,

    /// Use the deterministic synthetic dataset instead of real data.
    ///
    /// This is intended for pipeline smoke-tests only, not production training.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Number of synthetic chunks per split when `--dry-run` is active.
    #[arg(long, default_value_t = 16)]
    dry_run_samples: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("rPPG Toolbox v{}", rppg_train::VERSION);

    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match TrainingConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("No configuration file provided, using defaults");
            TrainingConfig::default()
        }
    };

    // CLI overrides.
    if let Some(mode) = args.mode {
        config.toolbox_mode = mode;
    }
    if let Some(dir) = &args.data_dir {
        config.train_data_dir = Some(dir.join("train"));
        config.valid_data_dir = Some(dir.join("valid"));
        config.test_data_dir = Some(dir.join("test"));
        config.extract_data_dir = Some(dir.join("extract"));
    }
    if let Some(dir) = args.model_dir {
        config.model_dir = dir;
    }
    if let Some(path) = args.weights {
        config.inference_model_path = Some(path);
    }
    if args.cuda {
        config.use_gpu = true;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    info!("Configuration validated successfully");
    info!("  mode         : {}", config.toolbox_mode);
    info!("  chunk length : {}", config.chunk_len);
    info!("  batch size   : {}", config.batch_size);
    info!("  learning rate: {}", config.learning_rate);
    info!("  epochs       : {}", config.num_epochs);
    info!("  augmentation : {}", config.augment);
    info!("  device       : {}", if config.use_gpu { "GPU" } else { "CPU" });

    if let Err(e) = run(config, &args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(config: TrainingConfig, args: &Args) -> TrainResult<()> {
    let splits = if args.dry_run {
        info!("DRY RUN, using synthetic dataset ({} chunks per split)", args.dry_run_samples);
        DataSplits::synthetic(&config, args.dry_run_samples)
    } else {
        DataSplits::from_config(&config)?
    };

    tch::manual_seed(config.seed as i64);
    let device = select_device(&config);
    let model = BaselineRppgNet::new(&BaselineConfig::default(), device);

    info!("Initialising trainer");
    let mut trainer = Trainer::new(config, model, device)?;
    run_toolbox(&mut trainer, &splits)?;
    info!("Done");
    Ok(())
}
