use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use vehicle_classifier_lib::{commands, logging, model::AppConfig};

#[derive(Parser)]
#[command(version, about = "Vehicle image classifier", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the image directory and print the train/test split
    Scan {
        #[arg(long)]
        dir: Option<String>,
        #[arg(long)]
        total: Option<usize>,
        #[arg(long)]
        test: Option<usize>,
    },
    /// Train a new model, evaluate it and save it
    Train {
        #[arg(long)]
        dir: Option<String>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        learning_rate: Option<f64>,
        #[arg(long)]
        output: Option<String>,
    },
    /// Evaluate a saved model on the test bucket
    Evaluate {
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        dir: Option<String>,
    },
    /// Classify a single image
    Predict {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Print the metadata of a saved model
    Info {
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Write the default configuration file
    InitConfig {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path);

    match cli.command {
        Commands::Scan { dir, total, test } => {
            if let Some(dir) = dir {
                config.dataset.directory = dir;
            }
            if let Some(total) = total {
                config.dataset.loader.total_records = total;
            }
            if let Some(test) = test {
                config.dataset.loader.test_records = test;
            }
            commands::scan(&config)
        }
        Commands::Train {
            dir,
            epochs,
            batch_size,
            learning_rate,
            output,
        } => {
            if let Some(dir) = dir {
                config.dataset.directory = dir;
            }
            if let Some(epochs) = epochs {
                config.training.num_epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                config.training.learning_rate = learning_rate;
            }
            if let Some(output) = output {
                config.model.model_path = output;
            }
            train(&config)
        }
        Commands::Evaluate { model, dir } => {
            if let Some(dir) = dir {
                config.dataset.directory = dir;
            }
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            evaluate(&config, &model_path)
        }
        Commands::Predict { image, model } => {
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            predict(&config, &model_path, &image)
        }
        Commands::Info { model } => {
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            commands::info(&model_path)
        }
        Commands::InitConfig { path } => {
            let path = path.unwrap_or(config_path);
            commands::init_config(&path)
        }
    }
}

#[cfg(feature = "ml")]
fn train(config: &AppConfig) -> anyhow::Result<()> {
    commands::train(config)
}

#[cfg(feature = "ml")]
fn evaluate(config: &AppConfig, model_path: &Path) -> anyhow::Result<()> {
    commands::evaluate(config, model_path)
}

#[cfg(feature = "ml")]
fn predict(config: &AppConfig, model_path: &Path, image_path: &Path) -> anyhow::Result<()> {
    commands::predict(config, model_path, image_path)
}

#[cfg(not(feature = "ml"))]
fn train(_config: &AppConfig) -> anyhow::Result<()> {
    anyhow::bail!("ML機能が無効です。--features ml でビルドしてください")
}

#[cfg(not(feature = "ml"))]
fn evaluate(_config: &AppConfig, _model_path: &Path) -> anyhow::Result<()> {
    anyhow::bail!("ML機能が無効です。--features ml でビルドしてください")
}

#[cfg(not(feature = "ml"))]
fn predict(_config: &AppConfig, _model_path: &Path, _image_path: &Path) -> anyhow::Result<()> {
    anyhow::bail!("ML機能が無効です。--features ml でビルドしてください")
}
