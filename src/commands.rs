//! CLIから呼ばれる処理
//!
//! 各コマンドは設定 (`AppConfig`) を受け取り、結果をログと標準出力に出します。

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::dataset::{CategoryIndex, DatasetLoader, LoadedDataset};
use crate::model::{load_metadata, print_metadata_info, AppConfig};

/// 設定に従ってデータディレクトリを読み込む
pub fn load_dataset(config: &AppConfig, categories: &CategoryIndex) -> Result<LoadedDataset> {
    let directory = Path::new(&config.dataset.directory);
    DatasetLoader::new(categories, config.dataset.loader.clone())
        .load(directory)
        .with_context(|| format!("Failed to load dataset from {}", directory.display()))
}

/// 読み込み結果の集計を表示
pub fn scan(config: &AppConfig) -> Result<()> {
    let categories = config.category_index()?;
    let dataset = load_dataset(config, &categories)?;

    println!("=== データセット ===");
    println!("ディレクトリ: {}", config.dataset.directory);
    println!("しきい値: {}", dataset.threshold.value());
    println!("学習: {} 件 / テスト: {} 件", dataset.train.len(), dataset.test.len());

    let train_counts = dataset.train.category_counts(categories.len());
    let test_counts = dataset.test.category_counts(categories.len());
    for (code, name) in categories.names().iter().enumerate() {
        println!("  {:>2} {:<12} 学習 {:>4}  テスト {:>4}", code, name, train_counts[code], test_counts[code]);
    }

    match dataset.uniform_shape() {
        Ok(Some((h, w, c))) => println!("画像サイズ: {}x{}x{}", h, w, c),
        Ok(None) => println!("画像サイズ: -"),
        Err(e) => println!("画像サイズ: {}", e),
    }

    if !dataset.skipped.is_empty() {
        println!("スキップ: {} 件", dataset.skipped.len());
        for skipped in &dataset.skipped {
            println!("  {} ({:?})", skipped.path.display(), skipped.reason);
        }
    }
    Ok(())
}

/// アーカイブのメタデータを表示
pub fn info(model_path: &Path) -> Result<()> {
    let metadata = load_metadata(model_path)?;
    println!("モデル: {}", model_path.display());
    print_metadata_info(&metadata);
    Ok(())
}

/// デフォルト設定ファイルを書き出す
pub fn init_config(path: &Path) -> Result<()> {
    AppConfig::default().save(path)?;
    info!("設定ファイルを作成しました: {}", path.display());
    Ok(())
}

#[cfg(feature = "ml")]
pub use self::ml_commands::{evaluate, predict, train};

#[cfg(feature = "ml")]
mod ml_commands {
    use anyhow::{Context, Result};
    use std::path::Path;
    use tracing::{info, warn};

    use burn::{
        backend::{Autodiff, Wgpu},
        tensor::backend::{AutodiffBackend, Backend},
    };
    use burn_ndarray::{NdArray, NdArrayDevice};
    use burn_wgpu::WgpuDevice;

    use super::load_dataset;
    use crate::dataset::{CategoryIndex, PixelArray, Split};
    use crate::ml::{
        evaluate as evaluate_model, images_to_tensor, save_classifier, tensor_rows, train_model, Evaluation,
        InferenceEngine, ModelConfig,
    };
    use crate::model::{AppConfig, DeviceType, ModelMetadata};
    use crate::report::{log_report, write_predictions_csv, PredictionRow};

    /// 保存前後の予測の許容誤差
    const RELOAD_TOLERANCE: f32 = 1e-6;

    /// 学習・評価・保存・再読み込み確認・レポート出力
    pub fn train(config: &AppConfig) -> Result<()> {
        info!("計算デバイス: {}", config.device_type);
        match config.device_type {
            DeviceType::Wgpu => run_training::<Autodiff<Wgpu>>(config, WgpuDevice::default()),
            DeviceType::Cpu => run_training::<Autodiff<NdArray>>(config, NdArrayDevice::Cpu),
        }
    }

    /// 保存済みモデルをテストデータで評価
    pub fn evaluate(config: &AppConfig, model_path: &Path) -> Result<()> {
        match config.device_type {
            DeviceType::Wgpu => run_evaluation::<Wgpu>(config, model_path, WgpuDevice::default()),
            DeviceType::Cpu => run_evaluation::<NdArray>(config, model_path, NdArrayDevice::Cpu),
        }
    }

    /// 画像1枚を分類
    pub fn predict(config: &AppConfig, model_path: &Path, image_path: &Path) -> Result<()> {
        let (label, confidence) = match config.device_type {
            DeviceType::Wgpu => {
                InferenceEngine::<Wgpu>::load(model_path, WgpuDevice::default())?.classify_image(image_path)?
            }
            DeviceType::Cpu => {
                InferenceEngine::<NdArray>::load(model_path, NdArrayDevice::Cpu)?.classify_image(image_path)?
            }
        };
        println!("{}: {} ({:.3})", image_path.display(), label, confidence);
        Ok(())
    }

    fn run_training<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> Result<()> {
        let categories = config.category_index()?;
        let dataset = load_dataset(config, &categories)?;
        let (height, width, channels) = dataset
            .uniform_shape()?
            .ok_or_else(|| anyhow::anyhow!("No images found in {}", config.dataset.directory))?;

        let model_config = ModelConfig::new(categories.len(), height, width)
            .with_channels(channels)
            .with_hidden_size(config.model.hidden_size)
            .with_conv_dropout(config.model.conv_dropout)
            .with_dense_dropout(config.model.dense_dropout);

        let train_samples = dataset.train.len();
        let test = dataset.test;
        let model = train_model::<B>(&model_config, dataset.train, test.clone(), &config.training, device.clone())?;

        let evaluation = evaluate_model(&model, &model_config, &test, config.training.batch_size, &device)?;

        let mut metadata = ModelMetadata::new(
            categories.names().to_vec(),
            height as u32,
            width as u32,
            channels as u32,
            config.model.hidden_size as u32,
        );
        metadata.num_epochs = config.training.num_epochs as u32;
        metadata.batch_size = config.training.batch_size as u32;
        metadata.learning_rate = config.training.learning_rate;
        metadata.train_samples = train_samples as u32;
        metadata.test_samples = test.len() as u32;
        if evaluation.samples() > 0 {
            metadata.test_accuracy = Some(evaluation.accuracy);
            metadata.test_loss = Some(evaluation.loss);
        }

        let saved_path = save_classifier(Path::new(&config.model.model_path), &metadata, &model)?;

        let engine = InferenceEngine::<B::InnerBackend>::load(&saved_path, device.clone())?;
        verify_reload(&model, &engine, &test, config.training.batch_size, &device)?;

        write_report(config, &categories, &test, &evaluation)?;
        println!(
            "テスト正解率: {:.4} / テスト損失: {:.4} ({} 件)",
            evaluation.accuracy,
            evaluation.loss,
            evaluation.samples()
        );
        println!("モデル: {}", saved_path.display());
        Ok(())
    }

    fn run_evaluation<B: Backend>(config: &AppConfig, model_path: &Path, device: B::Device) -> Result<()> {
        let engine = InferenceEngine::<B>::load(model_path, device.clone())?;
        let categories = CategoryIndex::new(engine.metadata().class_labels.iter().cloned())
            .context("Invalid class labels in model metadata")?;
        let dataset = load_dataset(config, &categories)?;
        if dataset.test.is_empty() {
            warn!("テストデータが0件です");
        }

        let evaluation = evaluate_model(
            engine.model(),
            engine.model_config(),
            &dataset.test,
            config.training.batch_size,
            &device,
        )?;
        write_report(config, &categories, &dataset.test, &evaluation)?;
        println!(
            "テスト正解率: {:.4} / テスト損失: {:.4} ({} 件)",
            evaluation.accuracy,
            evaluation.loss,
            evaluation.samples()
        );
        Ok(())
    }

    /// 再読み込みしたモデルが保存前と同じ予測を返すか確認
    fn verify_reload<B: Backend>(
        model: &crate::ml::VehicleClassifier<B>,
        engine: &InferenceEngine<B>,
        test: &Split,
        batch_size: usize,
        device: &B::Device,
    ) -> Result<()> {
        let images: Vec<PixelArray> = test.images().iter().take(batch_size.max(1)).cloned().collect();
        let Some(first) = images.first() else {
            return Ok(());
        };

        let refs: Vec<&PixelArray> = images.iter().collect();
        let expected = tensor_rows(model.predict(images_to_tensor::<B>(&refs, first.shape(), device)))?;
        let reloaded = engine.predict_probabilities(&images)?;

        let max_diff = expected
            .iter()
            .flatten()
            .zip(reloaded.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        if max_diff > RELOAD_TOLERANCE {
            anyhow::bail!("Reloaded model predictions differ (max difference {})", max_diff);
        }
        info!("再読み込みしたモデルの予測が一致しました ({} 件)", images.len());
        Ok(())
    }

    fn write_report(
        config: &AppConfig,
        categories: &CategoryIndex,
        split: &Split,
        evaluation: &Evaluation,
    ) -> Result<()> {
        let rows: Vec<PredictionRow> = evaluation
            .predictions
            .iter()
            .map(|p| {
                let file = split
                    .records()
                    .get(p.index)
                    .and_then(|r| r.path.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                PredictionRow::new(categories, p.index, file, p.expected, p.predicted, p.confidence)
            })
            .collect();

        write_predictions_csv(Path::new(&config.report.predictions_path), &rows)?;
        log_report(categories, &rows, config.report.sample_count, config.training.seed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn config_for(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.dataset.directory = dir.to_string_lossy().into_owned();
        config.dataset.loader.total_records = 4;
        config.dataset.loader.test_records = 0;
        config
    }

    #[test]
    fn test_load_dataset_uses_config() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["car_1.jpg", "bus_2.jpg", "van_3.jpg"] {
            RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))
                .save(dir.path().join(name))
                .unwrap();
        }
        let config = config_for(dir.path());
        let categories = config.category_index().unwrap();
        let dataset = load_dataset(&config, &categories).unwrap();
        assert_eq!(dataset.len(), 3);
        assert!(scan(&config).is_ok());
    }

    #[test]
    fn test_scan_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir.path().join("absent"));
        assert!(scan(&config).is_err());
    }

    #[test]
    fn test_init_config_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        init_config(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.categories.len(), 10);
    }
}
