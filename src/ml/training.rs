//! モデル学習

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::InMemDataset,
    },
    module::Module,
    optim::RmsPropConfig,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};

use crate::dataset::{PixelArray, Split};
use crate::ml::ml_model::{images_to_tensor, ModelConfig, VehicleClassifier};
use crate::model::TrainingSettings;

/// データセットアイテム（デコード済み画像とクラスID）
#[derive(Clone, Debug)]
pub struct VehicleItem {
    pub pixels: PixelArray,
    pub label: usize,
}

/// バケットを burn のデータセットに変換
pub fn split_to_dataset(split: Split) -> InMemDataset<VehicleItem> {
    let (images, labels) = split.into_parts();
    let items = images
        .into_iter()
        .zip(labels)
        .map(|(pixels, label)| VehicleItem { pixels, label })
        .collect();
    InMemDataset::new(items)
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct VehicleBatcher {
    /// (高さ, 幅, チャネル)
    shape: (usize, usize, usize),
}

impl VehicleBatcher {
    pub fn new(shape: (usize, usize, usize)) -> Self {
        Self { shape }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct VehicleBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, VehicleItem, VehicleBatch<B>> for VehicleBatcher {
    fn batch(&self, items: Vec<VehicleItem>, device: &B::Device) -> VehicleBatch<B> {
        let images: Vec<&PixelArray> = items.iter().map(|item| &item.pixels).collect();
        let targets_vec: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        let images = images_to_tensor::<B>(&images, self.shape, device);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        VehicleBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<VehicleBatch<B>, ClassificationOutput<B>> for VehicleClassifier<B> {
    fn step(&self, batch: VehicleBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<VehicleBatch<B>, ClassificationOutput<B>> for VehicleClassifier<B> {
    fn step(&self, batch: VehicleBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// モデル学習を実行
///
/// テスト用バケットを検証データとして使います。
/// 学習済みモデルを推論用バックエンドに変換して返します。
pub fn train_model<B: AutodiffBackend>(
    model_config: &ModelConfig,
    train: Split,
    validation: Split,
    settings: &TrainingSettings,
    device: B::Device,
) -> Result<VehicleClassifier<B::InnerBackend>> {
    if train.is_empty() {
        anyhow::bail!("No training samples available");
    }
    if validation.is_empty() {
        warn!("テストデータが0件のため検証指標は出力されません");
    }
    if let Some(image) = train.images().iter().chain(validation.images()).find(|img| !model_config.accepts(img)) {
        anyhow::bail!(
            "Image shape {:?} does not match model input {}x{}x{}",
            image.shape(),
            model_config.image_height,
            model_config.image_width,
            model_config.channels
        );
    }

    let shape = (
        model_config.image_height,
        model_config.image_width,
        model_config.channels,
    );

    info!("学習データ: {} 枚", train.len());
    info!("検証データ: {} 枚", validation.len());

    let dataloader_train = DataLoaderBuilder::new(VehicleBatcher::new(shape))
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers)
        .build(split_to_dataset(train));

    let dataloader_val = DataLoaderBuilder::new(VehicleBatcher::new(shape))
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(split_to_dataset(validation));

    let model = model_config.init::<B>(&device)?;
    info!("モデルのパラメータ数: {}", model.num_params());

    // アーティファクトディレクトリ（学習後に削除）
    let artifact_dir = Path::new(&settings.artifact_dir);
    std::fs::create_dir_all(artifact_dir)?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    info!(
        "学習を開始します: エポック数 {}, バッチサイズ {}, 学習率 {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(
            model,
            RmsPropConfig::new().with_alpha(0.9).with_epsilon(1e-7).init(),
            settings.learning_rate,
        );

    let model_trained = learner.fit(dataloader_train, dataloader_val);
    info!("学習が完了しました");

    if let Err(e) = std::fs::remove_dir_all(artifact_dir) {
        warn!("アーティファクトディレクトリの削除に失敗しました ({}): {}", artifact_dir.display(), e);
    }

    Ok(model_trained.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CategoryIndex, DatasetLoader, LoaderOptions};
    use burn::data::dataset::Dataset;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn loaded_split() -> Split {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["car_1.jpg", "bus_2.jpg", "van_3.jpg"].iter().enumerate() {
            RgbImage::from_pixel(12, 12, Rgb([i as u8 * 80, 10, 10]))
                .save(dir.path().join(name))
                .unwrap();
        }
        let categories = CategoryIndex::vehicles();
        let options = LoaderOptions {
            total_records: 3,
            test_records: 0,
            ..LoaderOptions::default()
        };
        DatasetLoader::new(&categories, options)
            .load(dir.path())
            .unwrap()
            .train
    }

    #[test]
    fn test_split_to_dataset_keeps_labels() {
        let split = loaded_split();
        let labels = split.labels().to_vec();
        let dataset = split_to_dataset(split);

        assert_eq!(dataset.len(), 3);
        let items: Vec<usize> = (0..3).map(|i| dataset.get(i).unwrap().label).collect();
        assert_eq!(items, labels);
    }

    #[test]
    fn test_batcher_shapes() {
        let device = NdArrayDevice::Cpu;
        let split = loaded_split();
        let dataset = split_to_dataset(split);
        let items: Vec<VehicleItem> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        let batch: VehicleBatch<TestBackend> = VehicleBatcher::new((12, 12, 3)).batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 12, 12]);
        let targets = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(targets, labels);
    }

    #[test]
    fn test_train_model_rejects_empty_training_set() {
        let config = ModelConfig::new(10, 12, 12);
        let result = train_model::<burn::backend::Autodiff<TestBackend>>(
            &config,
            Split::default(),
            Split::default(),
            &TrainingSettings::default(),
            NdArrayDevice::Cpu,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_train_model_rejects_mismatched_shape() {
        let config = ModelConfig::new(10, 16, 16);
        let result = train_model::<burn::backend::Autodiff<TestBackend>>(
            &config,
            loaded_split(),
            Split::default(),
            &TrainingSettings::default(),
            NdArrayDevice::Cpu,
        );
        assert!(result.is_err());
    }
}
