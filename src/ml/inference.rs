//! モデル保存・推論機能

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::dataset::PixelArray;
use crate::ml::ml_model::{argmax, images_to_tensor, tensor_rows, ModelConfig, VehicleClassifier};
use crate::model::{load_model_with_metadata, save_model_with_metadata, ModelMetadata};

/// 学習済みモデルをメタデータと共に保存
///
/// 実際に書き込んだパスを返します。
pub fn save_classifier<B: Backend>(
    output_path: &Path,
    metadata: &ModelMetadata,
    model: &VehicleClassifier<B>,
) -> Result<PathBuf> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = recorder
        .record(model.clone().into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    let written = save_model_with_metadata(output_path, metadata, &model_binary)?;
    info!("モデルを保存しました: {}", written.display());
    Ok(written)
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: VehicleClassifier<B>,
    metadata: ModelMetadata,
    model_config: ModelConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        let model_config = ModelConfig::from_metadata(&metadata);
        let model = model_config.init::<B>(&device)?;

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        info!(
            "モデルを読み込みました: {} ({} クラス)",
            model_path.as_ref().display(),
            metadata.num_classes()
        );

        Ok(Self {
            model,
            metadata,
            model_config,
            device,
        })
    }

    /// 複数画像のクラス確率を計算
    pub fn predict_probabilities(&self, images: &[PixelArray]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(image) = images.iter().find(|img| !self.model_config.accepts(img)) {
            anyhow::bail!(
                "Image shape {:?} does not match model input {}x{}x{}",
                image.shape(),
                self.model_config.image_height,
                self.model_config.image_width,
                self.model_config.channels
            );
        }

        let refs: Vec<&PixelArray> = images.iter().collect();
        let shape = (
            self.model_config.image_height,
            self.model_config.image_width,
            self.model_config.channels,
        );
        let tensor = images_to_tensor::<B>(&refs, shape, &self.device);
        tensor_rows(self.model.predict(tensor))
    }

    /// 単一画像を分類し (クラス名, 確率) を返す
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<(String, f32)> {
        let image = PixelArray::open(image_path.as_ref())?;
        self.classify_pixels(image)
    }

    pub fn classify_pixels(&self, image: PixelArray) -> Result<(String, f32)> {
        let rows = self.predict_probabilities(std::slice::from_ref(&image))?;
        let (class_idx, confidence) = rows
            .first()
            .and_then(|row| argmax(row))
            .ok_or_else(|| anyhow::anyhow!("推論結果が空です"))?;

        let class_name = self
            .metadata
            .class_labels
            .get(class_idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_idx))?;

        Ok((class_name, confidence))
    }

    pub fn model(&self) -> &VehicleClassifier<B> {
        &self.model
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }
}
