//! 車両分類CNNモデルの定義
//!
//! 入力: [batch, channels, height, width]（画素値は 0.0〜1.0）
//! 出力: クラスごとのロジット [batch, num_classes]

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use tracing::debug;

use crate::dataset::PixelArray;
use crate::model::ModelMetadata;

/// 入力画像の最小辺長
pub const MIN_IMAGE_SIZE: usize = 10;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像の高さ
    pub image_height: usize,
    /// 入力画像の幅
    pub image_width: usize,
    /// 入力チャネル数
    #[config(default = 3)]
    pub channels: usize,
    /// 畳み込みブロック後のドロップアウト率
    #[config(default = 0.25)]
    pub conv_dropout: f64,
    /// 全結合層のドロップアウト率
    #[config(default = 0.5)]
    pub dense_dropout: f64,
    /// 全結合層のユニット数
    #[config(default = 512)]
    pub hidden_size: usize,
}

/// 1ブロック分 (Conv same -> Conv valid -> Pool 2x2) の出力サイズ
fn block_output_size(size: usize) -> Option<usize> {
    let pooled = size.checked_sub(2)? / 2;
    (pooled > 0).then_some(pooled)
}

impl ModelConfig {
    /// メタデータからモデル構造を復元（ドロップアウトは推論時に無効なので既定値）
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        ModelConfig::new(
            metadata.num_classes(),
            metadata.image_height as usize,
            metadata.image_width as usize,
        )
        .with_channels(metadata.channels as usize)
        .with_hidden_size(metadata.hidden_size as usize)
    }

    /// 2ブロック通過後の特徴マップサイズ (高さ, 幅)
    pub fn feature_map_size(&self) -> Option<(usize, usize)> {
        let height = block_output_size(block_output_size(self.image_height)?)?;
        let width = block_output_size(block_output_size(self.image_width)?)?;
        Some((height, width))
    }

    /// 画像がこのモデルの入力形状と一致するか
    pub fn accepts(&self, image: &PixelArray) -> bool {
        image.shape() == (self.image_height, self.image_width, self.channels)
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<VehicleClassifier<B>> {
        if self.num_classes == 0 || self.channels == 0 {
            anyhow::bail!(
                "Invalid model config: {} classes, {} channels",
                self.num_classes,
                self.channels
            );
        }
        let (feature_height, feature_width) = self.feature_map_size().ok_or_else(|| {
            anyhow::anyhow!(
                "Input size {}x{} is too small (minimum {}x{})",
                self.image_height,
                self.image_width,
                MIN_IMAGE_SIZE,
                MIN_IMAGE_SIZE
            )
        })?;

        // 特徴次元 d = 64チャネル * 高さ * 幅
        let d = 64 * feature_height * feature_width;
        debug!(
            "[Model] 入力 {}x{}x{} -> 特徴マップ 64x{}x{} (d = {}) -> FC {} -> {}",
            self.channels,
            self.image_height,
            self.image_width,
            feature_height,
            feature_width,
            d,
            self.hidden_size,
            self.num_classes
        );

        Ok(VehicleClassifier {
            conv1: Conv2dConfig::new([self.channels, 32], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv2: Conv2dConfig::new([32, 32], [3, 3]).init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout1: DropoutConfig::new(self.conv_dropout).init(),

            conv3: Conv2dConfig::new([32, 64], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv4: Conv2dConfig::new([64, 64], [3, 3]).init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout2: DropoutConfig::new(self.conv_dropout).init(),

            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            dropout3: DropoutConfig::new(self.dense_dropout).init(),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),

            activation: Relu::new(),
        })
    }
}

/// 車両分類用CNNモデル
///
/// # アーキテクチャ
/// - Conv 3x3 (same) 32 + ReLU, Conv 3x3 (valid) 32 + ReLU, MaxPool 2x2, Dropout
/// - Conv 3x3 (same) 64 + ReLU, Conv 3x3 (valid) 64 + ReLU, MaxPool 2x2, Dropout
/// - Flatten
/// - FC: d -> hidden + ReLU + Dropout
/// - FC: hidden -> num_classes
/// - Softmax (予測時)
#[derive(Module, Debug)]
pub struct VehicleClassifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool1: MaxPool2d,
    dropout1: Dropout,

    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    pool2: MaxPool2d,
    dropout2: Dropout,

    fc1: Linear<B>,
    dropout3: Dropout,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> VehicleClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, channels, height, width]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.dropout1.forward(self.pool1.forward(x));

        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.activation.forward(self.conv4.forward(x));
        let x = self.dropout2.forward(self.pool2.forward(x));

        let [batch_size, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout3.forward(x);
        self.fc2.forward(x)
    }

    /// クラス確率 [batch_size, num_classes]
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 画像群を [n, channels, height, width] のテンソルに変換
///
/// 呼び出し側で形状が揃っていることを保証してください。
pub fn images_to_tensor<B: Backend>(
    images: &[&PixelArray],
    shape: (usize, usize, usize),
    device: &B::Device,
) -> Tensor<B, 4> {
    let (height, width, channels) = shape;
    let mut all_pixels = Vec::with_capacity(images.len() * channels * height * width);
    for image in images {
        all_pixels.extend(image.to_chw_f32());
    }
    Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
        .reshape([images.len(), channels, height, width])
}

/// テンソルを行ごとの Vec<f32> に変換
pub fn tensor_rows<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, cols] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read tensor data: {:?}", e))?;
    Ok(values.chunks(cols.max(1)).map(<[f32]>::to_vec).collect())
}

/// 最大値の (インデックス, 値)
pub fn argmax(row: &[f32]) -> Option<(usize, f32)> {
    row.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (idx, value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((idx, value)),
        })
}
