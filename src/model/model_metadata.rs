//! モデルメタデータの定義
//!
//! tar.gz形式でモデルと一緒に保存され、読み込み時にモデル構造の復元に使われます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（並び順がクラスID）
    /// 例: ["ambulance", "bicycle", "bus", ...]
    pub class_labels: Vec<String>,

    /// 入力画像の高さ（ピクセル）
    pub image_height: u32,

    /// 入力画像の幅（ピクセル）
    pub image_width: u32,

    /// 入力画像のチャネル数
    pub channels: u32,

    /// 全結合層のユニット数
    pub hidden_size: u32,

    /// 学習エポック数
    #[serde(default)]
    pub num_epochs: u32,

    /// バッチサイズ
    #[serde(default)]
    pub batch_size: u32,

    /// 学習率
    #[serde(default)]
    pub learning_rate: f64,

    /// 学習データ件数
    #[serde(default)]
    pub train_samples: u32,

    /// テストデータ件数
    #[serde(default)]
    pub test_samples: u32,

    /// テストデータでの正解率
    #[serde(default)]
    pub test_accuracy: Option<f64>,

    /// テストデータでの損失
    #[serde(default)]
    pub test_loss: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// モデル構造だけを埋めたメタデータを作成（学習情報は後から設定）
    pub fn new(
        class_labels: Vec<String>,
        image_height: u32,
        image_width: u32,
        channels: u32,
        hidden_size: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            image_height,
            image_width,
            channels,
            hidden_size,
            num_epochs: 0,
            batch_size: 0,
            learning_rate: 0.0,
            train_samples: 0,
            test_samples: 0,
            test_accuracy: None,
            test_loss: None,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
