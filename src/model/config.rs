//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、データセット、学習、モデル保存先などをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::{CategoryIndex, DatasetError, LoaderOptions, VEHICLE_CATEGORIES};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// 画像ディレクトリ
    pub directory: String,
    pub loader: LoaderOptions,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            directory: "data/100vehiclessmall".to_string(),
            loader: LoaderOptions::default(),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// シャッフル用シード
    pub seed: u64,
    /// 学習中の一時ファイル置き場
    pub artifact_dir: String,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 30,
            batch_size: 32,
            num_workers: 0,
            learning_rate: 1e-4,
            seed: 42,
            artifact_dir: std::env::temp_dir()
                .join("vehicle_classifier_training")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// 保存・読み込みするモデルファイル (tar.gz)
    pub model_path: String,
    /// 全結合層のユニット数
    pub hidden_size: usize,
    /// 畳み込みブロック後のドロップアウト率
    pub conv_dropout: f64,
    /// 全結合層のドロップアウト率
    pub dense_dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/vehicles_100.tar.gz".to_string(),
            hidden_size: 512,
            conv_dropout: 0.25,
            dense_dropout: 0.5,
        }
    }
}

/// 評価レポート設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// 予測結果CSVの出力先
    pub predictions_path: String,
    /// ログに出す予測サンプル数
    pub sample_count: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            predictions_path: "reports/predictions.csv".to_string(),
            sample_count: 100,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// カテゴリ名（並び順がクラスID）
    pub categories: Vec<String>,
    pub dataset: DatasetSettings,
    pub training: TrainingSettings,
    pub model: ModelSettings,
    pub report: ReportSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            categories: VEHICLE_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            dataset: DatasetSettings::default(),
            training: TrainingSettings::default(),
            model: ModelSettings::default(),
            report: ReportSettings::default(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("設定ファイル {} が存在しません。デフォルト設定を使用します", path.display());
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// カテゴリ対応表を構築
    pub fn category_index(&self) -> Result<CategoryIndex, DatasetError> {
        CategoryIndex::new(self.categories.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ScanOrder, UnknownCategoryPolicy};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.categories.len(), 10);
        assert_eq!(config.training.num_epochs, 30);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.dataset.loader.total_records, 900);
        assert_eq!(config.dataset.loader.test_records, 100);
        assert_eq!(config.dataset.loader.threshold_offset, 1000);
        assert_eq!(config.category_index().unwrap(), CategoryIndex::vehicles());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.categories, deserialized.categories);
        assert_eq!(config.dataset.loader, deserialized.dataset.loader);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "device_type": "cpu",
            "dataset": { "directory": "/mnt/vehicles", "loader": { "order": "sequence_number", "unknown_category": "skip" } },
            "training": { "num_epochs": 2 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.dataset.directory, "/mnt/vehicles");
        assert_eq!(config.dataset.loader.order, ScanOrder::SequenceNumber);
        assert_eq!(config.dataset.loader.unknown_category, UnknownCategoryPolicy::Skip);
        assert_eq!(config.dataset.loader.total_records, 900);
        assert_eq!(config.training.num_epochs, 2);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.model.hidden_size, 512);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.training.learning_rate = 0.01;
        config.save(&path).unwrap();

        let loaded = AppConfig::load_or_default(&path);
        assert_eq!(loaded.training.learning_rate, 0.01);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load_or_default(&path);
        assert_eq!(config.training.num_epochs, 30);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
