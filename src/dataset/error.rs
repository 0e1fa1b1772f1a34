//! データセット読み込みのエラー定義

use std::path::PathBuf;

use thiserror::Error;

/// エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetErrorKind {
    /// カテゴリ対応表の不整合（ラベルが信頼できない）
    Configuration,
    /// ディレクトリや画像ファイルへのアクセス失敗
    Resource,
}

/// データセット読み込み時のエラー
///
/// いずれも走査を中断させます。ファイル名の形式不正はここに含まれず、
/// スキップ情報として `LoadedDataset::skipped` に記録されます。
#[derive(Debug, Error)]
pub enum DatasetError {
    /// ファイル名のカテゴリが対応表に存在しない
    #[error("Unknown category {category:?} in file {path}")]
    UnknownCategory { category: String, path: PathBuf },
    /// カテゴリ対応表の構築に失敗
    #[error("Invalid category index: {reason}")]
    InvalidCategoryIndex { reason: String },
    /// ディレクトリが存在しない、または読み込めない
    #[error("Failed to read dataset directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// 画像のデコードに失敗
    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    /// 画像サイズが揃っていない
    #[error("Inconsistent image shape: expected {expected:?} (HxWxC), found {found:?}")]
    InconsistentShape {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
}

impl DatasetError {
    pub fn kind(&self) -> DatasetErrorKind {
        match self {
            DatasetError::UnknownCategory { .. } | DatasetError::InvalidCategoryIndex { .. } => {
                DatasetErrorKind::Configuration
            }
            DatasetError::ReadDir { .. }
            | DatasetError::Decode { .. }
            | DatasetError::InconsistentShape { .. } => DatasetErrorKind::Resource,
        }
    }
}
