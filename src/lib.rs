//! 車両画像の分類
//!
//! ファイル名 `<カテゴリ>_<連番>.<拡張子>` の画像ディレクトリを読み込み、
//! 学習用とテスト用に振り分けてCNNを学習・評価・保存します。

#![recursion_limit = "256"]

pub mod commands;
pub mod dataset;
pub mod logging;
pub mod model;
pub mod report;

#[cfg(feature = "ml")]
pub mod ml;
