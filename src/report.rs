//! 評価レポートの出力
//!
//! 予測結果をCSVに書き出し、ランダムに選んだサンプルとカテゴリ別正解率をログに出します。

use anyhow::{Context, Result};
use rand::{rngs::StdRng, seq::index::sample, SeedableRng};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::dataset::CategoryIndex;

/// 予測結果1行分
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRow {
    pub index: usize,
    pub file: String,
    pub expected: String,
    pub predicted: String,
    pub confidence: f32,
    pub correct: bool,
}

impl PredictionRow {
    pub fn new(
        categories: &CategoryIndex,
        index: usize,
        file: String,
        expected: usize,
        predicted: usize,
        confidence: f32,
    ) -> Self {
        let label = |code: usize| {
            categories
                .name(code)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", code))
        };
        Self {
            index,
            file,
            expected: label(expected),
            predicted: label(predicted),
            confidence,
            correct: expected == predicted,
        }
    }
}

/// カテゴリ別の正解率
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAccuracy {
    pub category: String,
    pub correct: usize,
    pub total: usize,
}

impl CategoryAccuracy {
    pub fn accuracy(&self) -> Option<f64> {
        (self.total > 0).then(|| self.correct as f64 / self.total as f64)
    }
}

/// 予測結果をCSVに書き出す
pub fn write_predictions_csv(path: &Path, rows: &[PredictionRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create report directory: {:?}", parent))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .context(format!("Failed to create report file: {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("予測結果を書き出しました: {} ({} 件)", path.display(), rows.len());
    Ok(())
}

/// シード付きで重複なしに最大 `count` 件を選ぶ（元の並び順を保つ）
pub fn sample_rows(rows: &[PredictionRow], count: usize, seed: u64) -> Vec<&PredictionRow> {
    let amount = count.min(rows.len());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = sample(&mut rng, rows.len(), amount).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| &rows[i]).collect()
}

/// カテゴリ別正解率を集計
pub fn category_accuracy(categories: &CategoryIndex, rows: &[PredictionRow]) -> Vec<CategoryAccuracy> {
    categories
        .names()
        .iter()
        .map(|name| {
            let matching = rows.iter().filter(|row| &row.expected == name);
            let (correct, total) = matching.fold((0, 0), |(correct, total), row| {
                (correct + usize::from(row.correct), total + 1)
            });
            CategoryAccuracy {
                category: name.clone(),
                correct,
                total,
            }
        })
        .collect()
}

/// サンプルとカテゴリ別正解率をログ出力
pub fn log_report(categories: &CategoryIndex, rows: &[PredictionRow], sample_count: usize, seed: u64) {
    let samples = sample_rows(rows, sample_count, seed);
    info!("予測サンプル ({} 件):", samples.len());
    for row in samples {
        info!(
            "  [{}] {} 正解: {} 予測: {} ({:.3}){}",
            row.index,
            row.file,
            row.expected,
            row.predicted,
            row.confidence,
            if row.correct { "" } else { " x" }
        );
    }

    info!("カテゴリ別正解率:");
    for entry in category_accuracy(categories, rows) {
        match entry.accuracy() {
            Some(accuracy) => info!(
                "  {:<12} {:>3}/{:<3} {:.3}",
                entry.category, entry.correct, entry.total, accuracy
            ),
            None => info!("  {:<12}   0/0   -", entry.category),
        }
    }
}
