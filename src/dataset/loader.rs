//! 画像ディレクトリの走査と学習/テスト分割
//!
//! ファイル名 `<category>_<sequence>.jpg` からカテゴリと連番を取り出し、
//! 連番がしきい値未満なら学習用、それ以外はテスト用に振り分けます。
//! 合計件数が要求数に達した時点で走査を打ち切ります。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::category::CategoryIndex;
use crate::dataset::error::DatasetError;
use crate::dataset::filename::{parse_file_name, FileNameError};
use crate::dataset::pixels::PixelArray;

/// ディレクトリの走査順
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// ファイルシステムの列挙順（実行ごとに変わりうる）
    #[default]
    Enumeration,
    /// 連番 → ファイル名の順に並べてから走査（決定的）
    SequenceNumber,
}

/// 未知カテゴリを見つけたときの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategoryPolicy {
    /// 走査を中断してエラーを返す
    #[default]
    Fail,
    /// スキップ情報に記録して続行
    Skip,
}

/// ローダー設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// 読み込む合計件数 N
    pub total_records: usize,
    /// テスト用の件数 T（しきい値の計算にのみ使用）
    pub test_records: usize,
    /// しきい値に加算する定数
    pub threshold_offset: u64,
    /// 対象とする拡張子（大文字小文字は区別しない）
    pub extensions: Vec<String>,
    pub order: ScanOrder,
    pub unknown_category: UnknownCategoryPolicy,
    /// 何件ごとに進捗を出力するか（0で無効）
    pub progress_interval: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            total_records: 900,
            test_records: 100,
            threshold_offset: SplitThreshold::DEFAULT_OFFSET,
            extensions: vec!["jpg".to_string()],
            order: ScanOrder::default(),
            unknown_category: UnknownCategoryPolicy::default(),
            progress_interval: 100,
        }
    }
}

/// 学習/テスト振り分けのしきい値
///
/// `(N - T) / カテゴリ数 + offset`（整数除算）。
/// 割り切れない場合は切り捨てます（小数のしきい値は使いません）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitThreshold(u64);

impl SplitThreshold {
    pub const DEFAULT_OFFSET: u64 = 1000;

    pub fn new(total_records: usize, test_records: usize, num_categories: usize, offset: u64) -> Self {
        let per_category = total_records.saturating_sub(test_records) / num_categories.max(1);
        Self((per_category as u64).saturating_add(offset))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_train(&self, sequence: u64) -> bool {
        sequence < self.0
    }
}

/// 読み込んだ画像の出自
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub label: usize,
    pub sequence: u64,
}

/// 学習用またはテスト用のバケット
///
/// 画像・ラベル・出自は常に同じ添字で対応します。
#[derive(Debug, Clone, Default)]
pub struct Split {
    images: Vec<PixelArray>,
    labels: Vec<usize>,
    records: Vec<ImageRecord>,
}

impl Split {
    fn push(&mut self, image: PixelArray, record: ImageRecord) {
        self.images.push(image);
        self.labels.push(record.label);
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &[PixelArray] {
        &self.images
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PixelArray, usize)> + '_ {
        self.images.iter().zip(self.labels.iter().copied())
    }

    /// (画像, ラベル) に分解
    pub fn into_parts(self) -> (Vec<PixelArray>, Vec<usize>) {
        (self.images, self.labels)
    }

    /// クラスIDごとの件数
    pub fn category_counts(&self, num_categories: usize) -> Vec<usize> {
        let mut counts = vec![0; num_categories];
        for &label in &self.labels {
            if let Some(count) = counts.get_mut(label) {
                *count += 1;
            }
        }
        counts
    }
}

/// スキップ理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedExtension,
    MalformedName(FileNameError),
    UnknownCategory(String),
}

/// 読み込み対象から外したファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// 走査結果
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub train: Split,
    pub test: Split,
    pub skipped: Vec<SkippedFile>,
    pub threshold: SplitThreshold,
    /// デコードした画像の数
    pub visited: usize,
}

impl LoadedDataset {
    fn empty(threshold: SplitThreshold) -> Self {
        Self {
            train: Split::default(),
            test: Split::default(),
            skipped: Vec::new(),
            threshold,
            visited: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 全画像の形状 (高さ, 幅, チャネル)。空なら None、揃っていなければエラー
    pub fn uniform_shape(&self) -> Result<Option<(usize, usize, usize)>, DatasetError> {
        let mut shapes = self
            .train
            .images()
            .iter()
            .chain(self.test.images())
            .map(PixelArray::shape);

        let Some(expected) = shapes.next() else {
            return Ok(None);
        };
        match shapes.find(|shape| *shape != expected) {
            Some(found) => Err(DatasetError::InconsistentShape { expected, found }),
            None => Ok(Some(expected)),
        }
    }

    /// (学習画像, 学習ラベル, テスト画像, テストラベル)
    pub fn into_parts(self) -> (Vec<PixelArray>, Vec<usize>, Vec<PixelArray>, Vec<usize>) {
        let (train_images, train_labels) = self.train.into_parts();
        let (test_images, test_labels) = self.test.into_parts();
        (train_images, train_labels, test_images, test_labels)
    }
}

/// 画像ディレクトリのローダー
pub struct DatasetLoader<'a> {
    categories: &'a CategoryIndex,
    options: LoaderOptions,
}

impl<'a> DatasetLoader<'a> {
    pub fn new(categories: &'a CategoryIndex, options: LoaderOptions) -> Self {
        Self { categories, options }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn threshold(&self) -> SplitThreshold {
        SplitThreshold::new(
            self.options.total_records,
            self.options.test_records,
            self.categories.len(),
            self.options.threshold_offset,
        )
    }

    /// ディレクトリを走査して学習/テストに振り分ける
    ///
    /// 未知カテゴリ（`Fail` 時）、ディレクトリ読み込み失敗、デコード失敗では
    /// 途中までの結果を返さずにエラーになります。
    /// 対象ファイルが N 件に満たない場合は集まった分だけを返します。
    pub fn load(&self, directory: &Path) -> Result<LoadedDataset, DatasetError> {
        let threshold = self.threshold();
        info!(
            "データを読み込みます: {} (合計 {} 件, テスト {} 件, しきい値 {})",
            directory.display(),
            self.options.total_records,
            self.options.test_records,
            threshold.value()
        );

        let mut dataset = LoadedDataset::empty(threshold);
        if self.options.total_records == 0 {
            return Ok(dataset);
        }

        let read_dir_error = |source| DatasetError::ReadDir {
            path: directory.to_path_buf(),
            source,
        };
        let entries = fs::read_dir(directory).map_err(read_dir_error)?;
        let paths = entries.map(|entry| entry.map(|e| e.path()).map_err(read_dir_error));

        match self.options.order {
            ScanOrder::Enumeration => self.scan(paths, &mut dataset)?,
            ScanOrder::SequenceNumber => {
                let mut paths = paths.collect::<Result<Vec<_>, _>>()?;
                paths.sort_by_cached_key(|path| sequence_sort_key(path));
                self.scan(paths.into_iter().map(Ok), &mut dataset)?
            }
        }

        info!(
            "{} 件の画像を読み込みました (学習 {} 件, テスト {} 件, スキップ {} 件)",
            dataset.len(),
            dataset.train.len(),
            dataset.test.len(),
            dataset.skipped.len()
        );
        if dataset.len() < self.options.total_records {
            warn!(
                "要求件数 {} 件に対して {} 件しか見つかりませんでした",
                self.options.total_records,
                dataset.len()
            );
        }

        Ok(dataset)
    }

    fn scan<I>(&self, paths: I, dataset: &mut LoadedDataset) -> Result<(), DatasetError>
    where
        I: IntoIterator<Item = Result<PathBuf, DatasetError>>,
    {
        let total = self.options.total_records;
        let interval = self.options.progress_interval;

        for path in paths {
            let path = path?;
            if !path.is_file() {
                continue;
            }

            if !self.has_image_extension(&path) {
                debug!("画像以外のファイルをスキップ: {}", path.display());
                dataset.skipped.push(SkippedFile {
                    path,
                    reason: SkipReason::UnsupportedExtension,
                });
                continue;
            }

            let parsed = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => parse_file_name(name).map(|p| (p.category.to_string(), p.sequence)),
                None => Err(FileNameError::NotUtf8),
            };
            let (category, sequence) = match parsed {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("ファイル名の形式が不正なためスキップ: {} ({})", path.display(), err);
                    dataset.skipped.push(SkippedFile {
                        path,
                        reason: SkipReason::MalformedName(err),
                    });
                    continue;
                }
            };

            let label = match self.categories.code(&category) {
                Some(label) => label,
                None => match self.options.unknown_category {
                    UnknownCategoryPolicy::Fail => {
                        return Err(DatasetError::UnknownCategory { category, path });
                    }
                    UnknownCategoryPolicy::Skip => {
                        warn!("未知のカテゴリ {:?} のためスキップ: {}", category, path.display());
                        dataset.skipped.push(SkippedFile {
                            path,
                            reason: SkipReason::UnknownCategory(category),
                        });
                        continue;
                    }
                },
            };

            let image = PixelArray::open(&path).map_err(|source| DatasetError::Decode {
                path: path.clone(),
                source,
            })?;

            if interval > 0 && dataset.visited != 0 && dataset.visited % interval == 0 {
                info!("{} of {} pictures loaded.", dataset.visited, total);
            }
            dataset.visited += 1;

            let record = ImageRecord {
                path,
                label,
                sequence,
            };
            if dataset.threshold.is_train(sequence) {
                dataset.train.push(image, record);
            } else {
                dataset.test.push(image, record);
            }

            if dataset.len() >= total {
                break;
            }
        }

        Ok(())
    }

    fn has_image_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.options
            .extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

/// 連番順の並び替えキー（解析できない名前は末尾）
fn sequence_sort_key(path: &Path) -> (bool, u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match parse_file_name(&name) {
        Ok(parsed) => (false, parsed.sequence, name),
        Err(_) => (true, 0, name),
    }
}
