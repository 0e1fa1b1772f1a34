//! テストデータでのモデル評価

use anyhow::Result;
use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use tracing::info;

use crate::dataset::{PixelArray, Split};
use crate::ml::ml_model::{argmax, images_to_tensor, tensor_rows, ModelConfig, VehicleClassifier};

/// 1サンプル分の予測結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// バケット内の添字
    pub index: usize,
    pub expected: usize,
    pub predicted: usize,
    /// 予測クラスの確率
    pub confidence: f32,
    /// 全クラスの確率
    pub probabilities: Vec<f32>,
}

impl Prediction {
    pub fn is_correct(&self) -> bool {
        self.expected == self.predicted
    }
}

/// 評価結果
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub correct: usize,
    pub predictions: Vec<Prediction>,
}

impl Evaluation {
    pub fn samples(&self) -> usize {
        self.predictions.len()
    }

    /// クラスごとの (正解数, 件数)
    pub fn per_category(&self, num_categories: usize) -> Vec<(usize, usize)> {
        let mut table = vec![(0, 0); num_categories];
        for prediction in &self.predictions {
            if let Some(entry) = table.get_mut(prediction.expected) {
                entry.1 += 1;
                if prediction.is_correct() {
                    entry.0 += 1;
                }
            }
        }
        table
    }
}

/// モデルをバケット全体で評価
///
/// 損失はバッチごとの平均損失をバッチ件数で重み付けした平均です。
/// 画像の形状がモデルの入力と異なる場合はエラーになります。
pub fn evaluate<B: Backend>(
    model: &VehicleClassifier<B>,
    model_config: &ModelConfig,
    split: &Split,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    if split.is_empty() {
        return Ok(Evaluation::default());
    }
    let shape = (
        model_config.image_height,
        model_config.image_width,
        model_config.channels,
    );
    if let Some((index, image)) = split
        .images()
        .iter()
        .enumerate()
        .find(|(_, img)| !model_config.accepts(img))
    {
        anyhow::bail!(
            "Image #{} has shape {:?}, but the model expects {:?}",
            index,
            image.shape(),
            shape
        );
    }
    let batch_size = batch_size.max(1);
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut predictions = Vec::with_capacity(split.len());
    let mut weighted_loss = 0.0;

    for (batch_idx, (images, labels)) in split
        .images()
        .chunks(batch_size)
        .zip(split.labels().chunks(batch_size))
        .enumerate()
    {
        let refs: Vec<&PixelArray> = images.iter().collect();
        let input = images_to_tensor::<B>(&refs, shape, device);
        let targets_vec: Vec<i64> = labels.iter().map(|&label| label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        let logits = model.forward(input);
        let loss: f64 = loss_fn
            .forward(logits.clone(), targets)
            .into_scalar()
            .elem::<f64>();
        weighted_loss += loss * labels.len() as f64;

        let rows = tensor_rows(burn::tensor::activation::softmax(logits, 1))?;
        for (offset, (row, &expected)) in rows.into_iter().zip(labels).enumerate() {
            let (predicted, confidence) =
                argmax(&row).ok_or_else(|| anyhow::anyhow!("Empty prediction row"))?;
            predictions.push(Prediction {
                index: batch_idx * batch_size + offset,
                expected,
                predicted,
                confidence,
                probabilities: row,
            });
        }
    }

    let samples = predictions.len();
    let correct = predictions.iter().filter(|p| p.is_correct()).count();
    let evaluation = Evaluation {
        loss: weighted_loss / samples as f64,
        accuracy: correct as f64 / samples as f64,
        correct,
        predictions,
    };
    info!(
        "評価: {} 件中 {} 件正解 (正解率 {:.4}, 損失 {:.4})",
        samples, correct, evaluation.accuracy, evaluation.loss
    );
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CategoryIndex, DatasetLoader, LoaderOptions};
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn fixture_split(names: &[&str]) -> Split {
        fixture_split_sized(names, 16)
    }

    fn fixture_split_sized(names: &[&str], size: u32) -> Split {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in names.iter().enumerate() {
            RgbImage::from_pixel(size, size, Rgb([(i * 40) as u8, 100, 200]))
                .save(dir.path().join(name))
                .unwrap();
        }
        let categories = CategoryIndex::vehicles();
        let options = LoaderOptions {
            total_records: names.len(),
            test_records: 0,
            ..LoaderOptions::default()
        };
        DatasetLoader::new(&categories, options)
            .load(dir.path())
            .unwrap()
            .train
    }

    #[test]
    fn test_evaluate_counts_every_sample() {
        let device = NdArrayDevice::Cpu;
        let split = fixture_split(&["car_1.jpg", "bus_2.jpg", "taxi_3.jpg", "van_4.jpg", "truck_5.jpg"]);
        let config = ModelConfig::new(10, 16, 16).with_hidden_size(16);
        let model = config.init::<TestBackend>(&device).unwrap();

        // バッチ境界をまたぐ
        let evaluation = evaluate(&model, &config, &split, 2, &device).unwrap();
        assert_eq!(evaluation.samples(), 5);
        assert!(evaluation.loss.is_finite());
        assert!((0.0..=1.0).contains(&evaluation.accuracy));

        let indices: Vec<usize> = evaluation.predictions.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        let expected: Vec<usize> = evaluation.predictions.iter().map(|p| p.expected).collect();
        assert_eq!(expected, split.labels());

        for prediction in &evaluation.predictions {
            assert_eq!(prediction.probabilities.len(), 10);
            assert!(prediction.predicted < 10);
        }
    }

    #[test]
    fn test_batch_size_does_not_change_results() {
        let device = NdArrayDevice::Cpu;
        let split = fixture_split(&["car_1.jpg", "bus_2.jpg", "taxi_3.jpg"]);
        let config = ModelConfig::new(10, 16, 16).with_hidden_size(16);
        let model = config.init::<TestBackend>(&device).unwrap();

        let whole = evaluate(&model, &config, &split, 32, &device).unwrap();
        let single = evaluate(&model, &config, &split, 1, &device).unwrap();
        assert!((whole.loss - single.loss).abs() < 1e-4);
        assert_eq!(whole.correct, single.correct);
    }

    #[test]
    fn test_empty_split() {
        let device = NdArrayDevice::Cpu;
        let config = ModelConfig::new(10, 16, 16).with_hidden_size(16);
        let model = config.init::<TestBackend>(&device).unwrap();
        let evaluation = evaluate(&model, &config, &Split::default(), 32, &device).unwrap();
        assert_eq!(evaluation.samples(), 0);
    }

    #[test]
    fn test_smaller_images_are_rejected() {
        let device = NdArrayDevice::Cpu;
        let split = fixture_split_sized(&["car_1.jpg", "bus_2.jpg"], 12);
        let config = ModelConfig::new(10, 16, 16).with_hidden_size(16);
        let model = config.init::<TestBackend>(&device).unwrap();

        assert!(evaluate(&model, &config, &split, 32, &device).is_err());
    }

    #[test]
    fn test_greyscale_images_are_rejected() {
        let device = NdArrayDevice::Cpu;
        let grey = image::GrayImage::from_pixel(16, 16, image::Luma([128]));
        let split = {
            let dir = tempfile::tempdir().unwrap();
            grey.save(dir.path().join("car_1.png")).unwrap();
            let categories = CategoryIndex::vehicles();
            let options = LoaderOptions {
                total_records: 1,
                test_records: 0,
                extensions: vec!["png".to_string()],
                ..LoaderOptions::default()
            };
            DatasetLoader::new(&categories, options)
                .load(dir.path())
                .unwrap()
                .train
        };
        assert_eq!(split.images()[0].shape(), (16, 16, 1));

        let config = ModelConfig::new(10, 16, 16).with_hidden_size(16);
        let model = config.init::<TestBackend>(&device).unwrap();
        assert!(evaluate(&model, &config, &split, 32, &device).is_err());
    }

    #[test]
    fn test_per_category() {
        let prediction = |expected, predicted| Prediction {
            index: 0,
            expected,
            predicted,
            confidence: 0.5,
            probabilities: vec![],
        };
        let evaluation = Evaluation {
            loss: 0.0,
            accuracy: 0.5,
            correct: 2,
            predictions: vec![prediction(0, 0), prediction(0, 1), prediction(1, 1), prediction(1, 0)],
        };
        assert_eq!(evaluation.per_category(3), vec![(1, 2), (1, 2), (0, 0)]);
    }
}
