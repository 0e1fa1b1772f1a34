pub mod ml_model;
pub mod training;
pub mod evaluation;
pub mod inference;

pub use ml_model::{argmax, images_to_tensor, tensor_rows, ModelConfig, VehicleClassifier, MIN_IMAGE_SIZE};
pub use training::{split_to_dataset, train_model, VehicleBatch, VehicleBatcher, VehicleItem};
pub use evaluation::{evaluate, Evaluation, Prediction};
pub use inference::{save_classifier, InferenceEngine};
