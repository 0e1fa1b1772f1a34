pub mod category;
pub mod error;
pub mod filename;
pub mod loader;
pub mod pixels;

pub use category::{CategoryIndex, VEHICLE_CATEGORIES};
pub use error::{DatasetError, DatasetErrorKind};
pub use filename::{parse_file_name, FileNameError, ImageFileName};
pub use loader::{
    DatasetLoader, ImageRecord, LoadedDataset, LoaderOptions, ScanOrder, SkipReason, SkippedFile,
    Split, SplitThreshold, UnknownCategoryPolicy,
};
pub use pixels::PixelArray;
