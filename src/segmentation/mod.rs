pub mod catalog;
mod onnx;
mod preprocess;
mod registry;
pub mod types;

pub use catalog::ModelSpec;
pub use onnx::OnnxSegmenter;
pub use preprocess::Preprocessor;
pub use registry::{ModelLoader, ModelRegistry, RegistryError, SharedModel};
pub use types::{Matte, SegmentationModel};
