//! Background removal over HTTP: ONNX segmentation models, mask
//! post-processing and short-lived result storage.

pub mod config;
pub mod input;
pub mod pipeline;
pub mod postprocess;
pub mod segmentation;
pub mod server;
pub mod storage;

pub use config::Config;
pub use pipeline::{BackgroundRemover, ProcessingOptions, RemovalOutput};
pub use server::{build_router, serve, AppState};
