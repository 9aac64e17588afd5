use anyhow::Result;
use image::{GrayImage, RgbImage};

/// Foreground mask: 0 = background, 255 = foreground
/// Dimensions match the input frame dimensions
pub type Matte = GrayImage;

/// Trait for segmentation models
/// Allows swapping between different backends (ONNX exports, test doubles, etc.)
pub trait SegmentationModel: Send {
    /// Process a frame and return a foreground mask
    ///
    /// # Arguments
    /// * `frame` - Input RGB frame
    ///
    /// # Returns
    /// * Mask with the same dimensions as `frame`
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte>;

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Catalog name of the model
    fn name(&self) -> &str;
}
