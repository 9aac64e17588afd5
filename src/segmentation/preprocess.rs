use super::catalog::{InputScale, ModelSpec};
use anyhow::{ensure, Result};
use image::{imageops, GrayImage, Luma, RgbImage};
use ndarray::{Array4, ArrayView2};

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    mean: [f32; 3],
    std: [f32; 3],
    scale: InputScale,
}

impl Preprocessor {
    pub fn for_spec(spec: &ModelSpec) -> Self {
        Self {
            target_width: spec.input_size,
            target_height: spec.input_size,
            mean: spec.mean,
            std: spec.std,
            scale: spec.scale,
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Scale to [0, 1] (by 255 or by the brightest channel value)
    /// 3. Subtract mean, divide by std
    /// 4. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Lanczos3,
            )
        } else {
            image.clone()
        };

        let divisor = match self.scale {
            InputScale::Unit => 255.0,
            InputScale::MaxValue => resized
                .as_raw()
                .iter()
                .copied()
                .max()
                .map_or(1e-6, |m| (m as f32).max(1e-6)),
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / divisor;
                tensor[[0, c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
            }
        }

        Ok(tensor)
    }

    /// Turn a raw single-channel prediction into a mask at the frame size
    ///
    /// # Arguments
    /// * `prediction` - Model output at model resolution, `[height, width]`
    /// * `sigmoid` - Apply a logistic sigmoid first
    /// * `min_max_normalize` - Stretch values to the full range
    /// * `target_width` / `target_height` - Desired output size
    pub fn prediction_to_matte(
        prediction: ArrayView2<f32>,
        sigmoid: bool,
        min_max_normalize: bool,
        target_width: u32,
        target_height: u32,
    ) -> Result<GrayImage> {
        let _span = tracing::debug_span!("postprocess").entered();

        let (rows, cols) = prediction.dim();
        ensure!(rows > 0 && cols > 0, "model returned an empty prediction");

        let mut values = if sigmoid {
            prediction.mapv(|v| 1.0 / (1.0 + (-v).exp()))
        } else {
            prediction.to_owned()
        };

        if min_max_normalize {
            let min = values.iter().copied().fold(f32::INFINITY, f32::min);
            let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            if (max - min).abs() < f32::EPSILON {
                values.fill(0.0);
            } else {
                values.mapv_inplace(|v| (v - min) / (max - min));
            }
        }

        let matte = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            let value = values[[y as usize, x as usize]];
            Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        if matte.dimensions() == (target_width, target_height) {
            return Ok(matte);
        }

        Ok(imageops::resize(
            &matte,
            target_width,
            target_height,
            imageops::FilterType::Lanczos3,
        ))
    }
}
