//! Upload → model → mask post-processing → cut-out.

use crate::postprocess::{self, MattingParams};
use crate::segmentation::ModelRegistry;
use anyhow::Result;
use image::{imageops, DynamicImage, GenericImageView, GrayImage, Rgb, RgbImage, RgbaImage};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Closing radius of the edge enhancement pass; opening uses one less
pub const EDGE_RADIUS: u8 = 2;

#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    pub model: String,
    pub enhance_edges: bool,
    /// Gaussian sigma for edge feathering, 0 disables
    pub feather_amount: f32,
    pub alpha_matting: bool,
    /// Master switch for edge enhancement, feathering and matting
    pub post_process: bool,
    /// Composite onto this RGBA colour instead of leaving the background transparent
    pub background: Option<[u8; 4]>,
}

impl ProcessingOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            enhance_edges: true,
            feather_amount: 2.0,
            alpha_matting: false,
            post_process: true,
            background: None,
        }
    }
}

pub struct RemovalOutput {
    pub cutout: RgbaImage,
    pub mask: GrayImage,
    pub model_used: String,
    pub original_size: (u32, u32),
    pub processing_time: Duration,
}

pub struct BackgroundRemover {
    registry: Arc<ModelRegistry>,
    max_size: u32,
}

impl BackgroundRemover {
    /// # Arguments
    /// * `registry` - Source of segmentation models
    /// * `max_size` - Longest side images are scaled down to before inference
    pub fn new(registry: Arc<ModelRegistry>, max_size: u32) -> Self {
        Self {
            registry,
            max_size: max_size.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Remove the background of `image`
    ///
    /// The returned cut-out and mask always have the dimensions of `image`.
    pub fn remove(&self, image: &DynamicImage, options: &ProcessingOptions) -> Result<RemovalOutput> {
        let _span = tracing::info_span!("remove_background", model = %options.model).entered();
        let start = Instant::now();

        let original_size = image.dimensions();
        let original = flatten_onto_white(image);
        let working = downscale(&original, self.max_size);

        let model = self.registry.get(&options.model)?;
        let (mut mask, model_used) = {
            // A run that panicked leaves no partial state in a session
            let mut model = model.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(model = %options.model, "Recovering model after a panicked run");
                poisoned.into_inner()
            });
            tracing::debug!(
                model = model.name(),
                input_size = ?model.input_size(),
                working_size = ?working.dimensions(),
                "Running segmentation"
            );
            (model.segment(&working)?, model.name().to_string())
        };

        if mask.dimensions() != working.dimensions() {
            mask = imageops::resize(&mask, working.width(), working.height(), imageops::FilterType::Lanczos3);
        }

        if options.post_process {
            if options.enhance_edges {
                mask = postprocess::enhance_edges(&mask, EDGE_RADIUS);
            }
            if options.feather_amount > 0.0 {
                mask = postprocess::feather(&mask, options.feather_amount);
            }
            if options.alpha_matting {
                mask = postprocess::alpha_matte(&working, &mask, &MattingParams::default())?;
            }
        }

        if mask.dimensions() != original_size {
            mask = imageops::resize(&mask, original_size.0, original_size.1, imageops::FilterType::Lanczos3);
        }

        let cutout = match options.background {
            Some(colour) => postprocess::cutout_with_background(&original, &mask, colour)?,
            None => postprocess::cutout(&original, &mask)?,
        };

        let processing_time = start.elapsed();
        tracing::info!(
            model = %model_used,
            width = original_size.0,
            height = original_size.1,
            elapsed_ms = processing_time.as_millis() as u64,
            "Background removed"
        );

        Ok(RemovalOutput {
            cutout,
            mask,
            model_used,
            original_size,
            processing_time,
        })
    }
}

/// Convert to RGB, compositing any transparency onto white
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = p[3] as u32;
        let over_white = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([over_white(p[0]), over_white(p[1]), over_white(p[2])])
    })
}

/// Scale down so the longest side is at most `max_size`, keeping the aspect ratio
pub fn downscale(image: &RgbImage, max_size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_size {
        return image.clone();
    }

    let ratio = max_size as f64 / longest as f64;
    let new_width = ((width as f64 * ratio) as u32).max(1);
    let new_height = ((height as f64 * ratio) as u32).max(1);
    imageops::resize(image, new_width, new_height, imageops::FilterType::Lanczos3)
}
