use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{
    grayscale_close, grayscale_dilate, grayscale_erode, grayscale_open, Mask,
};

/// Largest feather sigma accepted from clients
pub const MAX_FEATHER: f32 = 10.0;

/// Largest number of dilate/erode passes accepted by [`refine_mask`]
pub const MAX_REFINE_ITERATIONS: u32 = 20;

/// Clean up mask edges with a morphological close followed by an open
///
/// Closing with a disk of `radius` fills pin holes inside the subject.
/// Opening with a disk one pixel smaller drops isolated specks in the
/// background while strands `2 * radius - 1` pixels wide survive.
/// `radius == 0` returns the mask unchanged.
pub fn enhance_edges(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let _span = tracing::debug_span!("enhance_edges", radius).entered();

    let closed = grayscale_close(mask, &Mask::disk(radius));
    grayscale_open(&closed, &Mask::disk(radius - 1))
}

/// Soften the mask boundary with a Gaussian blur of the given sigma
pub fn feather(mask: &GrayImage, amount: f32) -> GrayImage {
    if amount <= 0.0 || !amount.is_finite() {
        return mask.clone();
    }
    let _span = tracing::debug_span!("feather", amount).entered();

    gaussian_blur_f32(mask, amount.min(MAX_FEATHER))
}

/// Grow then shrink the mask with a 3x3 structuring element
///
/// Dilation runs `dilate_iterations` times before erosion runs
/// `erode_iterations` times. Both counts are capped at
/// [`MAX_REFINE_ITERATIONS`].
pub fn refine_mask(mask: &GrayImage, dilate_iterations: u32, erode_iterations: u32) -> GrayImage {
    let _span = tracing::debug_span!("refine_mask", dilate_iterations, erode_iterations).entered();

    let element = Mask::square(1);
    let mut refined = mask.clone();
    for _ in 0..dilate_iterations.min(MAX_REFINE_ITERATIONS) {
        refined = grayscale_dilate(&refined, &element);
    }
    for _ in 0..erode_iterations.min(MAX_REFINE_ITERATIONS) {
        refined = grayscale_erode(&refined, &element);
    }
    refined
}
