//! Trimap construction and alpha estimation in the unknown band.

use anyhow::{ensure, Result};
use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};
use ndarray::Array2;

pub const TRIMAP_FOREGROUND: u8 = 255;
pub const TRIMAP_BACKGROUND: u8 = 0;
pub const TRIMAP_UNKNOWN: u8 = 128;

#[derive(Debug, Clone, Copy)]
pub struct MattingParams {
    /// Erosion radius used to find definite foreground
    pub erode_radius: u8,
    /// Dilation radius used to find definite background
    pub dilate_radius: u8,
    /// Eroded mask values above this are definite foreground
    pub foreground_threshold: u8,
    /// Dilated mask values below this are definite background
    pub background_threshold: u8,
    /// Half-size of the window sampled for local colour models
    pub window_radius: u32,
}

impl Default for MattingParams {
    fn default() -> Self {
        Self {
            erode_radius: 5,
            dilate_radius: 10,
            foreground_threshold: 200,
            background_threshold: 50,
            window_radius: 12,
        }
    }
}

/// Label every pixel as definite foreground, definite background or unknown
pub fn build_trimap(mask: &GrayImage, params: &MattingParams) -> GrayImage {
    let eroded = grayscale_erode(mask, &Mask::disk(params.erode_radius));
    let dilated = grayscale_dilate(mask, &Mask::disk(params.dilate_radius));

    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if eroded.get_pixel(x, y)[0] > params.foreground_threshold {
            Luma([TRIMAP_FOREGROUND])
        } else if dilated.get_pixel(x, y)[0] < params.background_threshold {
            Luma([TRIMAP_BACKGROUND])
        } else {
            Luma([TRIMAP_UNKNOWN])
        }
    })
}

/// Summed-area table over one channel of the pixels selected by a trimap label
struct Integral {
    table: Array2<u64>,
}

impl Integral {
    fn new(width: u32, height: u32, value: impl Fn(u32, u32) -> u64) -> Self {
        let mut table = Array2::<u64>::zeros((height as usize + 1, width as usize + 1));
        for y in 0..height as usize {
            let mut row = 0u64;
            for x in 0..width as usize {
                row += value(x as u32, y as u32);
                table[[y + 1, x + 1]] = table[[y, x + 1]] + row;
            }
        }
        Self { table }
    }

    /// Sum over the half-open rectangle `[x0, x1) x [y0, y1)`
    fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        self.table[[y1, x1]] + self.table[[y0, x0]] - self.table[[y0, x1]] - self.table[[y1, x0]]
    }
}

/// Per-label colour sums: r, g, b, count
struct ColourModel {
    channels: [Integral; 4],
}

impl ColourModel {
    fn new(image: &RgbImage, trimap: &GrayImage, label: u8) -> Self {
        let (w, h) = image.dimensions();
        let selected = |x, y| trimap.get_pixel(x, y)[0] == label;
        let channel = |c: usize| {
            Integral::new(w, h, |x, y| {
                if selected(x, y) {
                    image.get_pixel(x, y)[c] as u64
                } else {
                    0
                }
            })
        };
        Self {
            channels: [
                channel(0),
                channel(1),
                channel(2),
                Integral::new(w, h, |x, y| selected(x, y) as u64),
            ],
        }
    }

    fn mean(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> Option<[f32; 3]> {
        let count = self.channels[3].sum(x0, y0, x1, y1);
        if count == 0 {
            return None;
        }
        let n = count as f32;
        Some([
            self.channels[0].sum(x0, y0, x1, y1) as f32 / n,
            self.channels[1].sum(x0, y0, x1, y1) as f32 / n,
            self.channels[2].sum(x0, y0, x1, y1) as f32 / n,
        ])
    }
}

/// Estimate a smooth alpha channel for the unknown band of the trimap
///
/// Definite regions keep their label. Each unknown pixel is projected onto
/// the line between the mean foreground and mean background colours of its
/// neighbourhood. Where a neighbourhood lacks either colour, or the two are
/// indistinguishable, the softened model mask is used instead.
pub fn alpha_matte(image: &RgbImage, mask: &GrayImage, params: &MattingParams) -> Result<GrayImage> {
    ensure!(
        image.dimensions() == mask.dimensions(),
        "image is {:?} but mask is {:?}",
        image.dimensions(),
        mask.dimensions()
    );
    let _span = tracing::debug_span!("alpha_matte").entered();

    let (width, height) = mask.dimensions();
    let trimap = build_trimap(mask, params);
    let softened = gaussian_blur_f32(mask, 2.0);
    let foreground = ColourModel::new(image, &trimap, TRIMAP_FOREGROUND);
    let background = ColourModel::new(image, &trimap, TRIMAP_BACKGROUND);

    let r = params.window_radius as usize;
    let mut unknown = 0usize;
    let matte = GrayImage::from_fn(width, height, |x, y| {
        let label = trimap.get_pixel(x, y)[0];
        if label != TRIMAP_UNKNOWN {
            return Luma([label]);
        }
        unknown += 1;

        let (xu, yu) = (x as usize, y as usize);
        let x0 = xu.saturating_sub(r);
        let y0 = yu.saturating_sub(r);
        let x1 = (xu + r + 1).min(width as usize);
        let y1 = (yu + r + 1).min(height as usize);

        let fallback = *softened.get_pixel(x, y);
        let (Some(f), Some(b)) = (foreground.mean(x0, y0, x1, y1), background.mean(x0, y0, x1, y1))
        else {
            return fallback;
        };

        let pixel = image.get_pixel(x, y);
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for c in 0..3 {
            let fb = f[c] - b[c];
            numerator += (pixel[c] as f32 - b[c]) * fb;
            denominator += fb * fb;
        }
        // Foreground and background colours closer than ~10 levels carry no signal
        if denominator < 100.0 {
            return fallback;
        }

        let alpha = (numerator / denominator).clamp(0.0, 1.0);
        Luma([(alpha * 255.0).round() as u8])
    });

    tracing::debug!(unknown, "Alpha matting refined unknown band");
    Ok(matte)
}
