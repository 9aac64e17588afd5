use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Longest side of preview thumbnails
pub const PREVIEW_SIZE: u32 = 400;

/// Encode an image as PNG bytes
pub fn png_bytes(image: &DynamicImage) -> Result<Vec<u8>> {
    let _span = tracing::debug_span!("encode_png").entered();

    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(buffer)
}

/// `data:image/png;base64,...` URL for embedding in JSON responses
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Downscale to fit a `PREVIEW_SIZE` square, keeping the aspect ratio
pub fn preview_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let thumb = if image.width() > PREVIEW_SIZE || image.height() > PREVIEW_SIZE {
        image.resize(PREVIEW_SIZE, PREVIEW_SIZE, image::imageops::FilterType::Lanczos3)
    } else {
        image.clone()
    };
    png_bytes(&thumb)
}
