use anyhow::{bail, ensure, Result};
use image::{GrayImage, Rgba, RgbaImage, RgbImage};

/// Attach a mask as the alpha channel of an image
pub fn cutout(image: &RgbImage, mask: &GrayImage) -> Result<RgbaImage> {
    ensure_same_size(image, mask)?;

    Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        Rgba([pixel[0], pixel[1], pixel[2], mask.get_pixel(x, y)[0]])
    }))
}

/// Blend the masked foreground over a solid background colour
pub fn cutout_with_background(
    image: &RgbImage,
    mask: &GrayImage,
    background: [u8; 4],
) -> Result<RgbaImage> {
    ensure_same_size(image, mask)?;

    Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        let alpha = mask.get_pixel(x, y)[0] as f32 / 255.0;
        let blend = |fg: u8, bg: u8| (fg as f32 * alpha + bg as f32 * (1.0 - alpha)).round() as u8;

        Rgba([
            blend(pixel[0], background[0]),
            blend(pixel[1], background[1]),
            blend(pixel[2], background[2]),
            blend(255, background[3]),
        ])
    }))
}

/// Replace the alpha channel of an existing cut-out
pub fn replace_alpha(result: &mut RgbaImage, mask: &GrayImage) -> Result<()> {
    ensure!(
        result.dimensions() == mask.dimensions(),
        "result is {:?} but mask is {:?}",
        result.dimensions(),
        mask.dimensions()
    );
    for (pixel, alpha) in result.pixels_mut().zip(mask.pixels()) {
        pixel[3] = alpha[0];
    }
    Ok(())
}

/// Parse `#rrggbb` or `#rrggbbaa` (leading `#` optional)
pub fn parse_hex_color(value: &str) -> Result<[u8; 4]> {
    let hex = value.trim().trim_start_matches('#');
    if !matches!(hex.len(), 6 | 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Invalid colour {value:?}, expected #rrggbb or #rrggbbaa");
    }

    let channel = |i: usize| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16);
    let alpha = if hex.len() == 8 { channel(3)? } else { 255 };
    Ok([channel(0)?, channel(1)?, channel(2)?, alpha])
}

fn ensure_same_size(image: &RgbImage, mask: &GrayImage) -> Result<()> {
    ensure!(
        image.dimensions() == mask.dimensions(),
        "image is {:?} but mask is {:?}",
        image.dimensions(),
        mask.dimensions()
    );
    Ok(())
}
