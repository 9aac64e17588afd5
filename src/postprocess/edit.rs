use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use serde::Deserialize;

pub const DEFAULT_BRUSH_RADIUS: u32 = 10;
pub const MAX_BRUSH_RADIUS: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushKind {
    /// Restore pixels into the foreground
    Add,
    /// Cut pixels out of the foreground
    Remove,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BrushPoint {
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_radius")]
    pub radius: u32,
}

fn default_radius() -> u32 {
    DEFAULT_BRUSH_RADIUS
}

/// One stroke: every point paints a filled circle of the same kind
#[derive(Debug, Clone, Deserialize)]
pub struct BrushEdit {
    #[serde(rename = "type")]
    pub kind: BrushKind,
    #[serde(default)]
    pub coordinates: Vec<BrushPoint>,
}

/// Paint brush strokes onto a mask in order
///
/// Circles that leave the canvas are clipped, circles entirely off it are
/// skipped and radii are capped at [`MAX_BRUSH_RADIUS`]. Returns the number
/// of circles drawn.
pub fn apply_brush_edits(mask: &mut GrayImage, edits: &[BrushEdit]) -> usize {
    let mut painted = 0;
    for edit in edits {
        let value = match edit.kind {
            BrushKind::Add => Luma([255u8]),
            BrushKind::Remove => Luma([0u8]),
        };
        for point in &edit.coordinates {
            let radius = point.radius.min(MAX_BRUSH_RADIUS) as i32;
            if !touches_canvas(mask, point.x, point.y, radius) {
                continue;
            }
            draw_filled_circle_mut(mask, (point.x, point.y), radius, value);
            painted += 1;
        }
    }
    painted
}

/// Whether the circle's bounding box overlaps the mask
///
/// Also keeps far-away centres from overflowing `i32` inside the drawing code.
fn touches_canvas(mask: &GrayImage, x: i32, y: i32, radius: i32) -> bool {
    let (x, y, r) = (x as i64, y as i64, radius as i64);
    let (width, height) = (mask.width() as i64, mask.height() as i64);
    x + r >= 0 && x - r < width && y + r >= 0 && y - r < height
}
