//! Mask post-processing: edge cleanup, feathering, alpha matting, manual
//! edits and compositing the mask back onto the image.

mod composite;
mod edit;
mod matting;
mod refine;

pub use composite::{cutout, cutout_with_background, parse_hex_color, replace_alpha};
pub use edit::{apply_brush_edits, BrushEdit, BrushKind, BrushPoint, DEFAULT_BRUSH_RADIUS};
pub use matting::{alpha_matte, build_trimap, MattingParams};
pub use refine::{enhance_edges, feather, refine_mask, MAX_FEATHER, MAX_REFINE_ITERATIONS};
