mod encode;
mod upload;

pub use encode::{png_bytes, png_data_url, preview_png, PREVIEW_SIZE};
pub use upload::{decode_image, extension, file_stem, validate_upload, UploadError, UploadLimits};
