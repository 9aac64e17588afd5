use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;

/// Size and type restrictions applied to every uploaded file
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
}

impl UploadLimits {
    pub fn allowed_list(&self) -> String {
        self.allowed_extensions
            .iter()
            .map(|ext| ext.to_uppercase())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file selected")]
    EmptyFilename,
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("File type not supported. Use {allowed}")]
    UnsupportedType { allowed: String },
    #[error("File too large. Max size: {}MB", .limit / (1024 * 1024))]
    TooLarge { size: usize, limit: usize },
    #[error("Invalid image file: {0}")]
    InvalidImage(String),
}

/// Lower-cased extension of `filename`, if any
pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// File name without directories or extension, safe to echo back in headers
pub fn file_stem(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

/// Check name, extension and size of an uploaded file
pub fn validate_upload(filename: &str, data: &[u8], limits: &UploadLimits) -> Result<(), UploadError> {
    if filename.trim().is_empty() {
        return Err(UploadError::EmptyFilename);
    }

    let allowed = extension(filename)
        .map(|ext| limits.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false);
    if !allowed {
        return Err(UploadError::UnsupportedType {
            allowed: limits.allowed_list(),
        });
    }

    if data.len() > limits.max_file_size {
        return Err(UploadError::TooLarge {
            size: data.len(),
            limit: limits.max_file_size,
        });
    }
    if data.is_empty() {
        return Err(UploadError::EmptyFile);
    }

    Ok(())
}

/// Decode image bytes, sniffing the format from the content
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, UploadError> {
    let _span = tracing::debug_span!("decode", bytes = data.len()).entered();

    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| UploadError::InvalidImage(e.to_string()))?
        .decode()
        .map_err(|e| UploadError::InvalidImage(e.to_string()))
}
