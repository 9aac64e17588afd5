//! Multipart uploads and the processing options that ride along with them.

use super::error::ApiError;
use crate::pipeline::ProcessingOptions;
use crate::postprocess::{parse_hex_color, MAX_FEATHER};
use axum::body::Bytes;
use axum::extract::Multipart;
use std::collections::HashMap;

pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub data: Bytes,
}

/// A fully read multipart body: file parts and plain text fields
#[derive(Default)]
pub struct UploadForm {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let data = field.bytes().await?;
                    form.files.push(UploadedFile {
                        field: name,
                        filename,
                        data,
                    });
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// First file uploaded under any of `names`
    pub fn file(&self, names: &[&str]) -> Option<&UploadedFile> {
        self.files.iter().find(|f| names.contains(&f.field.as_str()))
    }

    /// Every file uploaded under any of `names`, in upload order
    pub fn files(&self, names: &[&str]) -> Vec<&UploadedFile> {
        self.files
            .iter()
            .filter(|f| names.contains(&f.field.as_str()))
            .collect()
    }

    /// Form value for `key`, falling back to the query string
    pub fn value<'a>(&'a self, query: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
        self.fields
            .get(key)
            .or_else(|| query.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

pub fn parse_bool(key: &str, value: &str) -> Result<bool, ApiError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ApiError::bad_request(format!(
            "Invalid value for {key}: {value:?}, expected true or false"
        ))),
    }
}

pub fn parse_u32(key: &str, value: &str, max: u32) -> Result<u32, ApiError> {
    match value.parse::<u32>() {
        Ok(n) if n <= max => Ok(n),
        _ => Err(ApiError::bad_request(format!(
            "Invalid value for {key}: {value:?}, expected an integer between 0 and {max}"
        ))),
    }
}

/// Build processing options from form fields and query parameters
///
/// `feather_radius` is accepted as a synonym of `feather_amount`.
pub fn processing_options(
    form: &UploadForm,
    query: &HashMap<String, String>,
    default_model: &str,
) -> Result<ProcessingOptions, ApiError> {
    let mut options =
        ProcessingOptions::new(form.value(query, "model").unwrap_or(default_model));

    if let Some(v) = form.value(query, "enhance_edges") {
        options.enhance_edges = parse_bool("enhance_edges", v)?;
    }
    if let Some(v) = form.value(query, "alpha_matting") {
        options.alpha_matting = parse_bool("alpha_matting", v)?;
    }
    if let Some(v) = form.value(query, "post_process") {
        options.post_process = parse_bool("post_process", v)?;
    }

    let feather = form
        .value(query, "feather_amount")
        .map(|v| ("feather_amount", v))
        .or_else(|| form.value(query, "feather_radius").map(|v| ("feather_radius", v)));
    if let Some((key, v)) = feather {
        options.feather_amount = match v.parse::<f32>() {
            Ok(amount) if (0.0..=MAX_FEATHER).contains(&amount) => amount,
            _ => {
                return Err(ApiError::bad_request(format!(
                    "Invalid value for {key}: {v:?}, expected a number between 0 and {MAX_FEATHER}"
                )))
            }
        };
    }

    if let Some(v) = form.value(query, "background") {
        if !v.eq_ignore_ascii_case("transparent") {
            options.background =
                Some(parse_hex_color(v).map_err(|e| ApiError::bad_request(e.to_string()))?);
        }
    }

    Ok(options)
}
