//! Background removal endpoints: JSON, raw PNG and batch.

use super::{blocking, download_url, mask_url, rounded_secs};
use crate::input::{decode_image, file_stem, png_bytes, png_data_url, validate_upload};
use crate::pipeline::ProcessingOptions;
use crate::server::error::ApiError;
use crate::server::form::{parse_bool, processing_options, UploadForm};
use crate::server::state::AppState;
use crate::storage::ResultStore;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use image::DynamicImage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const IMAGE_FIELDS: &[&str] = &["image", "file"];
const BATCH_FIELDS: &[&str] = &["images", "files"];

/// A processed and stored upload
struct Processed {
    id: String,
    result_png: Vec<u8>,
    mask_png: Vec<u8>,
    model_used: String,
    image_size: (u32, u32),
    processing_time: Duration,
}

fn process_upload(
    state: &AppState,
    filename: &str,
    data: &[u8],
    options: &ProcessingOptions,
) -> Result<Processed, ApiError> {
    validate_upload(filename, data, &state.limits)?;
    let image = decode_image(data)?;
    let output = state.remover.remove(&image, options)?;

    let result_png = png_bytes(&DynamicImage::ImageRgba8(output.cutout))?;
    let mask_png = png_bytes(&DynamicImage::ImageLuma8(output.mask))?;

    let id = ResultStore::new_id();
    state.store.save_encoded(&id, &result_png, &mask_png)?;

    Ok(Processed {
        id,
        result_png,
        mask_png,
        model_used: output.model_used,
        image_size: output.original_size,
        processing_time: output.processing_time,
    })
}

async fn read_single(
    state: &AppState,
    query: &HashMap<String, String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(String, axum::body::Bytes, ProcessingOptions, UploadForm), ApiError> {
    let form = UploadForm::read(multipart?).await?;
    let options = processing_options(&form, query, &state.config.default_model)?;
    let file = form
        .file(IMAGE_FIELDS)
        .ok_or_else(|| ApiError::bad_request("No image file provided"))?;
    Ok((file.filename.clone(), file.data.clone(), options, form))
}

#[derive(Serialize)]
pub struct RemovalResponse {
    pub success: bool,
    pub result_id: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    pub download_url: String,
    pub mask_url: String,
    pub processing_time: f64,
    pub model_used: String,
    pub image_size: [u32; 2],
}

/// Remove the background of one upload and return it inline as a data URL
pub async fn remove_background(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RemovalResponse>, ApiError> {
    let (filename, data, options, form) = read_single(&state, &query, multipart).await?;
    let include_mask = match form.value(&query, "include_mask") {
        Some(v) => parse_bool("include_mask", v)?,
        None => false,
    };

    let processed = blocking(move || process_upload(&state, &filename, &data, &options)).await?;

    Ok(Json(RemovalResponse {
        success: true,
        image: png_data_url(&processed.result_png),
        mask: include_mask.then(|| png_data_url(&processed.mask_png)),
        download_url: download_url(&processed.id),
        mask_url: mask_url(&processed.id),
        processing_time: rounded_secs(processed.processing_time),
        model_used: processed.model_used,
        image_size: [processed.image_size.0, processed.image_size.1],
        result_id: processed.id,
    }))
}

/// Remove the background of one upload and return the PNG itself
pub async fn remove_background_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let (filename, data, options, _) = read_single(&state, &query, multipart).await?;
    let stem = file_stem(&filename);

    let processed = blocking(move || process_upload(&state, &filename, &data, &options)).await?;

    let (width, height) = processed.image_size;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"bg_removed_{stem}.png\""),
            ),
            (
                header::HeaderName::from_static("x-processing-time"),
                format!("{:.2}", processed.processing_time.as_secs_f64()),
            ),
            (
                header::HeaderName::from_static("x-model-used"),
                processed.model_used,
            ),
            (
                header::HeaderName::from_static("x-image-size"),
                format!("{width}x{height}"),
            ),
            (header::HeaderName::from_static("x-result-id"), processed.id),
        ],
        processed.result_png,
    )
        .into_response())
}

#[derive(Serialize)]
pub struct BatchItem {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<BatchItem>,
    pub total_processed: usize,
    pub total_failed: usize,
}

/// Process several uploads with shared options; failures are reported per file
pub async fn batch_process(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let form = UploadForm::read(multipart?).await?;
    let options = processing_options(&form, &query, &state.config.default_model)?;

    let uploads: Vec<(String, axum::body::Bytes)> = form
        .files(BATCH_FIELDS)
        .into_iter()
        .map(|file| (file.filename.clone(), file.data.clone()))
        .collect();
    if uploads.is_empty() {
        return Err(ApiError::bad_request("No files provided"));
    }
    let max = state.config.max_batch_files;
    if uploads.len() > max {
        return Err(ApiError::bad_request(format!("Maximum {max} files allowed")));
    }

    let results = blocking(move || {
        let results = uploads
            .into_iter()
            .map(|(filename, data)| match process_upload(&state, &filename, &data, &options) {
                Ok(processed) => BatchItem {
                    success: true,
                    image: Some(png_data_url(&processed.result_png)),
                    download_url: Some(download_url(&processed.id)),
                    processing_time: Some(rounded_secs(processed.processing_time)),
                    result_id: Some(processed.id),
                    error: None,
                    filename,
                },
                Err(e) => {
                    tracing::warn!(filename = %filename, error = %e, "Batch item failed");
                    BatchItem {
                        success: false,
                        result_id: None,
                        image: None,
                        download_url: None,
                        processing_time: None,
                        error: Some(e.to_string()),
                        filename,
                    }
                }
            })
            .collect::<Vec<_>>();
        Ok(results)
    })
    .await?;

    let total_processed = results.iter().filter(|item| item.success).count();
    let total_failed = results.len() - total_processed;
    tracing::info!(total_processed, total_failed, "Batch finished");

    Ok(Json(BatchResponse {
        success: true,
        results,
        total_processed,
        total_failed,
    }))
}
