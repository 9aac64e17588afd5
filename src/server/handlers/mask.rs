//! Manual mask corrections on stored results and standalone masks.

use super::{blocking, download_url};
use crate::input::{decode_image, png_bytes, png_data_url, validate_upload};
use crate::postprocess::{apply_brush_edits, refine_mask as refine, replace_alpha, BrushEdit, MAX_REFINE_ITERATIONS};
use crate::server::error::ApiError;
use crate::server::form::{parse_u32, UploadForm};
use crate::server::state::AppState;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct EditMaskRequest {
    pub file_id: String,
    #[serde(default)]
    pub edits: Vec<BrushEdit>,
}

#[derive(Serialize)]
pub struct EditMaskResponse {
    pub success: bool,
    pub message: &'static str,
    pub edits_applied: usize,
    pub image: String,
    pub download_url: String,
}

/// Paint brush strokes onto a stored mask and re-composite its result
pub async fn edit_mask(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EditMaskRequest>, JsonRejection>,
) -> Result<Json<EditMaskResponse>, ApiError> {
    let Json(request) = payload?;
    let id = request.file_id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::bad_request("file_id is required"));
    }

    let response = blocking(move || {
        let (png, edits_applied) = state
            .store
            .update(&id, |result, mask| {
                let edits_applied = apply_brush_edits(mask, &request.edits);
                replace_alpha(result, mask)?;
                Ok(edits_applied)
            })?
            .ok_or_else(|| ApiError::not_found("Original file not found"))?;
        tracing::info!(id = %id, edits_applied, "Mask edited");

        Ok(EditMaskResponse {
            success: true,
            message: "Mask updated successfully",
            edits_applied,
            image: png_data_url(&png),
            download_url: download_url(&id),
        })
    })
    .await?;

    Ok(Json(response))
}

/// Grow and/or shrink an uploaded mask, returning it as PNG
pub async fn refine_mask(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let form = UploadForm::read(multipart?).await?;
    let iterations = |key: &str| match form.value(&query, key) {
        Some(v) => parse_u32(key, v, MAX_REFINE_ITERATIONS),
        None => Ok(1),
    };
    let dilate = iterations("dilate_iterations")?;
    let erode = iterations("erode_iterations")?;

    let file = form
        .file(&["mask"])
        .ok_or_else(|| ApiError::bad_request("No mask file provided"))?;
    let (filename, data) = (file.filename.clone(), file.data.clone());

    let png = blocking(move || {
        validate_upload(&filename, &data, &state.limits)?;
        let mask = decode_image(&data)?.to_luma8();
        let refined = refine(&mask, dilate, erode);
        Ok(png_bytes(&DynamicImage::ImageLuma8(refined))?)
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}
