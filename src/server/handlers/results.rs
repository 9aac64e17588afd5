use super::blocking;
use crate::input::{png_data_url, preview_png};
use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::storage::ResultStore;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;

const NOT_FOUND: &str = "File not found or expired";

/// Stored result as a PNG attachment
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = ResultStore::canonical_id(&id).ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
    let png = {
        let id = id.clone();
        blocking(move || Ok(state.store.read_result_png(&id)?)).await?
    }
    .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"no_background_{id}.png\""),
            ),
        ],
        png,
    )
        .into_response())
}

/// Stored mask, served inline
pub async fn mask(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let png = blocking(move || Ok(state.store.read_mask_png(&id)?))
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    pub preview: String,
}

/// Thumbnail of a stored result as a data URL
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let preview = blocking(move || {
        let result = state
            .store
            .load_result(&id)?
            .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;
        Ok(png_data_url(&preview_png(&DynamicImage::ImageRgba8(result))?))
    })
    .await?;

    Ok(Json(PreviewResponse {
        success: true,
        preview,
    }))
}

#[derive(Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub removed: usize,
    pub message: String,
}

/// Remove results older than the configured TTL
pub async fn cleanup(State(state): State<Arc<AppState>>) -> Result<Json<CleanupResponse>, ApiError> {
    let ttl = state.config.result_ttl();
    let removed = blocking(move || Ok(state.store.cleanup(ttl)?)).await?;

    Ok(Json(CleanupResponse {
        success: true,
        removed,
        message: format!("Removed {removed} expired files"),
    }))
}
