use super::blocking;
use crate::segmentation::catalog;
use crate::server::error::ApiError;
use crate::server::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models: Vec<String>,
    pub loaded_models: Vec<String>,
    pub device: &'static str,
    pub default_model: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = state.registry();
    Json(HealthResponse {
        status: "healthy",
        models: registry.known_names(),
        loaded_models: registry.loaded_names(),
        device: state.config.device(),
        default_model: state.config.default_model.clone(),
    })
}

#[derive(Serialize)]
pub struct ModelInfo {
    pub description: &'static str,
    pub input_size: [u32; 2],
    pub file: &'static str,
    pub available: bool,
    pub loaded: bool,
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub available_models: BTreeMap<&'static str, ModelInfo>,
    pub aliases: BTreeMap<&'static str, &'static str>,
    pub default: String,
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let registry = state.registry();
    let available_models = catalog::CATALOG
        .iter()
        .map(|spec| {
            let info = ModelInfo {
                description: spec.description,
                input_size: [spec.input_size, spec.input_size],
                file: spec.file_name,
                available: registry.is_available(spec),
                loaded: registry.is_loaded(spec.name),
            };
            (spec.name, info)
        })
        .collect();

    Json(ModelsResponse {
        available_models,
        aliases: catalog::ALIASES.iter().copied().collect(),
        default: state.config.default_model.clone(),
    })
}

#[derive(Serialize)]
pub struct WarmupResponse {
    pub status: &'static str,
    pub loaded: Vec<String>,
}

/// Load every model whose file is present
pub async fn warmup(State(state): State<Arc<AppState>>) -> Result<Json<WarmupResponse>, ApiError> {
    let loaded = blocking(move || Ok(state.registry().warmup())).await?;
    if loaded.is_empty() {
        return Err(ApiError::ServiceUnavailable(
            "No models could be loaded".to_string(),
        ));
    }

    tracing::info!(models = ?loaded, "Models warmed up");
    Ok(Json(WarmupResponse {
        status: "ready",
        loaded,
    }))
}
