mod mask;
mod models;
mod removal;
mod results;

pub use mask::{edit_mask, refine_mask};
pub use models::{health, list_models, warmup};
pub use removal::{batch_process, remove_background, remove_background_file};
pub use results::{cleanup, download, mask, preview};

use super::error::ApiError;

/// Run image work off the async runtime
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("Worker task failed: {e}")))?
}

pub(crate) fn download_url(id: &str) -> String {
    format!("/api/download/{id}")
}

pub(crate) fn mask_url(id: &str) -> String {
    format!("/api/mask/{id}")
}

/// Seconds, rounded to two decimals
pub(crate) fn rounded_secs(duration: std::time::Duration) -> f64 {
    (duration.as_secs_f64() * 100.0).round() / 100.0
}
