use crate::input::UploadLimits;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to bind the HTTP server to
    #[arg(long, env = "MATTESERVE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "MATTESERVE_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Directory holding the ONNX model files
    #[arg(long, env = "MATTESERVE_MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Directory where results and masks are kept until they expire
    #[arg(long, env = "MATTESERVE_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    /// Model used when a request does not name one
    #[arg(long, env = "MATTESERVE_DEFAULT_MODEL", default_value = "u2net")]
    pub default_model: String,

    /// Largest accepted upload, in bytes
    #[arg(long, env = "MATTESERVE_MAX_FILE_SIZE", default_value_t = 16 * 1024 * 1024)]
    pub max_file_size: usize,

    /// Accepted upload extensions
    #[arg(
        long,
        env = "MATTESERVE_ALLOWED_EXTENSIONS",
        value_delimiter = ',',
        default_value = "png,jpg,jpeg,webp"
    )]
    pub allowed_extensions: Vec<String>,

    /// Longest side images are scaled down to before inference
    #[arg(long, env = "MATTESERVE_PROCESSING_MAX_SIZE", default_value_t = 1024)]
    pub processing_max_size: u32,

    /// Largest number of files accepted by the batch endpoints
    #[arg(long, env = "MATTESERVE_MAX_BATCH_FILES", default_value_t = 10)]
    pub max_batch_files: usize,

    /// Seconds a stored result is kept before cleanup removes it
    #[arg(long, env = "MATTESERVE_RESULT_TTL", default_value_t = 3600)]
    pub result_ttl_secs: u64,

    /// Seconds between automatic cleanup passes, 0 disables them
    #[arg(long, env = "MATTESERVE_CLEANUP_INTERVAL", default_value_t = 3600)]
    pub cleanup_interval_secs: u64,

    /// ONNX Runtime intra-op threads per model
    #[arg(long, env = "MATTESERVE_INTRA_THREADS", default_value_t = 4)]
    pub intra_threads: usize,

    /// Models to load at startup
    #[arg(long, env = "MATTESERVE_PRELOAD", value_delimiter = ',')]
    pub preload: Vec<String>,

    /// Enable debug logging
    #[arg(long, env = "MATTESERVE_DEBUG")]
    pub debug: bool,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_size: self.max_file_size,
            allowed_extensions: self
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }

    /// Request body limit: a full batch of maximum-size files plus form overhead
    pub fn body_limit(&self) -> usize {
        self.max_file_size
            .saturating_mul(self.max_batch_files.max(1))
            .saturating_add(1024 * 1024)
    }

    /// Device description reported by the health endpoint
    pub fn device(&self) -> &'static str {
        if cfg!(feature = "cuda") {
            "cuda"
        } else {
            "cpu"
        }
    }
}
