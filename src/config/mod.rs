use serde::Deserialize;
use std::time::Duration;

/// Retry knobs for single-credential generation.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Generation attempts before the credential is failed permanently.
    pub max_attempts: u32,
    /// Backoff grows linearly: `base_delay × attempt` (30 s, 60 s, 90 s).
    pub base_delay: Duration,
    /// Wall-clock ceiling from the first attempt; retries stop here even
    /// with attempts left.
    pub deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            deadline: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Root directory for local blob storage; ignored when the S3 block is set
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Directory holding the badge fonts (`<name>.ttf` / `<name>.otf`)
    #[serde(default = "default_font_dir")]
    pub font_dir: String,

    /// S3-compatible storage (R2, MinIO); all four must be set to enable it
    pub s3_bucket: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,

    /// Prometheus exporter listen address
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// Idle poll interval for the worker loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_generation_max_attempts")]
    pub generation_max_attempts: u32,

    #[serde(default = "default_generation_base_delay_secs")]
    pub generation_base_delay_secs: u64,

    #[serde(default = "default_generation_deadline_secs")]
    pub generation_deadline_secs: u64,
}

fn default_storage_root() -> String {
    "storage".to_string()
}

fn default_font_dir() -> String {
    "fonts".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_generation_max_attempts() -> u32 {
    3
}

fn default_generation_base_delay_secs() -> u64 {
    30
}

fn default_generation_deadline_secs() -> u64 {
    600
}

/// S3 connection details, present only when every field is configured.
pub struct S3Config<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_attempts: self.generation_max_attempts,
            base_delay: Duration::from_secs(self.generation_base_delay_secs),
            deadline: Duration::from_secs(self.generation_deadline_secs),
        }
    }

    pub fn s3(&self) -> Option<S3Config<'_>> {
        Some(S3Config {
            bucket: self.s3_bucket.as_deref()?,
            endpoint: self.s3_endpoint.as_deref()?,
            access_key: self.s3_access_key.as_deref()?,
            secret_key: self.s3_secret_key.as_deref()?,
        })
    }
}
