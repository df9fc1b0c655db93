use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::lifecycle::ModelPolicy;

/// File name used for the artifact when no explicit path is configured.
const DEFAULT_MODEL_FILE: &str = "bet_predict_model.json";

/// Betsmart match prediction API
#[derive(Parser, Debug, Clone)]
#[command(name = "betsmart-predict", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Artifact store identifier of the serialized model
    #[arg(long, env = "MODEL_ID", default_value = "1FBM4lYhm9pvEmlL4vmJV0YMKl-rIIXaJ")]
    pub model_id: String,

    /// Local path for the downloaded model (defaults to the system temp dir)
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Team / league mapping JSON
    #[arg(long, env = "MAPPING_PATH", default_value = "team_league_mapping.json")]
    pub mapping_path: PathBuf,

    /// When the model is loaded and how long it stays in memory
    #[arg(long, env = "MODEL_POLICY", value_enum, default_value = "lazy-cached")]
    pub model_policy: ModelPolicy,

    /// Artifact store base URL
    #[arg(long, env = "ARTIFACT_BASE_URL", default_value = "https://drive.google.com")]
    pub artifact_base_url: String,

    /// Model download timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "120")]
    pub fetch_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model_id.trim().is_empty() {
            anyhow::bail!("MODEL_ID must not be empty");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        self.listen_addr()?;
        url::Url::parse(&self.artifact_base_url)
            .map_err(|e| anyhow::anyhow!("invalid ARTIFACT_BASE_URL '{}': {}", self.artifact_base_url, e))?;
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid LISTEN_ADDR '{}': {}", self.listen_addr, e))
    }

    /// Where the model artifact lives on disk.  The temp dir keeps downloads
    /// out of read-only deployment images.
    pub fn model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_MODEL_FILE))
    }
}
