//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Auth, history and mail relay backend
    #[serde(default = "default_db_url")]
    pub db_url: String,

    /// AI diagnosis engine
    #[serde(default = "default_ai_url")]
    pub ai_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Registry contract address (`0x`-prefixed)
    #[serde(default)]
    pub contract_address: Option<String>,

    /// Read-only node used when no wallet is connected
    #[serde(default = "default_public_rpc")]
    pub public_rpc_url: String,

    /// JSON-RPC endpoint of a signing wallet
    #[serde(default)]
    pub wallet_rpc_url: Option<String>,

    /// Timeout for each lookup in seconds
    #[serde(default = "default_ledger_timeout")]
    pub timeout_secs: u64,

    /// Receipt polling interval in milliseconds
    #[serde(default = "default_receipt_poll")]
    pub receipt_poll_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Continuous decoding cadence in milliseconds
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Filename prefix
    #[serde(default = "default_brand")]
    pub brand: String,

    /// Supersampling factor
    #[serde(default = "default_scale")]
    pub scale: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default = "default_pdf_jpeg_quality")]
    pub pdf_jpeg_quality: u8,

    /// Where exported files are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// File holding the signed-in user and token
    #[serde(default = "default_session_path")]
    pub path: PathBuf,
}

// Defaults
fn default_db_url() -> String { "http://localhost:5000".to_string() }
fn default_ai_url() -> String { "http://localhost:5001".to_string() }
fn default_request_timeout() -> u64 { 60 }
fn default_public_rpc() -> String { "https://1rpc.io/sepolia".to_string() }
fn default_ledger_timeout() -> u64 { 30 }
fn default_receipt_poll() -> u64 { 1000 }
fn default_frame_interval() -> u64 { 16 }
fn default_brand() -> String { "AgriSentry".to_string() }
fn default_scale() -> u32 { 2 }
fn default_jpeg_quality() -> u8 { 92 }
fn default_pdf_jpeg_quality() -> u8 { 95 }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }
fn default_session_path() -> PathBuf { PathBuf::from("agri-sentry-session.json") }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            db_url: default_db_url(),
            ai_url: default_ai_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            contract_address: None,
            public_rpc_url: default_public_rpc(),
            wallet_rpc_url: None,
            timeout_secs: default_ledger_timeout(),
            receipt_poll_ms: default_receipt_poll(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            brand: default_brand(),
            scale: default_scale(),
            jpeg_quality: default_jpeg_quality(),
            pdf_jpeg_quality: default_pdf_jpeg_quality(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
        }
    }
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.timeout_secs)
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.ledger.receipt_poll_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.capture.frame_interval_ms.max(1))
    }
}
