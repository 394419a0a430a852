//! YAML Configuration Structures for the UE receiver
//!
//! A capture section naming the I/Q recording and a sync section with the
//! cell search parameters. Every field except the capture file has a default.

use layers::phy::SyncConfig;
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct UeConfig {
    /// I/Q capture to search
    pub capture: CaptureConfig,
    /// Cell search parameters
    #[serde(default)]
    pub sync: SyncConfig,
    /// Search limits
    #[serde(default)]
    pub search: SearchConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Capture configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Interleaved little-endian f32 I/Q file
    pub file: String,
    /// Samples to skip at the start of the capture
    #[serde(default)]
    pub offset: usize,
}

/// Search limits
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SearchConfig {
    /// N_id_2 values to try, all three when empty
    #[serde(default)]
    pub n_id_2: Vec<u8>,
    /// Frame windows searched per N_id_2, the whole capture when unset
    pub max_frames: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level used when neither RUST_LOG nor --log-level are given
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl UeConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: UeConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
