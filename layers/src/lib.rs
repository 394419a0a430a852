//! LTE UE Receive Layers Library
//!
//! This crate implements the downlink physical layer of an LTE UE according
//! to 3GPP TS 36.211 and 36.213: cell synchronization, PDCCH blind search,
//! PDSCH grant handling and HARQ soft combining.

pub mod phy;

use interfaces::InterfaceError;
use thiserror::Error;

/// Common errors for the receive layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
}

impl From<InterfaceError> for LayerError {
    fn from(err: InterfaceError) -> Self {
        LayerError::DecodeFailure(err.to_string())
    }
}
