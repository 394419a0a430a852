//! Receiver Interfaces Library
//!
//! This crate defines the seams between the downlink subframe processor and
//! the channel processing blocks it drives, plus the IQ capture reader.

pub mod iq_file;
pub mod ue_phy;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid capture: {0}")]
    InvalidCapture(String),
}
