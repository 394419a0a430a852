//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used across the UE receiver.

pub mod phy;
pub mod softbuffer;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use phy::*;
pub use softbuffer::SoftBufferRx;
pub use types::*;
pub use utils::*;
