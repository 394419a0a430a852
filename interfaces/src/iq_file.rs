//! IQ capture files
//!
//! Raw interleaved little-endian `f32` I/Q pairs, as written by common SDR
//! recording tools.

use crate::InterfaceError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_complex::Complex32;
use std::path::Path;
use tracing::{debug, info};

/// Bytes per complex sample (4 bytes real + 4 bytes imag)
pub const SAMPLE_BYTES: usize = 8;

/// Convert raw bytes to complex samples
pub fn bytes_to_samples(bytes: &[u8]) -> Result<Vec<Complex32>, InterfaceError> {
    if bytes.len() % SAMPLE_BYTES != 0 {
        return Err(InterfaceError::InvalidCapture(format!(
            "{} bytes is not a whole number of samples",
            bytes.len()
        )));
    }

    let mut buf = bytes;
    let mut samples = Vec::with_capacity(bytes.len() / SAMPLE_BYTES);
    while buf.has_remaining() {
        let re = buf.get_f32_le();
        let im = buf.get_f32_le();
        samples.push(Complex32::new(re, im));
    }

    Ok(samples)
}

/// Convert complex samples to raw bytes
pub fn samples_to_bytes(samples: &[Complex32]) -> Bytes {
    let mut bytes = BytesMut::with_capacity(samples.len() * SAMPLE_BYTES);
    for sample in samples {
        bytes.put_f32_le(sample.re);
        bytes.put_f32_le(sample.im);
    }
    bytes.freeze()
}

/// Read a whole capture file
pub fn read_fc32<P: AsRef<Path>>(path: P) -> Result<Vec<Complex32>, InterfaceError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let samples = bytes_to_samples(&bytes)?;
    info!("Loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Write samples to a capture file
pub fn write_fc32<P: AsRef<Path>>(path: P, samples: &[Complex32]) -> Result<(), InterfaceError> {
    let path = path.as_ref();
    std::fs::write(path, samples_to_bytes(samples))?;
    debug!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}
