//! Carrier Frequency Offset Correction
//!
//! Multiplies a block of samples by `exp(j 2 pi f n)`. The rotation table is
//! cached and only recomputed when the requested frequency moves by more than
//! the tolerance or the block grows.

use num_complex::Complex32;
use tracing::trace;

/// Default frequency tolerance, in cycles per sample
pub const DEFAULT_CFO_TOLERANCE: f32 = 1e-5;

/// Frequency offset corrector
#[derive(Debug, Clone)]
pub struct CfoCorrector {
    table: Vec<Complex32>,
    /// Frequency the table was generated for
    last_freq: f32,
    tolerance: f32,
}

impl CfoCorrector {
    /// Create a corrector with a table for blocks of `len` samples
    pub fn new(len: usize) -> Self {
        let mut corrector = Self {
            table: Vec::new(),
            last_freq: 0.0,
            tolerance: DEFAULT_CFO_TOLERANCE,
        };
        corrector.regenerate(len, 0.0);
        corrector
    }

    pub fn set_tolerance(&mut self, tolerance: f32) {
        self.tolerance = tolerance;
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Frequency of the cached table
    pub fn freq(&self) -> f32 {
        self.last_freq
    }

    fn regenerate(&mut self, len: usize, freq: f32) {
        let step = 2.0 * std::f64::consts::PI * freq as f64;
        self.table.clear();
        self.table.extend((0..len).map(|n| {
            let phase = step * n as f64;
            Complex32::new(phase.cos() as f32, phase.sin() as f32)
        }));
        self.last_freq = freq;
        trace!("CFO table regenerated: len={} freq={:.6}", len, freq);
    }

    fn prepare(&mut self, len: usize, freq: f32) {
        if len > self.table.len() || (freq - self.last_freq).abs() > self.tolerance {
            self.regenerate(len.max(self.table.len()), freq);
        }
    }

    /// `output[n] = input[n] * exp(j 2 pi freq n)`, `freq` in cycles per sample
    pub fn correct(&mut self, input: &[Complex32], output: &mut [Complex32], freq: f32) {
        let len = input.len().min(output.len());
        self.prepare(len, freq);
        for ((out, x), rot) in output.iter_mut().zip(input).zip(&self.table) {
            *out = x * rot;
        }
    }

    /// In-place version of [`CfoCorrector::correct`]
    pub fn correct_in_place(&mut self, samples: &mut [Complex32], freq: f32) {
        self.prepare(samples.len(), freq);
        for (x, rot) in samples.iter_mut().zip(&self.table) {
            *x *= rot;
        }
    }
}
