//! Secondary Synchronization Signal
//!
//! Implements SSS generation and detection according to 3GPP TS 36.211
//! section 6.11.2. The SSS carries the cell identity group N_id_1 and tells
//! subframe 0 from subframe 5.

use crate::phy::pss::{extract_from_fft, map_to_fft};
use crate::LayerError;
use common::utils::{fft_size_is_valid, max_index};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::Deserialize;
use std::sync::Arc;
use tracing::trace;

/// Length of each interleaved SSS half
pub const SSS_N: usize = 31;

/// SSS sequence length
pub const SSS_LEN: usize = 2 * SSS_N;

/// Number of cell identity groups
pub const NOF_N_ID_1: usize = 168;

/// SSS correlation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SssAlgorithm {
    /// One coherent correlation over the whole sequence
    Full,
    /// Sum of magnitudes of `segments` coherent partial correlations
    Partial { segments: usize },
    /// Differential correlation, insensitive to residual phase slopes
    Diff,
}

impl Default for SssAlgorithm {
    fn default() -> Self {
        SssAlgorithm::Partial { segments: 3 }
    }
}

/// Binary m-sequence of length 31, mapped to +/-1
///
/// `x(0..4) = 0, x(4) = 1`, and `feedback(x, i)` gives `x(i + 5)`.
fn m_sequence(feedback: impl Fn(&[u8], usize) -> u8) -> [f32; SSS_N] {
    let mut x = [0u8; SSS_N];
    x[4] = 1;
    for i in 0..SSS_N - 5 {
        x[i + 5] = feedback(&x, i) % 2;
    }
    x.map(|b| 1.0 - 2.0 * b as f32)
}

/// (m0, m1) of a cell identity group
pub fn m0_m1(n_id_1: u16) -> (usize, usize) {
    let n = n_id_1 as usize;
    let q_prime = n / 30;
    let q = (n + q_prime * (q_prime + 1) / 2) / 30;
    let m_prime = n + q * (q + 1) / 2;
    let m0 = m_prime % SSS_N;
    let m1 = (m0 + m_prime / SSS_N + 1) % SSS_N;
    (m0, m1)
}

/// Subframe in which an SSS with the detected (m0, m1) order was sent
pub fn subframe(m0: usize, m1: usize) -> u32 {
    if m1 > m0 {
        0
    } else {
        5
    }
}

/// Sequence tables shared by the generator and the detector
#[derive(Debug, Clone)]
pub struct SssTables {
    /// s(m)(n) = s~((n + m) mod 31)
    s: [[f32; SSS_N]; SSS_N],
    /// sd(m)(n) = s(m)(n + 1) s(m)(n)
    sd: [[f32; SSS_N - 1]; SSS_N],
    c_tilde: [f32; SSS_N],
    /// z1(m)(n) = z~((n + (m mod 8)) mod 31)
    z1: [[f32; SSS_N]; 8],
    /// (m0, m1) to N_id_1
    n_id_1: [[Option<u16>; SSS_N]; SSS_N],
}

impl SssTables {
    pub fn new() -> Self {
        let s_tilde = m_sequence(|x, i| x[i + 2] + x[i]);
        let c_tilde = m_sequence(|x, i| x[i + 3] + x[i]);
        let z_tilde = m_sequence(|x, i| x[i + 4] + x[i + 2] + x[i + 1] + x[i]);

        let mut s = [[0.0; SSS_N]; SSS_N];
        let mut sd = [[0.0; SSS_N - 1]; SSS_N];
        for m in 0..SSS_N {
            for n in 0..SSS_N {
                s[m][n] = s_tilde[(n + m) % SSS_N];
            }
            for n in 0..SSS_N - 1 {
                sd[m][n] = s[m][n + 1] * s[m][n];
            }
        }

        let mut z1 = [[0.0; SSS_N]; 8];
        for (m, row) in z1.iter_mut().enumerate() {
            for (n, v) in row.iter_mut().enumerate() {
                *v = z_tilde[(n + m) % SSS_N];
            }
        }

        let mut n_id_1 = [[None; SSS_N]; SSS_N];
        for id in 0..NOF_N_ID_1 as u16 {
            let (m0, m1) = m0_m1(id);
            n_id_1[m0][m1] = Some(id);
        }

        Self { s, sd, c_tilde, z1, n_id_1 }
    }

    /// c0(n), c1(n) for the given N_id_2
    pub fn c(&self, n_id_2: u8) -> ([f32; SSS_N], [f32; SSS_N]) {
        let n_id_2 = n_id_2 as usize;
        let mut c0 = [0.0; SSS_N];
        let mut c1 = [0.0; SSS_N];
        for n in 0..SSS_N {
            c0[n] = self.c_tilde[(n + n_id_2) % SSS_N];
            c1[n] = self.c_tilde[(n + n_id_2 + 3) % SSS_N];
        }
        (c0, c1)
    }

    /// Cell identity group for a detected (m0, m1), in either order
    pub fn n_id_1(&self, m0: usize, m1: usize) -> Option<u16> {
        if m0 >= SSS_N || m1 >= SSS_N || m0 == m1 {
            return None;
        }
        let (lo, hi) = if m1 > m0 { (m0, m1) } else { (m1, m0) };
        self.n_id_1[lo][hi]
    }

    /// Frequency-domain SSS (36.211 6.11.2.1)
    pub fn generate(&self, n_id_1: u16, n_id_2: u8, subframe: u32) -> Vec<Complex32> {
        let (m0, m1) = m0_m1(n_id_1);
        let (c0, c1) = self.c(n_id_2);
        let mut d = vec![Complex32::new(0.0, 0.0); SSS_LEN];

        for n in 0..SSS_N {
            let (even, odd) = if subframe == 0 {
                (self.s[m0][n] * c0[n], self.s[m1][n] * c1[n] * self.z1[m0 % 8][n])
            } else {
                (self.s[m1][n] * c0[n], self.s[m0][n] * c1[n] * self.z1[m1 % 8][n])
            };
            d[2 * n] = Complex32::new(even, 0.0);
            d[2 * n + 1] = Complex32::new(odd, 0.0);
        }
        d
    }
}

impl Default for SssTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one SSS correlation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SssMatch {
    pub m0: usize,
    pub m0_value: f32,
    pub m1: usize,
    pub m1_value: f32,
}

/// SSS detector
pub struct SssDetector {
    fft_size: usize,
    tables: SssTables,
    fft: Arc<dyn Fft<f32>>,
    n_id_2: u8,
    c0: [f32; SSS_N],
    c1: [f32; SSS_N],
}

impl SssDetector {
    pub fn new(fft_size: usize) -> Result<Self, LayerError> {
        if !fft_size_is_valid(fft_size) {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid FFT size {} for SSS detection",
                fft_size
            )));
        }
        let tables = SssTables::new();
        let (c0, c1) = tables.c(0);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Ok(Self { fft_size, tables, fft, n_id_2: 0, c0, c1 })
    }

    pub fn tables(&self) -> &SssTables {
        &self.tables
    }

    pub fn set_n_id_2(&mut self, n_id_2: u8) {
        if n_id_2 != self.n_id_2 {
            let (c0, c1) = self.tables.c(n_id_2);
            self.c0 = c0;
            self.c1 = c1;
            self.n_id_2 = n_id_2;
        }
    }

    /// Frequency-domain SSS time samples into the 62 SSS subcarriers
    fn demodulate(&self, symbol: &[Complex32]) -> Vec<Complex32> {
        let mut buffer = symbol[..self.fft_size].to_vec();
        self.fft.process(&mut buffer);
        extract_from_fft(&buffer)
    }

    /// Detect (m0, m1) from one SSS symbol of `fft_size` samples without CP
    pub fn m0m1(&self, symbol: &[Complex32], algorithm: SssAlgorithm) -> Result<SssMatch, LayerError> {
        if symbol.len() < self.fft_size {
            return Err(LayerError::ConfigurationError(format!(
                "SSS symbol of {} samples is shorter than the FFT size {}",
                symbol.len(),
                self.fft_size
            )));
        }

        let y = self.demodulate(symbol);

        let mut even = [Complex32::new(0.0, 0.0); SSS_N];
        for n in 0..SSS_N {
            even[n] = y[2 * n] * self.c0[n];
        }
        let m0_metric = self.correlate(&even, algorithm);
        let m0 = max_index(&m0_metric);

        let z1 = &self.tables.z1[m0 % 8];
        let mut odd = [Complex32::new(0.0, 0.0); SSS_N];
        for n in 0..SSS_N {
            odd[n] = y[2 * n + 1] * self.c1[n] * z1[n];
        }
        let m1_metric = self.correlate(&odd, algorithm);
        let m1 = max_index(&m1_metric);

        trace!(
            "SSS m0={} ({:.2}) m1={} ({:.2}) {:?}",
            m0,
            m0_metric[m0],
            m1,
            m1_metric[m1],
            algorithm
        );

        Ok(SssMatch {
            m0,
            m0_value: m0_metric[m0],
            m1,
            m1_value: m1_metric[m1],
        })
    }

    /// Correlation metric against every shift s(m)
    fn correlate(&self, input: &[Complex32; SSS_N], algorithm: SssAlgorithm) -> [f32; SSS_N] {
        let mut metric = [0.0; SSS_N];
        match algorithm {
            SssAlgorithm::Full => self.correlate_partial(input, 1, &mut metric),
            SssAlgorithm::Partial { segments } => {
                self.correlate_partial(input, segments.clamp(1, SSS_N), &mut metric)
            }
            SssAlgorithm::Diff => {
                let mut diff = [Complex32::new(0.0, 0.0); SSS_N - 1];
                for n in 0..SSS_N - 1 {
                    diff[n] = input[n + 1] * input[n].conj();
                }
                for (m, value) in metric.iter_mut().enumerate() {
                    let sum: Complex32 = diff
                        .iter()
                        .zip(&self.tables.sd[m])
                        .map(|(d, s)| d * s)
                        .sum();
                    *value = sum.norm();
                }
            }
        }
        metric
    }

    fn correlate_partial(&self, input: &[Complex32; SSS_N], segments: usize, metric: &mut [f32; SSS_N]) {
        let seg_len = SSS_N / segments;
        for (m, value) in metric.iter_mut().enumerate() {
            let s = &self.tables.s[m];
            let mut total = 0.0;
            for p in 0..segments {
                let start = p * seg_len;
                // Last segment takes the remainder
                let end = if p + 1 == segments { SSS_N } else { start + seg_len };
                let sum: Complex32 = input[start..end]
                    .iter()
                    .zip(&s[start..end])
                    .map(|(x, c)| x * c)
                    .sum();
                total += sum.norm();
            }
            *value = total;
        }
    }

    /// Time-domain SSS symbol (no CP) with unit average power per sample
    pub fn time_domain(&self, n_id_1: u16, n_id_2: u8, subframe: u32) -> Vec<Complex32> {
        let mut buffer = map_to_fft(&self.tables.generate(n_id_1, n_id_2, subframe), self.fft_size);
        FftPlanner::<f32>::new()
            .plan_fft_inverse(self.fft_size)
            .process(&mut buffer);
        let scale = 1.0 / (SSS_LEN as f32).sqrt();
        buffer.iter_mut().for_each(|s| *s *= scale);
        buffer
    }
}
