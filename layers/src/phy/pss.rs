//! Primary Synchronization Signal
//!
//! Implements PSS generation and detection according to 3GPP TS 36.211
//! section 6.11.1. Detection correlates a window of time samples against the
//! time-domain replica of the configured N_id_2 using FFT-based
//! cross-correlation.

use crate::LayerError;
use common::utils::{ema, fft_size_is_valid, next_power_of_2};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::{debug, trace};

/// PSS sequence length
pub const PSS_LEN: usize = 62;

/// Zadoff-Chu root index for each N_id_2
const PSS_ROOTS: [u32; 3] = [25, 29, 34];

/// Generate the frequency-domain PSS
pub fn generate_pss(n_id_2: u8) -> Vec<Complex32> {
    let u = PSS_ROOTS[n_id_2 as usize % 3] as f32;
    let pi = std::f32::consts::PI;

    (0..PSS_LEN)
        .map(|n| {
            let n = n as f32;
            let phase = if n < 31.0 {
                -pi * u * n * (n + 1.0) / 63.0
            } else {
                -pi * u * (n + 1.0) * (n + 2.0) / 63.0
            };
            Complex32::from_polar(1.0, phase)
        })
        .collect()
}

/// FFT bin of the `n`-th element of a 62-long synchronization sequence
///
/// The sequence occupies the 31 subcarriers either side of DC, which is
/// left empty.
pub fn sync_seq_bin(n: usize, fft_size: usize) -> usize {
    if n < 31 {
        fft_size - 31 + n
    } else {
        n - 30
    }
}

/// Place a 62-long sequence on an FFT-sized frequency buffer
pub fn map_to_fft(sequence: &[Complex32], fft_size: usize) -> Vec<Complex32> {
    let mut buffer = vec![Complex32::new(0.0, 0.0); fft_size];
    for (n, value) in sequence.iter().enumerate().take(PSS_LEN) {
        buffer[sync_seq_bin(n, fft_size)] = *value;
    }
    buffer
}

/// Pick the 62 synchronization subcarriers out of an FFT output
pub fn extract_from_fft(buffer: &[Complex32]) -> Vec<Complex32> {
    (0..PSS_LEN)
        .map(|n| buffer[sync_seq_bin(n, buffer.len())])
        .collect()
}

/// Time-domain PSS with unit average power per sample
pub fn pss_time_domain(n_id_2: u8, fft_size: usize) -> Vec<Complex32> {
    let mut buffer = map_to_fft(&generate_pss(n_id_2), fft_size);
    let mut planner = FftPlanner::<f32>::new();
    planner.plan_fft_inverse(fft_size).process(&mut buffer);

    let scale = 1.0 / (PSS_LEN as f32).sqrt();
    buffer.iter_mut().for_each(|s| *s *= scale);
    buffer
}

/// Correlation engine sized for one window length
struct Correlator {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// Conjugated spectrum of the zero-padded replica, per N_id_2
    replica_freq: [Vec<Complex32>; 3],
}

/// PSS detector
pub struct PssDetector {
    fft_size: usize,
    /// Time-domain replicas, per N_id_2
    replicas: [Vec<Complex32>; 3],
    planner: FftPlanner<f32>,
    correlator: Option<Correlator>,
    /// Smoothed |correlation|^2, used when `em_alpha < 1`
    conv_avg: Vec<f32>,
    conv_avg_n_id_2: Option<u8>,
    em_alpha: f32,
}

impl PssDetector {
    /// Create a detector for the given FFT size
    pub fn new(fft_size: usize) -> Result<Self, LayerError> {
        if !fft_size_is_valid(fft_size) {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid FFT size {} for PSS detection",
                fft_size
            )));
        }

        let replicas = [
            pss_time_domain(0, fft_size),
            pss_time_domain(1, fft_size),
            pss_time_domain(2, fft_size),
        ];

        Ok(Self {
            fft_size,
            replicas,
            planner: FftPlanner::new(),
            correlator: None,
            conv_avg: Vec::new(),
            conv_avg_n_id_2: None,
            em_alpha: 1.0,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Averaging factor of the correlation output across calls (1.0 disables it)
    pub fn set_em_alpha(&mut self, alpha: f32) {
        self.em_alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn em_alpha(&self) -> f32 {
        self.em_alpha
    }

    pub fn replica(&self, n_id_2: u8) -> &[Complex32] {
        &self.replicas[n_id_2 as usize % 3]
    }

    /// Forget the averaged correlation
    pub fn reset(&mut self) {
        self.conv_avg.clear();
        self.conv_avg_n_id_2 = None;
    }

    fn correlator(&mut self, window_len: usize) -> &Correlator {
        let size = next_power_of_2((window_len + self.fft_size) as u32) as usize;
        if self.correlator.as_ref().map_or(false, |c| c.size != size) {
            self.correlator = None;
        }

        let fft_size = self.fft_size;
        let replicas = &self.replicas;
        let planner = &mut self.planner;
        self.correlator.get_or_insert_with(|| {
            let fft = planner.plan_fft_forward(size);
            let ifft = planner.plan_fft_inverse(size);
            let replica_freq = [0usize, 1, 2].map(|n_id_2| {
                let mut buffer = vec![Complex32::new(0.0, 0.0); size];
                buffer[..fft_size].copy_from_slice(&replicas[n_id_2]);
                fft.process(&mut buffer);
                buffer.iter_mut().for_each(|s| *s = s.conj());
                buffer
            });
            debug!("PSS correlator planned: {} points for {} samples", size, window_len);
            Correlator { size, fft, ifft, replica_freq }
        })
    }

    /// Correlate `window` against the PSS of `n_id_2`
    ///
    /// Returns the index just past the end of the best-matching PSS symbol,
    /// relative to the start of the window, and the peak-to-average ratio of
    /// the correlation power.
    pub fn find_pss(&mut self, window: &[Complex32], n_id_2: u8) -> Result<(usize, f32), LayerError> {
        if n_id_2 > 2 {
            return Err(LayerError::ConfigurationError(format!("Invalid N_id_2 {}", n_id_2)));
        }
        if window.len() < self.fft_size {
            return Err(LayerError::ConfigurationError(format!(
                "PSS window of {} samples is shorter than the FFT size {}",
                window.len(),
                self.fft_size
            )));
        }

        let fft_size = self.fft_size;
        let nof_lags = window.len() - fft_size + 1;
        let correlator = self.correlator(window.len());

        let mut buffer = vec![Complex32::new(0.0, 0.0); correlator.size];
        buffer[..window.len()].copy_from_slice(window);
        correlator.fft.process(&mut buffer);
        for (x, p) in buffer.iter_mut().zip(&correlator.replica_freq[n_id_2 as usize]) {
            *x *= p;
        }
        correlator.ifft.process(&mut buffer);

        let norm = 1.0 / correlator.size as f32;
        let power: Vec<f32> = buffer[..nof_lags]
            .iter()
            .map(|c| (c * norm).norm_sqr())
            .collect();

        let power = if self.em_alpha < 1.0 {
            if self.conv_avg.len() != nof_lags || self.conv_avg_n_id_2 != Some(n_id_2) {
                self.conv_avg = power;
                self.conv_avg_n_id_2 = Some(n_id_2);
            } else {
                for (avg, p) in self.conv_avg.iter_mut().zip(&power) {
                    *avg = ema(*p, *avg, self.em_alpha);
                }
            }
            self.conv_avg.clone()
        } else {
            power
        };

        let (lag, peak) = power
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        let mean = power.iter().sum::<f32>() / power.len() as f32;
        let peak_value = if mean > 0.0 { peak / mean } else { 0.0 };

        trace!(
            "PSS N_id_2={} lag={} peak={:.3e} mean={:.3e} psr={:.2}",
            n_id_2,
            lag,
            peak,
            mean,
            peak_value
        );

        Ok((lag + fft_size, peak_value))
    }

    /// Frequency offset of a received PSS symbol, in subcarrier spacings
    ///
    /// `pss_symbol` holds the `fft_size` samples of the PSS without CP.
    pub fn cfo_compute(&self, pss_symbol: &[Complex32], n_id_2: u8) -> f32 {
        let replica = self.replica(n_id_2);
        let half = self.fft_size / 2;

        let mut y0 = Complex32::new(0.0, 0.0);
        let mut y1 = Complex32::new(0.0, 0.0);
        for (n, (x, p)) in pss_symbol.iter().zip(replica).enumerate() {
            let y = x * p.conj();
            if n < half {
                y0 += y;
            } else {
                y1 += y;
            }
        }

        (y0.conj() * y1).arg() / std::f32::consts::PI
    }
}
