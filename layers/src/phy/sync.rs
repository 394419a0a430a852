//! Cell Synchronization
//!
//! Acquires symbol timing, carrier frequency offset, cyclic prefix length and
//! the physical cell identity from unsynchronized samples. The PSS peak gives
//! timing and N_id_2; CFO and CP length are estimated around the peak and the
//! SSS symbol preceding the PSS gives N_id_1 and the half-frame.

use crate::phy::cfo::CfoCorrector;
use crate::phy::pss::PssDetector;
use crate::phy::sss::{subframe, SssAlgorithm, SssDetector};
use crate::LayerError;
use common::types::{CyclicPrefix, Pci};
use common::utils::{avg_power, cp_len_ext, cp_len_norm, dot_prod_conj, ema, fft_size_is_valid};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// EMA factor of the peak value
pub const MEANPEAK_EMA_ALPHA: f32 = 0.2;

/// EMA factor of the CFO estimate
pub const CFO_EMA_ALPHA: f32 = 0.01;

/// EMA factor of the CP metrics
pub const CP_EMA_ALPHA: f32 = 0.2;

/// Largest frame accepted (20 ms at 15.36 MHz)
pub const MAX_FRAME_SIZE: usize = 307200;

/// Default PSS peak-to-average threshold
pub const DEFAULT_THRESHOLD: f32 = 15.0;

/// Synchronizer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// FFT size (64..=2048, multiple of 64)
    pub fft_size: usize,
    /// Samples searched per call
    pub frame_size: usize,
    /// PSS peak-to-average detection threshold
    pub threshold: f32,
    pub sss_algorithm: SssAlgorithm,
    pub detect_cp: bool,
    pub correct_cfo: bool,
    pub sss_enabled: bool,
    /// PSS correlation averaging factor (1.0 = no averaging)
    pub em_alpha: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fft_size: 128,
            frame_size: 9600,
            threshold: DEFAULT_THRESHOLD,
            sss_algorithm: SssAlgorithm::default(),
            detect_cp: true,
            correct_cfo: true,
            sss_enabled: true,
            em_alpha: 1.0,
        }
    }
}

/// Outcome of one best-effort acquisition sub-step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// Not enough samples before the peak
    InsufficientSamples,
    /// Ran but produced no valid result
    Failed,
    Disabled,
    /// Peak below threshold
    NotAttempted,
}

/// Result of [`CellSynchronizer::find`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncFindResult {
    /// Peak value reached the threshold
    pub detected: bool,
    /// Index just past the PSS, relative to the search offset
    pub peak_position: usize,
    pub peak_value: f32,
    pub cfo: StepOutcome,
    pub cp: StepOutcome,
    pub sss: StepOutcome,
}

/// PSS/SSS based cell synchronizer
pub struct CellSynchronizer {
    fft_size: usize,
    frame_size: usize,
    pss: PssDetector,
    sss: SssDetector,
    cfo_corrector: CfoCorrector,
    /// SSS symbol after CFO correction
    sss_buffer: Vec<Complex32>,

    n_id_2: Option<u8>,
    n_id_1: Option<u16>,
    sf_idx: u32,
    cp: CyclicPrefix,

    threshold: f32,
    detect_cp: bool,
    sss_enabled: bool,
    correct_cfo: bool,
    sss_algorithm: SssAlgorithm,

    peak_value: f32,
    mean_peak_value: f32,
    mean_cfo: f32,
    m_norm_avg: f32,
    m_ext_avg: f32,
}

impl CellSynchronizer {
    /// Create a synchronizer searching `frame_size` samples per call
    pub fn new(frame_size: usize, fft_size: usize) -> Result<Self, LayerError> {
        if !fft_size_is_valid(fft_size) {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid FFT size {}",
                fft_size
            )));
        }
        if frame_size > MAX_FRAME_SIZE || frame_size < fft_size {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid frame size {} for FFT size {}",
                frame_size, fft_size
            )));
        }

        debug!("Cell synchronizer: frame_size={} fft_size={}", frame_size, fft_size);

        Ok(Self {
            fft_size,
            frame_size,
            pss: PssDetector::new(fft_size)?,
            sss: SssDetector::new(fft_size)?,
            cfo_corrector: CfoCorrector::new(fft_size),
            sss_buffer: vec![Complex32::new(0.0, 0.0); fft_size],
            n_id_2: None,
            n_id_1: None,
            sf_idx: 0,
            cp: CyclicPrefix::Normal,
            threshold: DEFAULT_THRESHOLD,
            detect_cp: true,
            sss_enabled: true,
            correct_cfo: true,
            sss_algorithm: SssAlgorithm::default(),
            peak_value: 0.0,
            mean_peak_value: 0.0,
            mean_cfo: 0.0,
            m_norm_avg: 0.0,
            m_ext_avg: 0.0,
        })
    }

    /// Create and configure a synchronizer
    pub fn from_config(config: &SyncConfig) -> Result<Self, LayerError> {
        let mut sync = Self::new(config.frame_size, config.fft_size)?;
        sync.set_threshold(config.threshold);
        sync.set_sss_algorithm(config.sss_algorithm);
        sync.set_cp_detection(config.detect_cp);
        sync.set_cfo_correction(config.correct_cfo);
        sync.sss_enable(config.sss_enabled);
        sync.set_em_alpha(config.em_alpha);
        Ok(sync)
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn set_n_id_2(&mut self, n_id_2: u8) -> Result<(), LayerError> {
        if n_id_2 >= Pci::NOF_N_ID_2 {
            return Err(LayerError::ConfigurationError(format!("Invalid N_id_2 {}", n_id_2)));
        }
        self.n_id_2 = Some(n_id_2);
        self.sss.set_n_id_2(n_id_2);
        Ok(())
    }

    pub fn n_id_2(&self) -> Option<u8> {
        self.n_id_2
    }

    pub fn n_id_1(&self) -> Option<u16> {
        self.n_id_1
    }

    /// Physical cell identity, when both N_id_1 and N_id_2 are known
    pub fn cell_id(&self) -> Option<Pci> {
        match (self.n_id_1, self.n_id_2) {
            (Some(n_id_1), Some(n_id_2)) => Pci::from_parts(n_id_1, n_id_2),
            _ => None,
        }
    }

    pub fn sss_detected(&self) -> bool {
        self.n_id_1.is_some()
    }

    /// Subframe (0 or 5) of the last SSS decode
    pub fn sf_idx(&self) -> u32 {
        self.sf_idx
    }

    /// Smoothed CFO, in subcarrier spacings
    pub fn cfo(&self) -> f32 {
        self.mean_cfo
    }

    /// Smoothed peak value
    pub fn peak_value(&self) -> f32 {
        self.mean_peak_value
    }

    pub fn last_peak_value(&self) -> f32 {
        self.peak_value
    }

    pub fn cp(&self) -> CyclicPrefix {
        self.cp
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn sss_enable(&mut self, enabled: bool) {
        self.sss_enabled = enabled;
    }

    pub fn sss_is_enabled(&self) -> bool {
        self.sss_enabled
    }

    pub fn set_cfo_correction(&mut self, enabled: bool) {
        self.correct_cfo = enabled;
    }

    pub fn set_cp_detection(&mut self, enabled: bool) {
        self.detect_cp = enabled;
    }

    pub fn set_em_alpha(&mut self, alpha: f32) {
        self.pss.set_em_alpha(alpha);
    }

    pub fn set_cp(&mut self, cp: CyclicPrefix) {
        self.cp = cp;
    }

    pub fn set_sss_algorithm(&mut self, algorithm: SssAlgorithm) {
        self.sss_algorithm = algorithm;
    }

    pub fn sss_algorithm(&self) -> SssAlgorithm {
        self.sss_algorithm
    }

    /// Clear the smoothed peak and CP metrics and the PSS correlation average
    pub fn reset(&mut self) {
        self.mean_peak_value = 0.0;
        self.m_norm_avg = 0.0;
        self.m_ext_avg = 0.0;
        self.pss.reset();
    }

    /// Search `samples[find_offset..]` for the PSS of the configured N_id_2
    pub fn find(&mut self, samples: &[Complex32], find_offset: usize) -> Result<SyncFindResult, LayerError> {
        let n_id_2 = self.n_id_2.ok_or_else(|| {
            LayerError::ConfigurationError("N_id_2 must be set before searching".to_string())
        })?;
        if samples.len() < find_offset + self.fft_size {
            return Err(LayerError::ConfigurationError(format!(
                "{} samples are not enough to search from offset {} with FFT size {}",
                samples.len(),
                find_offset,
                self.fft_size
            )));
        }

        let end = samples.len().min(find_offset + self.frame_size);
        let (peak_pos, peak_value) = self.pss.find_pss(&samples[find_offset..end], n_id_2)?;

        self.peak_value = peak_value;
        self.mean_peak_value = ema(peak_value, self.mean_peak_value, MEANPEAK_EMA_ALPHA);

        let mut result = SyncFindResult {
            detected: peak_value >= self.threshold,
            peak_position: peak_pos,
            peak_value,
            cfo: StepOutcome::NotAttempted,
            cp: StepOutcome::NotAttempted,
            sss: StepOutcome::NotAttempted,
        };

        if result.detected {
            let abs_peak = find_offset + peak_pos;

            result.cfo = if abs_peak >= self.fft_size {
                let cfo = self
                    .pss
                    .cfo_compute(&samples[abs_peak - self.fft_size..abs_peak], n_id_2);
                self.mean_cfo = ema(cfo, self.mean_cfo, CFO_EMA_ALPHA);
                StepOutcome::Completed
            } else {
                debug!("No space for CFO computation, peak at {}", peak_pos);
                StepOutcome::InsufficientSamples
            };

            result.cp = if !self.detect_cp {
                StepOutcome::Disabled
            } else if abs_peak >= 2 * (self.fft_size + cp_len_ext(self.fft_size)) {
                self.cp = self.detect_cp(samples, abs_peak);
                StepOutcome::Completed
            } else {
                debug!("Not enough room to detect CP length, peak at {}", peak_pos);
                StepOutcome::InsufficientSamples
            };

            result.sss = if self.sss_enabled {
                self.sync_sss(samples, abs_peak)
            } else {
                StepOutcome::Disabled
            };
        }

        info!(
            "SYNC detected={} N_id_2={} find_offset={} pos={} peak={:.2} threshold={:.2} sf_idx={} CFO={:.3} kHz",
            result.detected,
            n_id_2,
            find_offset,
            peak_pos,
            peak_value,
            self.threshold,
            self.sf_idx,
            15.0 * self.mean_cfo
        );

        Ok(result)
    }

    /// Choose the CP length from the two symbols ending at `peak_pos`
    ///
    /// `peak_pos` is absolute and must be at least `2 * (fft_size + cp_ext)`.
    pub fn detect_cp(&mut self, samples: &[Complex32], peak_pos: usize) -> CyclicPrefix {
        let fft_size = self.fft_size;

        let metric = |cp_len: usize| -> (f32, f32) {
            let first = peak_pos - 2 * (fft_size + cp_len);
            let mut m = 0.0;
            let mut r = [0.0f32; 2];
            for (i, r_i) in r.iter_mut().enumerate() {
                let start = first + i * (fft_size + cp_len);
                let cp = &samples[start..start + cp_len];
                let tail = &samples[start + fft_size..start + fft_size + cp_len];
                *r_i = dot_prod_conj(tail, cp).re;
                let c = cp_len as f32 * avg_power(cp);
                if c > 0.0 {
                    m += *r_i / c;
                }
            }
            (m / 2.0, r[1])
        };

        let (m_norm, r_norm) = metric(cp_len_norm(1, fft_size));
        let (m_ext, r_ext) = metric(cp_len_ext(fft_size));

        self.m_norm_avg = ema(m_norm, self.m_norm_avg, CP_EMA_ALPHA);
        self.m_ext_avg = ema(m_ext, self.m_ext_avg, CP_EMA_ALPHA);

        let cp = if self.m_norm_avg > self.m_ext_avg {
            CyclicPrefix::Normal
        } else if self.m_norm_avg < self.m_ext_avg {
            CyclicPrefix::Extended
        } else if r_norm > r_ext {
            CyclicPrefix::Normal
        } else {
            CyclicPrefix::Extended
        };

        debug!(
            "CP metrics: norm={:.3} ext={:.3} -> {:?}",
            self.m_norm_avg, self.m_ext_avg, cp
        );
        cp
    }

    /// Decode the SSS preceding the PSS that ends at `peak_pos`
    fn sync_sss(&mut self, samples: &[Complex32], peak_pos: usize) -> StepOutcome {
        self.n_id_1 = None;

        let cp_len = match self.cp {
            CyclicPrefix::Normal => cp_len_norm(1, self.fft_size),
            CyclicPrefix::Extended => cp_len_ext(self.fft_size),
        };
        let Some(sss_idx) = peak_pos.checked_sub(2 * self.fft_size + cp_len) else {
            debug!("Not enough room to decode SSS, peak at {}", peak_pos);
            return StepOutcome::InsufficientSamples;
        };

        let symbol = &samples[sss_idx..sss_idx + self.fft_size];
        if self.correct_cfo && self.mean_cfo != 0.0 {
            self.cfo_corrector.correct(
                symbol,
                &mut self.sss_buffer,
                -self.mean_cfo / self.fft_size as f32,
            );
        } else {
            self.sss_buffer.copy_from_slice(symbol);
        }

        let m = match self.sss.m0m1(&self.sss_buffer, self.sss_algorithm) {
            Ok(m) => m,
            Err(e) => {
                debug!("SSS correlation failed: {}", e);
                return StepOutcome::Failed;
            }
        };

        self.sf_idx = subframe(m.m0, m.m1);
        match self.sss.tables().n_id_1(m.m0, m.m1) {
            Some(n_id_1) => {
                self.n_id_1 = Some(n_id_1);
                debug!(
                    "SSS detected N_id_1={} sf_idx={} {:?} CP",
                    n_id_1, self.sf_idx, self.cp
                );
                StepOutcome::Completed
            }
            None => {
                debug!("SSS pair m0={} m1={} is not a valid cell group", m.m0, m.m1);
                StepOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    pub(crate) const FFT: usize = 128;

    /// Random data with an SSS symbol at `start` followed by the PSS symbol
    pub(crate) fn synth(n_id_1: u16, n_id_2: u8, sf: u32, cp_len: usize, start: usize, len: usize, eps: f32) -> Vec<Complex32> {
        let mut rng = StdRng::seed_from_u64(42);
        let mut samples: Vec<Complex32> = (0..len)
            .map(|_| Complex32::new(rng.gen_range(-1.2..1.2), rng.gen_range(-1.2..1.2)))
            .collect();

        let sss = SssDetector::new(FFT).unwrap().time_domain(n_id_1, n_id_2, sf);
        let pss = PssDetector::new(FFT).unwrap().replica(n_id_2).to_vec();

        let mut pos = start;
        for symbol in [sss, pss] {
            for i in 0..cp_len {
                samples[pos + i] = symbol[FFT - cp_len + i];
            }
            for i in 0..FFT {
                samples[pos + cp_len + i] = symbol[i];
            }
            pos += cp_len + FFT;
        }

        for (n, s) in samples.iter_mut().enumerate() {
            let noise = Complex32::new(rng.gen_range(-0.05..0.05), rng.gen_range(-0.05..0.05));
            let rotation = Complex32::from_polar(1.0, 2.0 * std::f32::consts::PI * eps * n as f32 / FFT as f32);
            *s = (*s + noise) * rotation;
        }
        samples
    }

    #[test]
    fn test_new_validation() {
        assert!(CellSynchronizer::new(9600, 128).is_ok());
        assert!(CellSynchronizer::new(9600, 100).is_err());
        assert!(CellSynchronizer::new(9600, 32).is_err());
        assert!(CellSynchronizer::new(307201, 128).is_err());
        assert!(CellSynchronizer::new(64, 128).is_err());
    }

    #[test]
    fn test_find_requires_n_id_2() {
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        let samples = vec![Complex32::new(0.0, 0.0); 9600];
        assert!(matches!(
            sync.find(&samples, 0),
            Err(LayerError::ConfigurationError(_))
        ));
        assert!(sync.set_n_id_2(3).is_err());
    }

    #[test]
    fn test_find_rejects_short_buffer() {
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(0).unwrap();
        let samples = vec![Complex32::new(0.0, 0.0); 200];
        assert!(sync.find(&samples, 100).is_err());
    }

    #[test]
    fn test_find_cell() {
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.0);
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();

        let result = sync.find(&samples, 0).unwrap();
        assert!(result.detected);
        assert_eq!(result.peak_position, 1000 + 2 * (9 + FFT));
        assert_eq!(result.cfo, StepOutcome::Completed);
        assert_eq!(result.cp, StepOutcome::Completed);
        assert_eq!(result.sss, StepOutcome::Completed);
        assert_eq!(sync.cp(), CyclicPrefix::Normal);
        assert_eq!(sync.sf_idx(), 0);
        assert_eq!(sync.cell_id(), Some(Pci(137)));
        assert!(sync.sss_detected());
    }

    #[test]
    fn test_find_subframe_5_all_algorithms() {
        let samples = synth(100, 1, 5, 9, 2000, 9600, 0.0);
        for algorithm in [SssAlgorithm::Full, SssAlgorithm::Partial { segments: 3 }, SssAlgorithm::Diff] {
            let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
            sync.set_n_id_2(1).unwrap();
            sync.set_sss_algorithm(algorithm);
            let result = sync.find(&samples, 0).unwrap();
            assert_eq!(result.sss, StepOutcome::Completed);
            assert_eq!(sync.sf_idx(), 5);
            assert_eq!(sync.cell_id(), Some(Pci(301)));
        }
    }

    #[test]
    fn test_find_extended_cp() {
        let samples = synth(7, 0, 0, 32, 1000, 9600, 0.0);
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(0).unwrap();

        let result = sync.find(&samples, 0).unwrap();
        assert!(result.detected);
        assert_eq!(sync.cp(), CyclicPrefix::Extended);
        assert_eq!(result.sss, StepOutcome::Completed);
        assert_eq!(sync.cell_id(), Some(Pci(21)));
    }

    #[test]
    fn test_find_with_offset() {
        let samples = synth(3, 0, 0, 9, 5000, 12000, 0.0);
        let mut sync = CellSynchronizer::new(4800, FFT).unwrap();
        sync.set_n_id_2(0).unwrap();

        let result = sync.find(&samples, 4000).unwrap();
        assert!(result.detected);
        assert_eq!(result.peak_position, 1000 + 2 * (9 + FFT));
        assert_eq!(sync.cell_id(), Some(Pci(9)));
    }

    #[test]
    fn test_below_threshold() {
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.0);
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();
        sync.set_threshold(1e6);

        let result = sync.find(&samples, 0).unwrap();
        assert!(!result.detected);
        assert_eq!(result.cfo, StepOutcome::NotAttempted);
        assert_eq!(result.cp, StepOutcome::NotAttempted);
        assert_eq!(result.sss, StepOutcome::NotAttempted);
        assert!((sync.peak_value() - MEANPEAK_EMA_ALPHA * result.peak_value).abs() < 1e-3);
        assert_eq!(sync.cfo(), 0.0);
        assert_eq!(sync.cell_id(), None);
    }

    #[test]
    fn test_insufficient_samples_before_peak() {
        // Peak at 274: room for CFO and SSS but not for CP detection
        let samples = synth(45, 2, 0, 9, 0, 4000, 0.0);
        let mut sync = CellSynchronizer::new(4000, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();

        let result = sync.find(&samples, 0).unwrap();
        assert!(result.detected);
        assert_eq!(result.peak_position, 274);
        assert_eq!(result.cfo, StepOutcome::Completed);
        assert_eq!(result.cp, StepOutcome::InsufficientSamples);
        assert_eq!(result.sss, StepOutcome::Completed);
    }

    #[test]
    fn test_disabled_steps() {
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.0);
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();
        sync.sss_enable(false);
        sync.set_cp_detection(false);

        let result = sync.find(&samples, 0).unwrap();
        assert!(result.detected);
        assert_eq!(result.cp, StepOutcome::Disabled);
        assert_eq!(result.sss, StepOutcome::Disabled);
        assert_eq!(sync.cell_id(), None);
    }

    #[test]
    fn test_cfo_estimate() {
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.1);
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();

        let result = sync.find(&samples, 0).unwrap();
        assert!(result.detected);
        assert!((sync.cfo() - CFO_EMA_ALPHA * 0.1).abs() < 2e-4, "cfo {}", sync.cfo());
    }

    #[test]
    fn test_peak_ema_convergence() {
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.0);
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();

        for _ in 0..100 {
            sync.find(&samples, 0).unwrap();
        }
        let last = sync.last_peak_value();
        assert!((sync.peak_value() - last).abs() < 1e-3 * last);
    }

    #[test]
    fn test_reset_keeps_cfo() {
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.1);
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();
        sync.set_threshold(20.0);
        sync.find(&samples, 0).unwrap();

        let cfo = sync.cfo();
        sync.reset();
        assert_eq!(sync.peak_value(), 0.0);
        assert_eq!(sync.cfo(), cfo);
        assert_eq!(sync.threshold(), 20.0);
    }

    #[test]
    fn test_config_defaults() {
        let config: SyncConfig = serde_yaml::from_str("threshold: 10.0").unwrap();
        assert_eq!(config.fft_size, 128);
        assert_eq!(config.frame_size, 9600);
        assert_eq!(config.threshold, 10.0);
        assert_eq!(config.sss_algorithm, SssAlgorithm::Partial { segments: 3 });
        assert!(config.detect_cp);

        let config: SyncConfig = serde_yaml::from_str("sss_algorithm:\n  kind: diff\n").unwrap();
        assert_eq!(config.sss_algorithm, SssAlgorithm::Diff);
        assert!(CellSynchronizer::from_config(&config).is_ok());
    }
}
