//! Rank and Precoder Selection
//!
//! Closed-loop feedback for two transmit ports and two receive antennas
//! using the 36.211 Table 6.3.4.2.3-1 codebook. SINR is evaluated for every
//! codebook entry on a subset of resource elements.

use crate::LayerError;
use common::phy::ChannelEstimate;
use num_complex::Complex32;
use tracing::debug;

/// Margin a higher rank must beat the current best by
pub const RANK_SELECTION_MARGIN: f32 = 0.1;

/// Condition number (dB) above which a single layer is reported
pub const CONDITION_NUMBER_THRESHOLD: f32 = 3.0;

/// Codebook entries per rank for two ports
pub const NOF_PMI: [usize; 2] = [4, 2];

/// Every `SAMPLE_STRIDE`-th resource element is evaluated
const SAMPLE_STRIDE: usize = 12;

/// Floor applied to the noise estimate
const MIN_NOISE: f32 = 1e-6;

/// Best precoder per rank with the SINR of every codebook entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PmiSelection {
    /// Best PMI for one and two layers
    pub pmi: [u32; 2],
    /// Linear SINR indexed by [layers - 1][pmi]; unused entries are zero
    pub sinr: [[f32; 4]; 2],
}

/// Rank indicator and precoder to report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankSelection {
    pub rank: u32,
    pub pmi: u32,
    /// Rank-weighted SINR of the selection
    pub sinr: f32,
    /// SINR of the PDSCH configuration in use, spatial multiplexing only
    pub current_sinr: Option<f32>,
}

fn check_2x2(estimate: &ChannelEstimate) -> Result<(), LayerError> {
    if estimate.nof_ports() == 2 && estimate.nof_rx_antennas() == 2 {
        Ok(())
    } else {
        Err(LayerError::UnsupportedConfiguration(format!(
            "Precoder selection for {} ports and {} RX antennas",
            estimate.nof_ports(),
            estimate.nof_rx_antennas()
        )))
    }
}

/// Channel matrix at one RE as `h[port][rx]`
fn channel_at(estimate: &ChannelEstimate, re: usize) -> [[Complex32; 2]; 2] {
    let ce = &estimate.ce;
    [
        [ce[[0, 0, re]], ce[[0, 1, re]]],
        [ce[[1, 0, re]], ce[[1, 1, re]]],
    ]
}

/// Second port weight of each single-layer codebook entry
fn rank1_weight(pmi: usize) -> Complex32 {
    match pmi {
        0 => Complex32::new(1.0, 0.0),
        1 => Complex32::new(-1.0, 0.0),
        2 => Complex32::new(0.0, 1.0),
        _ => Complex32::new(0.0, -1.0),
    }
}

/// Single layer, maximum ratio combining
fn rank1_sinr(h: &[[Complex32; 2]; 2], pmi: usize, noise: f32) -> f32 {
    let w = rank1_weight(pmi);
    let gain: f32 = (0..2).map(|rx| (h[0][rx] + w * h[1][rx]).norm_sqr()).sum();
    gain / (2.0 * noise)
}

/// Two layers, linear MMSE, mean SINR of both layers
fn rank2_sinr(h: &[[Complex32; 2]; 2], pmi: usize, noise: f32) -> f32 {
    let w = if pmi == 0 {
        Complex32::new(1.0, 0.0)
    } else {
        Complex32::new(0.0, 1.0)
    };
    // W = 1/2 [[1, 1], [w, -w]]
    let heff: [[Complex32; 2]; 2] = [0, 1].map(|rx| {
        [
            (h[0][rx] + w * h[1][rx]) * 0.5,
            (h[0][rx] - w * h[1][rx]) * 0.5,
        ]
    });

    // A = Heff^H Heff / noise + I
    let a00 = 1.0 + (heff[0][0].norm_sqr() + heff[1][0].norm_sqr()) / noise;
    let a11 = 1.0 + (heff[0][1].norm_sqr() + heff[1][1].norm_sqr()) / noise;
    let a01 = (heff[0][0].conj() * heff[0][1] + heff[1][0].conj() * heff[1][1]) / noise;
    let det = a00 * a11 - a01.norm_sqr();

    let sinr0 = det / a11 - 1.0;
    let sinr1 = det / a00 - 1.0;
    (sinr0 + sinr1) / 2.0
}

/// SINR of every codebook entry and the best PMI per rank
pub fn pmi_select(estimate: &ChannelEstimate, nof_re: usize) -> Result<PmiSelection, LayerError> {
    check_2x2(estimate)?;

    let noise = estimate.noise_estimate.max(MIN_NOISE);
    let nof_re = nof_re.min(estimate.nof_re());
    let mut sinr = [[0.0f32; 4]; 2];
    let mut count = 0usize;

    for re in (0..nof_re).step_by(SAMPLE_STRIDE) {
        let h = channel_at(estimate, re);
        for (pmi, acc) in sinr[0].iter_mut().enumerate() {
            *acc += rank1_sinr(&h, pmi, noise);
        }
        for (pmi, acc) in sinr[1].iter_mut().take(NOF_PMI[1]).enumerate() {
            *acc += rank2_sinr(&h, pmi, noise);
        }
        count += 1;
    }

    if count > 0 {
        for value in sinr.iter_mut().flatten() {
            *value /= count as f32;
        }
    }

    let mut pmi = [0u32; 2];
    for layer in 0..2 {
        let mut best = 0;
        for candidate in 1..NOF_PMI[layer] {
            if sinr[layer][candidate] > sinr[layer][best] {
                best = candidate;
            }
        }
        pmi[layer] = best as u32;
    }

    debug!("PMI select: pmi={:?} sinr={:?} over {} REs", pmi, sinr, count);
    Ok(PmiSelection { pmi, sinr })
}

/// Pick the rank with the highest rank-weighted SINR
///
/// Two layers win only when their weighted SINR beats one layer by more than
/// [`RANK_SELECTION_MARGIN`].
pub fn select_rank(selection: &PmiSelection) -> RankSelection {
    let mut best = RankSelection {
        rank: 1,
        pmi: selection.pmi[0],
        sinr: selection.sinr[0][selection.pmi[0] as usize],
        current_sinr: None,
    };

    let layers = 2u32;
    let pmi = selection.pmi[1];
    let weighted = selection.sinr[1][pmi as usize] * layers as f32;
    if weighted > best.sinr + RANK_SELECTION_MARGIN {
        best = RankSelection {
            rank: layers,
            pmi,
            sinr: weighted,
            current_sinr: None,
        };
    }
    best
}

/// Mean condition number of the 2x2 channel, in dB
///
/// Singular REs count as infinitely ill-conditioned; all-zero REs are skipped.
pub fn condition_number(estimate: &ChannelEstimate, nof_re: usize) -> Result<f32, LayerError> {
    check_2x2(estimate)?;

    let nof_re = nof_re.min(estimate.nof_re());
    let mut sum = 0.0f32;
    let mut count = 0usize;

    for re in (0..nof_re).step_by(SAMPLE_STRIDE) {
        let h = channel_at(estimate, re);
        // Eigenvalues of H^H H
        let a = h[0][0].norm_sqr() + h[0][1].norm_sqr();
        let d = h[1][0].norm_sqr() + h[1][1].norm_sqr();
        let b = h[0][0].conj() * h[1][0] + h[0][1].conj() * h[1][1];
        let trace = a + d;
        let det = a * d - b.norm_sqr();
        let disc = (trace * trace - 4.0 * det).max(0.0).sqrt();
        let l_max = (trace + disc) / 2.0;
        let l_min = (trace - disc) / 2.0;

        if l_max <= 0.0 {
            continue;
        }
        sum += if l_min > 0.0 {
            10.0 * (l_max / l_min).log10()
        } else {
            f32::INFINITY
        };
        count += 1;
    }

    Ok(if count > 0 { sum / count as f32 } else { 0.0 })
}

/// Rank from the condition number: one layer above the threshold, else two
pub fn rank_from_condition_number(cn: f32) -> u32 {
    if cn > CONDITION_NUMBER_THRESHOLD {
        1
    } else {
        2
    }
}
