//! Downlink PHY data model
//!
//! Types exchanged between the subframe processor and the channel
//! decoders: PDCCH candidates, unpacked DCIs, grants and channel estimates.

use crate::types::{CellConfig, DciFormat, MimoType, ModulationScheme, MAX_TB};
use ndarray::Array3;
use num_complex::Complex32;

/// A PDCCH candidate: first CCE and aggregation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DciLocation {
    /// First CCE index
    pub ncce: u32,
    /// log2 of the aggregation level (0..=3)
    pub l: u8,
}

impl DciLocation {
    pub fn new(ncce: u32, l: u8) -> Self {
        Self { ncce, l }
    }

    /// Aggregation level in CCEs (1, 2, 4 or 8)
    pub fn aggregation_level(&self) -> u32 {
        1 << self.l
    }
}

/// Modulation and coding of one transport block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mcs {
    /// MCS index
    pub idx: u8,
    /// Transport block size in bits
    pub tbs: usize,
}

impl Mcs {
    pub fn modulation(&self) -> Option<ModulationScheme> {
        ModulationScheme::from_mcs_index(self.idx)
    }
}

/// DCI fields after bit-level unpacking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DciFields {
    /// HARQ process number
    pub harq_process: u8,
    /// Redundancy version of TB 0, `None` when the format does not signal it
    pub rv_idx: Option<u8>,
    /// Redundancy version of TB 1
    pub rv_idx_1: u8,
    /// New data indicators
    pub ndi: [bool; MAX_TB],
    /// Transport blocks enabled by this DCI
    pub tb_enabled: [bool; MAX_TB],
    /// Per-TB modulation and coding
    pub mcs: [Mcs; MAX_TB],
    /// Precoding information field
    pub pinfo: u8,
    /// Allocated PRBs
    pub nof_prb: u32,
    /// Lowest allocated PRB (uplink grants, PHICH resource)
    pub n_prb_lowest: u32,
    /// Cyclic shift for DMRS (uplink grants, PHICH resource)
    pub n_dmrs: u32,
}

/// A decoded control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciMessage {
    /// Format the payload decoded as; may differ from the searched hypothesis
    pub format: DciFormat,
    pub fields: DciFields,
}

/// Downlink grant derived from a DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlGrant {
    /// Number of transport blocks (1 or 2)
    pub nof_tb: usize,
    pub mcs: [Mcs; MAX_TB],
    pub pinfo: u8,
    pub nof_prb: u32,
}

impl DlGrant {
    /// Collect the enabled transport blocks of a DCI, TB 0 first
    pub fn from_fields(fields: &DciFields) -> Self {
        let mut mcs = [Mcs::default(); MAX_TB];
        let mut nof_tb = 0;
        for (tb, enabled) in fields.tb_enabled.iter().enumerate() {
            if *enabled {
                mcs[nof_tb] = fields.mcs[tb];
                nof_tb += 1;
            }
        }
        Self {
            nof_tb,
            mcs,
            pinfo: fields.pinfo,
            nof_prb: fields.nof_prb,
        }
    }
}

/// Fully resolved PDSCH configuration for one subframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdschConfig {
    pub grant: DlGrant,
    pub cfi: u32,
    pub sf_idx: u32,
    pub rv: [u8; MAX_TB],
    pub mimo_type: MimoType,
    /// Codebook index (PMI, plus one for two-layer transmission)
    pub codebook_idx: u32,
    pub nof_layers: u32,
}

/// Channel estimates of one subframe
#[derive(Debug, Clone)]
pub struct ChannelEstimate {
    /// Indexed by [tx port, rx antenna, resource element]
    pub ce: Array3<Complex32>,
    /// Noise variance estimate
    pub noise_estimate: f32,
}

impl ChannelEstimate {
    pub fn new(cell: &CellConfig, nof_rx_antennas: usize) -> Self {
        Self {
            ce: Array3::zeros((cell.nof_ports as usize, nof_rx_antennas, cell.sf_len_re())),
            noise_estimate: 0.0,
        }
    }

    pub fn nof_ports(&self) -> usize {
        self.ce.dim().0
    }

    pub fn nof_rx_antennas(&self) -> usize {
        self.ce.dim().1
    }

    pub fn nof_re(&self) -> usize {
        self.ce.dim().2
    }
}
