//! Channel processing blocks driven by the downlink subframe processor
//!
//! Each trait is one stage of the per-subframe receive chain. The subframe
//! processor owns boxed implementations and calls them in order; all of them
//! work on the resource-element grid of one subframe, one `Vec` per receive
//! antenna.

use crate::InterfaceError;
use bytes::Bytes;
use common::{ChannelEstimate, DciFormat, DciLocation, DciMessage, PdschConfig, Rnti, SoftBufferRx};
use num_complex::Complex32;

/// Subframe resource grids, indexed by receive antenna
pub type SubframeSymbols = [Vec<Complex32>];

/// Time domain to resource grid
pub trait OfdmDemodulator: Send {
    /// Demodulate one subframe of time samples into `output`
    fn demodulate_subframe(
        &mut self,
        input: &[Complex32],
        output: &mut [Complex32],
    ) -> Result<(), InterfaceError>;
}

/// Reference-signal based channel estimation
pub trait ChannelEstimator: Send {
    fn estimate(
        &mut self,
        symbols: &SubframeSymbols,
        sf_idx: u32,
        estimate: &mut ChannelEstimate,
    ) -> Result<(), InterfaceError>;
}

/// PCFICH decoding
pub trait CfiDecoder: Send {
    /// Returns the CFI and the correlation of the chosen codeword
    fn decode_cfi(
        &mut self,
        symbols: &SubframeSymbols,
        estimate: &ChannelEstimate,
        sf_idx: u32,
    ) -> Result<(u32, f32), InterfaceError>;
}

/// Output of one PDCCH candidate decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedDci {
    pub message: DciMessage,
    /// CRC remainder after descrambling, equal to the RNTI on a match
    pub crc_rem: u16,
}

/// PDCCH demapping and per-candidate decoding
pub trait DciDecoder: Send {
    /// Extract the control-region LLRs for the given CFI
    fn extract_llr(
        &mut self,
        symbols: &SubframeSymbols,
        estimate: &ChannelEstimate,
        sf_idx: u32,
        cfi: u32,
    ) -> Result<(), InterfaceError>;

    /// Decode one candidate under a format hypothesis
    fn decode_at(
        &mut self,
        location: &DciLocation,
        format: DciFormat,
    ) -> Result<DecodedDci, InterfaceError>;
}

/// Result of a PDSCH decode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdschOutput {
    /// Decoded payload per TB, `None` when the CRC failed
    pub data: Vec<Option<Bytes>>,
    /// CRC result per TB
    pub acks: Vec<bool>,
}

/// PDSCH demodulation and channel decoding
pub trait PdschDecoder: Send {
    fn decode(
        &mut self,
        config: &PdschConfig,
        soft_buffers: &mut [SoftBufferRx],
        symbols: &SubframeSymbols,
        estimate: &ChannelEstimate,
        rnti: Rnti,
    ) -> Result<PdschOutput, InterfaceError>;
}

/// PHICH decoding
pub trait PhichDecoder: Send {
    /// Map an uplink allocation to its PHICH group and sequence index
    fn resource(&self, n_prb_lowest: u32, n_dmrs: u32) -> (u32, u32);

    /// Returns the HARQ ACK and the decoding distance
    fn decode(
        &mut self,
        symbols: &SubframeSymbols,
        estimate: &ChannelEstimate,
        ngroup: u32,
        nseq: u32,
        sf_idx: u32,
    ) -> Result<(bool, f32), InterfaceError>;
}
