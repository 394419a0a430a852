//! UE Downlink Subframe Processor
//!
//! Drives one subframe through the receive chain: OFDM demodulation,
//! channel estimation, PCFICH, PDCCH blind search, grant interpretation and
//! PDSCH decoding with HARQ soft combining. PHICH and closed-loop feedback
//! (rank and precoder) are computed on request from the same subframe.

use crate::phy::cfo::CfoCorrector;
use crate::phy::dci_search::DciSearch;
use crate::phy::grant;
use crate::phy::harq::HarqSoftBuffers;
use crate::phy::precoding::{self, RankSelection};
use crate::phy::search_space::MAX_CFI;
use crate::LayerError;
use bytes::Bytes;
use common::phy::{ChannelEstimate, DciMessage, PdschConfig};
use common::types::{CellConfig, MimoType, Rnti, TransmissionMode, MAX_PORTS, NOF_SFN, NSUBFRAMES_X_FRAME};
use common::utils::symbol_size;
use interfaces::ue_phy::{
    CfiDecoder, ChannelEstimator, DciDecoder, OfdmDemodulator, PdschDecoder, PhichDecoder,
};
use num_complex::Complex32;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Channel processing blocks used by the subframe processor
pub struct Collaborators {
    pub fft: Box<dyn OfdmDemodulator>,
    pub chest: Box<dyn ChannelEstimator>,
    pub pcfich: Box<dyn CfiDecoder>,
    pub pdcch: Box<dyn DciDecoder>,
    pub pdsch: Box<dyn PdschDecoder>,
    pub phich: Box<dyn PhichDecoder>,
}

/// Cumulative decoding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UeDlMetrics {
    /// Downlink grants detected and configured
    pub nof_detected: u64,
    /// Transport blocks decoded
    pub pkts_total: u64,
    /// Transport blocks that failed CRC
    pub pkt_errors: u64,
}

/// Outcome of a subframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStatus {
    Success,
    NoMessage,
}

/// Result of [`UeDownlink::process_subframe`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    pub status: DecodeStatus,
    /// Transport block size of the first TB, 0 without a grant
    pub tbs: usize,
    pub acks: Vec<bool>,
    pub data: Vec<Option<Bytes>>,
}

impl DecodeResult {
    fn no_message() -> Self {
        Self {
            status: DecodeStatus::NoMessage,
            tbs: 0,
            acks: Vec::new(),
            data: Vec::new(),
        }
    }
}

/// Downlink receiver for one cell
pub struct UeDownlink {
    cell: CellConfig,
    nof_rx_antennas: usize,
    fft_size: usize,
    blocks: Collaborators,
    search: DciSearch,
    harq: HarqSoftBuffers,
    sf_symbols: Vec<Vec<Complex32>>,
    estimate: ChannelEstimate,
    sfo_corrector: CfoCorrector,
    /// Sampling offset in samples, corrected per OFDM symbol
    sample_offset: f32,
    tm: TransmissionMode,
    current_rnti: Option<Rnti>,
    pdsch_config: Option<PdschConfig>,
    metrics: UeDlMetrics,
}

impl UeDownlink {
    pub fn new(cell: CellConfig, nof_rx_antennas: usize, blocks: Collaborators) -> Result<Self, LayerError> {
        cell.validate()
            .map_err(|e| LayerError::ConfigurationError(e.to_string()))?;
        if nof_rx_antennas == 0 || nof_rx_antennas > MAX_PORTS {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid number of RX antennas {}",
                nof_rx_antennas
            )));
        }
        let fft_size = symbol_size(cell.nof_prb).ok_or_else(|| {
            LayerError::ConfigurationError(format!("No FFT size for {} PRB", cell.nof_prb))
        })?;

        let sf_len_re = cell.sf_len_re();
        info!(
            "UE DL: {} PRB, {} ports, {:?} CP, PCI {}, {} RX antennas",
            cell.nof_prb, cell.nof_ports, cell.cp, cell.id.0, nof_rx_antennas
        );

        Ok(Self {
            cell,
            nof_rx_antennas,
            fft_size,
            blocks,
            search: DciSearch::new(cell),
            harq: HarqSoftBuffers::new(),
            sf_symbols: vec![vec![Complex32::new(0.0, 0.0); sf_len_re]; nof_rx_antennas],
            estimate: ChannelEstimate::new(&cell, nof_rx_antennas),
            sfo_corrector: CfoCorrector::new(cell.symbol_len_re()),
            sample_offset: 0.0,
            tm: TransmissionMode::Tm1,
            current_rnti: None,
            pdsch_config: None,
            metrics: UeDlMetrics::default(),
        })
    }

    pub fn cell(&self) -> &CellConfig {
        &self.cell
    }

    /// Precompute the search spaces of the RNTI decoded every subframe
    pub fn set_rnti(&mut self, rnti: Rnti) -> Result<(), LayerError> {
        if !rnti.is_valid() {
            return Err(LayerError::ConfigurationError("RNTI not specified".to_string()));
        }
        self.search.set_rnti(rnti);
        self.current_rnti = Some(rnti);
        info!("UE DL RNTI set to 0x{:04x}", rnti.value());
        Ok(())
    }

    pub fn rnti(&self) -> Option<Rnti> {
        self.current_rnti
    }

    pub fn set_transmission_mode(&mut self, tm: TransmissionMode) {
        if self.tm != tm {
            info!("Transmission mode changed {:?} -> {:?}", self.tm, tm);
        }
        self.tm = tm;
    }

    pub fn transmission_mode(&self) -> TransmissionMode {
        self.tm
    }

    /// Sampling offset to remove from every OFDM symbol, in samples
    pub fn set_sample_offset(&mut self, sample_offset: f32) {
        self.sample_offset = sample_offset;
    }

    /// Demodulate every antenna, then estimate the channel and decode the CFI
    pub fn decode_fft_estimate(&mut self, inputs: &[&[Complex32]], sf_idx: u32) -> Result<u32, LayerError> {
        if inputs.len() < self.nof_rx_antennas {
            return Err(LayerError::ConfigurationError(format!(
                "Expected {} input buffers, got {}",
                self.nof_rx_antennas,
                inputs.len()
            )));
        }

        for (input, symbols) in inputs.iter().zip(self.sf_symbols.iter_mut()) {
            self.blocks.fft.demodulate_subframe(input, symbols)?;
        }

        if self.sample_offset != 0.0 {
            let freq = self.sample_offset / self.fft_size as f32;
            let symbol_len = self.cell.symbol_len_re();
            let nof_symbols = 2 * self.cell.cp.symbols_per_slot();
            for symbols in self.sf_symbols.iter_mut() {
                for symbol in symbols.chunks_mut(symbol_len).take(nof_symbols) {
                    self.sfo_corrector.correct_in_place(symbol, freq);
                }
            }
        }

        self.decode_estimate(sf_idx)
    }

    /// Channel estimation and CFI on already demodulated symbols
    pub fn decode_estimate(&mut self, sf_idx: u32) -> Result<u32, LayerError> {
        if sf_idx >= NSUBFRAMES_X_FRAME {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid subframe index {}",
                sf_idx
            )));
        }

        self.blocks
            .chest
            .estimate(&self.sf_symbols, sf_idx, &mut self.estimate)?;

        let (cfi, corr) = self
            .blocks
            .pcfich
            .decode_cfi(&self.sf_symbols, &self.estimate, sf_idx)
            .map_err(|e| {
                warn!("Error decoding PCFICH: {}", e);
                LayerError::DecodeFailure(format!("PCFICH: {}", e))
            })?;

        if !(1..=MAX_CFI).contains(&cfi) {
            return Err(LayerError::DecodeFailure(format!("Invalid CFI {}", cfi)));
        }

        debug!("Decoded CFI={} with correlation {:.2}, sf_idx={}", cfi, corr, sf_idx);
        Ok(cfi)
    }

    pub fn find_dl_dci(&mut self, cfi: u32, sf_idx: u32, rnti: Rnti) -> Result<Option<DciMessage>, LayerError> {
        self.search
            .find_dl_dci(self.blocks.pdcch.as_mut(), self.tm, cfi, sf_idx, rnti)
    }

    pub fn find_ul_dci(&mut self, cfi: u32, sf_idx: u32, rnti: Rnti) -> Result<Option<DciMessage>, LayerError> {
        self.search
            .find_ul_dci(self.blocks.pdcch.as_mut(), cfi, sf_idx, rnti)
    }

    /// First CCE of the last downlink DCI
    pub fn ncce(&self) -> u32 {
        self.search.state().last_location().ncce
    }

    /// Decode one subframe for `rnti` at absolute time `frame`/`subframe`
    pub fn process_subframe(
        &mut self,
        frame: u32,
        subframe: u32,
        inputs: &[&[Complex32]],
        rnti: Rnti,
    ) -> Result<DecodeResult, LayerError> {
        if subframe >= NSUBFRAMES_X_FRAME {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid subframe index {}",
                subframe
            )));
        }
        // Frame counter is absolute; the TTI only needs the SFN
        let tti = (frame % NOF_SFN) * NSUBFRAMES_X_FRAME + subframe;
        let sf_idx = tti % NSUBFRAMES_X_FRAME;

        let cfi = self.decode_fft_estimate(inputs, sf_idx)?;

        self.blocks
            .pdcch
            .extract_llr(&self.sf_symbols, &self.estimate, sf_idx, cfi)
            .map_err(|e| {
                warn!("Error extracting PDCCH LLRs: {}", e);
                LayerError::DecodeFailure(format!("PDCCH LLR extraction: {}", e))
            })?;

        let Some(dci) = self.find_dl_dci(cfi, sf_idx, rnti)? else {
            return Ok(DecodeResult::no_message());
        };

        let config = grant::resolve(&dci, tti, cfi, &self.cell, &mut self.harq)?;
        self.pdsch_config = Some(config);
        self.metrics.nof_detected += 1;

        let nof_tb = config.grant.nof_tb;
        let output = match self.blocks.pdsch.decode(
            &config,
            self.harq.buffers_mut(),
            &self.sf_symbols,
            &self.estimate,
            rnti,
        ) {
            Ok(output) => output,
            Err(e) => {
                warn!("Error decoding PDSCH: {}", e);
                self.count_tbs(&vec![false; nof_tb]);
                return Err(LayerError::DecodeFailure(format!("PDSCH: {}", e)));
            }
        };

        let acks: Vec<bool> = (0..nof_tb)
            .map(|tb| output.acks.get(tb).copied().unwrap_or(false))
            .collect();
        self.count_tbs(&acks);

        let mut data = output.data;
        data.resize(nof_tb, None);

        info!(
            "Decoded PDSCH tti={} rnti=0x{:04x} tbs={} acks={:?}",
            tti,
            rnti.value(),
            config.grant.mcs[0].tbs,
            acks
        );

        Ok(DecodeResult {
            status: DecodeStatus::Success,
            tbs: config.grant.mcs[0].tbs,
            acks,
            data,
        })
    }

    fn count_tbs(&mut self, acks: &[bool]) {
        for ack in acks {
            self.metrics.pkts_total += 1;
            if !ack {
                self.metrics.pkt_errors += 1;
            }
        }
    }

    /// HARQ ACK on the PHICH for an uplink transmission
    pub fn decode_phich(&mut self, sf_idx: u32, n_prb_lowest: u32, n_dmrs: u32) -> Result<bool, LayerError> {
        let (ngroup, nseq) = self.blocks.phich.resource(n_prb_lowest, n_dmrs);
        debug!(
            "Decoding PHICH sf_idx={} n_prb_lowest={} n_dmrs={} ngroup={} nseq={}",
            sf_idx, n_prb_lowest, n_dmrs, ngroup, nseq
        );

        let (ack, distance) = self
            .blocks
            .phich
            .decode(&self.sf_symbols[..1], &self.estimate, ngroup, nseq, sf_idx)
            .map_err(|e| {
                warn!("Error decoding PHICH: {}", e);
                LayerError::DecodeFailure(format!("PHICH: {}", e))
            })?;

        debug!("PHICH ack={} distance={:.2}", ack, distance);
        Ok(ack)
    }

    /// Rank and precoder to report, `None` without two ports and two antennas
    pub fn ri_pmi_select(&self) -> Result<Option<RankSelection>, LayerError> {
        if self.cell.nof_ports < 2 || self.nof_rx_antennas < 2 {
            return Ok(None);
        }

        let nof_re = self.cell.sf_len_re();
        let selection = precoding::pmi_select(&self.estimate, nof_re)?;
        let mut rank = precoding::select_rank(&selection);

        rank.current_sinr = self.pdsch_config.and_then(|config| {
            if config.mimo_type != MimoType::SpatialMultiplex {
                return None;
            }
            let idx = config.codebook_idx as usize;
            match config.nof_layers {
                1 => selection.sinr[0].get(idx).copied(),
                2 => idx.checked_sub(1).and_then(|i| selection.sinr[1].get(i).copied()),
                _ => None,
            }
        });

        debug!(
            "RI/PMI select: rank={} pmi={} sinr={:.2} current={:?}",
            rank.rank, rank.pmi, rank.sinr, rank.current_sinr
        );
        Ok(Some(rank))
    }

    /// Rank from the channel condition number, returns (rank, condition number dB)
    pub fn ri_select(&self) -> Result<(u32, f32), LayerError> {
        let cn = precoding::condition_number(&self.estimate, self.cell.sf_len_re())?;
        Ok((precoding::rank_from_condition_number(cn), cn))
    }

    /// Clear HARQ soft buffers and the last PDSCH configuration
    pub fn reset(&mut self) {
        self.harq.reset_all();
        self.search.clear_pending();
        self.pdsch_config = None;
        info!("UE DL HARQ state reset");
    }

    pub fn metrics(&self) -> UeDlMetrics {
        self.metrics
    }

    /// PDSCH configuration of the last grant
    pub fn current_config(&self) -> Option<&PdschConfig> {
        self.pdsch_config.as_ref()
    }

    pub fn harq(&self) -> &HarqSoftBuffers {
        &self.harq
    }

    /// Demodulated resource grids of the last subframe
    pub fn symbols(&self) -> &[Vec<Complex32>] {
        &self.sf_symbols
    }

    pub fn channel_estimate(&self) -> &ChannelEstimate {
        &self.estimate
    }
}
