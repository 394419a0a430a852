//! Physical Layer (PHY) Submodules
//!
//! This module contains the LTE UE downlink receive chain according to
//! 3GPP TS 36.211 and TS 36.213: cell search, PDCCH blind search, grant
//! interpretation, HARQ soft buffers and closed-loop feedback.

pub mod cfo;
pub mod dci_search;
pub mod grant;
pub mod harq;
pub mod precoding;
pub mod pss;
pub mod search_space;
pub mod sss;
pub mod sync;
pub mod ue_dl;

// Re-export commonly used types
pub use dci_search::{DciSearch, PendingUlGrant};
pub use harq::HarqSoftBuffers;
pub use precoding::RankSelection;
pub use search_space::SearchSpaceCache;
pub use sss::SssAlgorithm;
pub use sync::{CellSynchronizer, StepOutcome, SyncConfig, SyncFindResult};
pub use ue_dl::{Collaborators, DecodeResult, DecodeStatus, UeDlMetrics, UeDownlink};

use crate::LayerError;
use common::types::{CyclicPrefix, Pci, Rnti};
use num_complex::Complex32;
use serde::Serialize;
use tracing::info;

/// Result of one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AcquisitionResult {
    pub detected: bool,
    /// Sample just past the PSS, relative to the search offset
    pub peak_position: usize,
    /// Peak-to-average ratio of the PSS correlation
    pub peak_value: f32,
    /// Full identity, present once the SSS resolved N_id_1
    pub cell_id: Option<Pci>,
    /// Subframe the PSS belongs to (0 or 5), present with `cell_id`
    pub sf_idx: Option<u32>,
    /// Smoothed CFO in subcarrier spacings
    pub cfo: f32,
    pub cp: CyclicPrefix,
    pub cfo_step: StepOutcome,
    pub cp_step: StepOutcome,
    pub sss_step: StepOutcome,
}

/// Cell acquisition followed by downlink decoding of one cell
pub struct UeReceiver {
    sync: CellSynchronizer,
    downlink: UeDownlink,
}

impl UeReceiver {
    pub fn new(sync: CellSynchronizer, downlink: UeDownlink) -> Self {
        Self { sync, downlink }
    }

    /// Look for the configured PSS in `samples` starting at `offset`
    pub fn acquire(&mut self, samples: &[Complex32], offset: usize) -> Result<AcquisitionResult, LayerError> {
        let found = self.sync.find(samples, offset)?;
        let cell_id = if found.sss == StepOutcome::Completed {
            self.sync.cell_id()
        } else {
            None
        };

        if let Some(pci) = cell_id {
            info!(
                "Acquired PCI {} at {} sf_idx={} cfo={:.4} cp={:?}",
                pci.0,
                found.peak_position,
                self.sync.sf_idx(),
                self.sync.cfo(),
                self.sync.cp()
            );
        }

        Ok(AcquisitionResult {
            detected: found.detected,
            peak_position: found.peak_position,
            peak_value: found.peak_value,
            cell_id,
            sf_idx: cell_id.map(|_| self.sync.sf_idx()),
            cfo: self.sync.cfo(),
            cp: self.sync.cp(),
            cfo_step: found.cfo,
            cp_step: found.cp,
            sss_step: found.sss,
        })
    }

    /// RNTI whose search spaces are precomputed
    pub fn set_target_identity(&mut self, rnti: Rnti) -> Result<(), LayerError> {
        self.downlink.set_rnti(rnti)
    }

    pub fn process_subframe(
        &mut self,
        frame: u32,
        subframe: u32,
        samples: &[&[Complex32]],
        rnti: Rnti,
    ) -> Result<DecodeResult, LayerError> {
        self.downlink.process_subframe(frame, subframe, samples, rnti)
    }

    /// Rank and precoder feedback from the last subframe
    pub fn select_rank_and_precoder(&self) -> Result<Option<RankSelection>, LayerError> {
        self.downlink.ri_pmi_select()
    }

    pub fn reset_harq_state(&mut self) {
        self.downlink.reset();
    }

    pub fn reset_sync_state(&mut self) {
        self.sync.reset();
    }

    pub fn synchronizer(&mut self) -> &mut CellSynchronizer {
        &mut self.sync
    }

    pub fn downlink(&mut self) -> &mut UeDownlink {
        &mut self.downlink
    }

    pub fn metrics(&self) -> UeDlMetrics {
        self.downlink.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::search_space::ue_locations;
    use crate::phy::sync::tests::{synth, FFT};
    use crate::phy::ue_dl::tests::{cell_2ports, collaborators, format1_message, Probes};
    use common::types::DciFormat;
    use std::sync::atomic::Ordering;

    fn receiver(probes: &Probes) -> UeReceiver {
        let rnti = Rnti(0x46);
        let target = ue_locations(25, 0, rnti)[4];
        let hit = Some((target, DciFormat::Format1, format1_message(1000), 0x46));
        let downlink = UeDownlink::new(cell_2ports(), 2, collaborators(2, hit, probes)).unwrap();
        let mut sync = CellSynchronizer::new(9600, FFT).unwrap();
        sync.set_n_id_2(2).unwrap();
        UeReceiver::new(sync, downlink)
    }

    #[test]
    fn test_acquire_reports_identity() {
        let probes = Probes::default();
        let mut rx = receiver(&probes);
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.0);

        let result = rx.acquire(&samples, 0).unwrap();
        assert!(result.detected);
        assert_eq!(result.cell_id, Some(Pci(137)));
        assert_eq!(result.sf_idx, Some(0));
        assert_eq!(result.cp, CyclicPrefix::Normal);
        assert_eq!(result.cfo_step, StepOutcome::Completed);
        assert_eq!(result.cp_step, StepOutcome::Completed);
        assert_eq!(result.sss_step, StepOutcome::Completed);
        assert_eq!(result.cfo, rx.synchronizer().cfo());
    }

    #[test]
    fn test_acquire_below_threshold() {
        let probes = Probes::default();
        let mut rx = receiver(&probes);
        rx.synchronizer().set_threshold(1e6);
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.0);

        let result = rx.acquire(&samples, 0).unwrap();
        assert!(!result.detected);
        assert_eq!(result.cell_id, None);
        assert_eq!(result.cfo_step, StepOutcome::NotAttempted);
        assert_eq!(result.cp_step, StepOutcome::NotAttempted);
        assert_eq!(result.sss_step, StepOutcome::NotAttempted);
    }

    #[test]
    fn test_acquire_without_sss() {
        let probes = Probes::default();
        let mut rx = receiver(&probes);
        rx.synchronizer().sss_enable(false);
        let samples = synth(45, 2, 0, 9, 1000, 9600, 0.0);

        let result = rx.acquire(&samples, 0).unwrap();
        assert!(result.detected);
        assert_eq!(result.cell_id, None);
        assert_eq!(result.sf_idx, None);
        assert_eq!(result.sss_step, StepOutcome::Disabled);
    }

    #[test]
    fn test_process_and_reset() {
        let probes = Probes::default();
        let mut rx = receiver(&probes);
        rx.set_target_identity(Rnti(0x46)).unwrap();
        assert!(rx.set_target_identity(Rnti(0)).is_err());

        let input = vec![Complex32::new(1.0, 0.0); cell_2ports().sf_len_re()];
        let result = rx.process_subframe(10, 0, &[&input, &input], Rnti(0x46)).unwrap();
        assert_eq!(result.status, DecodeStatus::Success);
        assert_eq!(rx.metrics().nof_detected, 1);
        assert_eq!(probes.pdsch_calls.load(Ordering::SeqCst), 1);

        let selection = rx.select_rank_and_precoder().unwrap().unwrap();
        assert!(selection.rank == 1 || selection.rank == 2);

        rx.reset_harq_state();
        assert!(rx.downlink().current_config().is_none());
        rx.reset_sync_state();
    }
}
