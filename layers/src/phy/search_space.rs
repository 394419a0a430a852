//! PDCCH Search Spaces
//!
//! Candidate PDCCH locations per 3GPP TS 36.213 section 9.1.1. UE-specific
//! candidates depend on the RNTI and the subframe; common candidates only on
//! the size of the control region.

use common::phy::DciLocation;
use common::types::{CellConfig, CyclicPrefix, Rnti, NSUBFRAMES_X_FRAME};
use std::borrow::Cow;
use tracing::debug;

/// Maximum candidates in the UE-specific search space
pub const MAX_CANDIDATES_UE: usize = 16;

/// Maximum candidates in the common search space
pub const MAX_CANDIDATES_COM: usize = 6;

/// Maximum CFI
pub const MAX_CFI: u32 = 3;

/// UE-specific candidates per aggregation level, indexed by log2(L)
const NOF_CANDIDATES_UE: [u32; 4] = [6, 6, 2, 2];

/// Resource element groups per PRB in each control symbol
fn regs_per_prb(symbol: u32, nof_ports: u32) -> u32 {
    match symbol {
        0 => 2,
        1 if nof_ports == 4 => 2,
        _ => 3,
    }
}

/// Number of CCEs available to the PDCCH for a given CFI
///
/// Control region REGs minus the 4 PCFICH REGs and 3 REGs per PHICH group,
/// in units of 9 REGs.
pub fn nof_cce(cell: &CellConfig, cfi: u32) -> u32 {
    let total: u32 = (0..cfi.min(MAX_CFI))
        .map(|symbol| regs_per_prb(symbol, cell.nof_ports) * cell.nof_prb)
        .sum();

    // Extended CP groups are mapped in pairs over the same REGs
    let phich_regs = 3 * cell.phich_resources.ngroups(cell.nof_prb, CyclicPrefix::Normal);

    total.saturating_sub(4 + phich_regs) / 9
}

/// Y_k of the UE-specific search space hash
fn y_k(rnti: Rnti, sf_idx: u32) -> u64 {
    let mut y = rnti.value() as u64;
    for _ in 0..=sf_idx {
        y = (39827 * y) % 65537;
    }
    y
}

/// UE-specific candidates, aggregation level 8 first
pub fn ue_locations(nof_cce: u32, sf_idx: u32, rnti: Rnti) -> Vec<DciLocation> {
    let yk = y_k(rnti, sf_idx);
    let mut locations = Vec::with_capacity(MAX_CANDIDATES_UE);

    for l in (0..4u8).rev() {
        let level = 1u32 << l;
        if nof_cce < level {
            continue;
        }
        let nof_positions = (nof_cce / level) as u64;
        for i in 0..NOF_CANDIDATES_UE[l as usize] as u64 {
            let ncce = level * ((yk + i) % nof_positions) as u32;
            if locations.len() < MAX_CANDIDATES_UE && ncce + level <= nof_cce {
                locations.push(DciLocation::new(ncce, l));
            }
        }
    }

    locations
}

/// Common search space candidates (aggregation levels 8 and 4)
pub fn common_locations(nof_cce: u32) -> Vec<DciLocation> {
    let mut locations = Vec::with_capacity(MAX_CANDIDATES_COM);

    for l in [3u8, 2] {
        let level = 1u32 << l;
        for i in 0..nof_cce.min(16) / level {
            let ncce = level * i;
            if locations.len() < MAX_CANDIDATES_COM && ncce + level <= nof_cce {
                locations.push(DciLocation::new(ncce, l));
            }
        }
    }

    locations
}

/// Search spaces of the configured RNTI for every CFI and subframe
#[derive(Debug, Clone)]
pub struct SearchSpaceCache {
    cell: CellConfig,
    rnti: Option<Rnti>,
    nof_cce: [u32; MAX_CFI as usize],
    ue: Vec<Vec<Vec<DciLocation>>>,
    common: Vec<Vec<DciLocation>>,
}

impl SearchSpaceCache {
    pub fn new(cell: CellConfig) -> Self {
        let nof_cce = [nof_cce(&cell, 1), nof_cce(&cell, 2), nof_cce(&cell, 3)];
        let common = nof_cce.iter().map(|n| common_locations(*n)).collect();

        Self {
            cell,
            rnti: None,
            nof_cce,
            ue: Vec::new(),
            common,
        }
    }

    pub fn cell(&self) -> &CellConfig {
        &self.cell
    }

    /// Rebuild the UE-specific lists for a new RNTI
    pub fn set_rnti(&mut self, rnti: Rnti) {
        self.ue = self
            .nof_cce
            .iter()
            .map(|n| {
                (0..NSUBFRAMES_X_FRAME)
                    .map(|sf_idx| ue_locations(*n, sf_idx, rnti))
                    .collect()
            })
            .collect();
        self.rnti = Some(rnti);

        debug!(
            "Search spaces built for RNTI 0x{:04x}: nof_cce={:?}",
            rnti.value(),
            self.nof_cce
        );
    }

    pub fn rnti(&self) -> Option<Rnti> {
        self.rnti
    }

    /// Index into the per-CFI tables, `None` outside 1..=3
    fn cfi_idx(cfi: u32) -> Option<usize> {
        (1..=MAX_CFI).contains(&cfi).then(|| (cfi - 1) as usize)
    }

    /// CCEs in the control region, `None` unless `cfi` is in 1..=3
    pub fn nof_cce(&self, cfi: u32) -> Option<u32> {
        Self::cfi_idx(cfi).map(|idx| self.nof_cce[idx])
    }

    /// UE-specific candidates for `rnti`, from the cache when it is the configured one
    ///
    /// `None` for a CFI outside 1..=3 or a subframe index past 9.
    pub fn ue(&self, rnti: Rnti, cfi: u32, sf_idx: u32) -> Option<Cow<'_, [DciLocation]>> {
        let cfi_idx = Self::cfi_idx(cfi)?;
        if sf_idx >= NSUBFRAMES_X_FRAME {
            return None;
        }
        if self.rnti == Some(rnti) {
            Some(Cow::Borrowed(&self.ue[cfi_idx][sf_idx as usize]))
        } else {
            Some(Cow::Owned(ue_locations(self.nof_cce[cfi_idx], sf_idx, rnti)))
        }
    }

    /// Common candidates, `None` unless `cfi` is in 1..=3
    pub fn common(&self, cfi: u32) -> Option<&[DciLocation]> {
        Self::cfi_idx(cfi).map(|idx| &self.common[idx][..])
    }
}
