//! PDCCH Blind Search
//!
//! Trial-decodes the candidates of a search space until one carries a CRC
//! scrambled with the wanted RNTI. Format 0 and Format 1A share a payload
//! size, so an uplink grant may turn up while looking for a downlink one; it
//! is kept aside for the next uplink lookup.

use crate::phy::search_space::{SearchSpaceCache, MAX_CFI};
use crate::LayerError;
use common::phy::{DciLocation, DciMessage};
use common::types::{CellConfig, DciFormat, Rnti, TransmissionMode, NSUBFRAMES_X_FRAME};
use interfaces::ue_phy::DciDecoder;
use tracing::{debug, info, warn};

/// Formats tried in the common search space for SI, P and RA-RNTI
pub const COMMON_FORMATS: [DciFormat; 2] = [DciFormat::Format1A, DciFormat::Format1C];

/// UE-specific formats per transmission mode (TM1..TM8)
pub const UE_DCI_FORMATS: [[DciFormat; 2]; 8] = [
    [DciFormat::Format1A, DciFormat::Format1],
    [DciFormat::Format1A, DciFormat::Format1],
    [DciFormat::Format1A, DciFormat::Format2A],
    [DciFormat::Format1A, DciFormat::Format2],
    [DciFormat::Format1A, DciFormat::Format1D],
    [DciFormat::Format1A, DciFormat::Format1B],
    [DciFormat::Format1A, DciFormat::Format1],
    [DciFormat::Format1A, DciFormat::Format2B],
];

/// Uplink grant found while searching for a downlink one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUlGrant {
    pub rnti: Rnti,
    pub message: DciMessage,
    pub location: DciLocation,
}

/// State carried between searches
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pending_ul: Option<PendingUlGrant>,
    last_location: DciLocation,
    last_location_ul: DciLocation,
}

impl SearchState {
    pub fn pending_ul(&self) -> Option<&PendingUlGrant> {
        self.pending_ul.as_ref()
    }

    /// Location of the last downlink DCI found
    pub fn last_location(&self) -> DciLocation {
        self.last_location
    }

    /// Location of the last uplink DCI found
    pub fn last_location_ul(&self) -> DciLocation {
        self.last_location_ul
    }
}

/// Search `locations` in order for a `format` DCI addressed to `rnti`
///
/// Stops at the first match. A Format 0 match during a Format 1A search is
/// parked as the pending uplink grant (unless one is already pending) and the
/// search goes on. A decoder error aborts the whole search.
pub fn blind_search(
    decoder: &mut dyn DciDecoder,
    locations: &[DciLocation],
    format: DciFormat,
    rnti: Rnti,
    state: &mut SearchState,
) -> Result<Option<DciMessage>, LayerError> {
    if !rnti.is_valid() {
        return Err(LayerError::ConfigurationError("RNTI not specified".to_string()));
    }

    for (i, location) in locations.iter().enumerate() {
        debug!(
            "Searching format {} in {},{} ({}/{})",
            format,
            location.ncce,
            location.l,
            i,
            locations.len()
        );

        let decoded = decoder.decode_at(location, format).map_err(|e| {
            warn!("Error decoding DCI at ncce={} L={}: {}", location.ncce, location.l, e);
            LayerError::DecodeFailure(format!("DCI decode at ncce={}: {}", location.ncce, e))
        })?;

        if decoded.crc_rem != rnti.value() {
            continue;
        }

        let message = decoded.message;
        if message.format == DciFormat::Format0 && format == DciFormat::Format1A {
            if state.pending_ul.is_none() {
                debug!("Format 0 for RNTI 0x{:04x} kept for the next UL lookup", rnti.value());
                state.pending_ul = Some(PendingUlGrant {
                    rnti,
                    message,
                    location: *location,
                });
                state.last_location_ul = *location;
            }
        } else if message.format == format {
            if format == DciFormat::Format0 {
                state.last_location_ul = *location;
            } else {
                state.last_location = *location;
            }
            return Ok(Some(message));
        }
    }

    Ok(None)
}

/// Downlink and uplink DCI lookup over the cached search spaces
#[derive(Debug, Clone)]
pub struct DciSearch {
    search_space: SearchSpaceCache,
    state: SearchState,
}

impl DciSearch {
    pub fn new(cell: CellConfig) -> Self {
        Self {
            search_space: SearchSpaceCache::new(cell),
            state: SearchState::default(),
        }
    }

    /// Build the search spaces of the RNTI that is searched every subframe
    pub fn set_rnti(&mut self, rnti: Rnti) {
        self.search_space.set_rnti(rnti);
    }

    pub fn search_space(&self) -> &SearchSpaceCache {
        &self.search_space
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Error for a lookup outside the cached tables
    fn missing_space(cfi: u32, sf_idx: u32) -> LayerError {
        LayerError::ConfigurationError(format!("No search space for cfi={} sf_idx={}", cfi, sf_idx))
    }

    fn check_params(cfi: u32, sf_idx: u32) -> Result<(), LayerError> {
        if !(1..=MAX_CFI).contains(&cfi) {
            return Err(LayerError::ConfigurationError(format!(
                "CFI must be 1 <= cfi <= 3, got {}",
                cfi
            )));
        }
        if sf_idx >= NSUBFRAMES_X_FRAME {
            return Err(LayerError::ConfigurationError(format!(
                "Invalid subframe index {}",
                sf_idx
            )));
        }
        Ok(())
    }

    /// Find the downlink DCI for `rnti`
    pub fn find_dl_dci(
        &mut self,
        decoder: &mut dyn DciDecoder,
        tm: TransmissionMode,
        cfi: u32,
        sf_idx: u32,
        rnti: Rnti,
    ) -> Result<Option<DciMessage>, LayerError> {
        Self::check_params(cfi, sf_idx)?;
        if !rnti.is_valid() {
            return Err(LayerError::ConfigurationError("RNTI not specified".to_string()));
        }

        if rnti.rnti_type().is_common() {
            return self.find_dl_dci_common(decoder, cfi, rnti);
        }

        let locations = self
            .search_space
            .ue(rnti, cfi, sf_idx)
            .ok_or_else(|| Self::missing_space(cfi, sf_idx))?;
        for format in UE_DCI_FORMATS[tm.index()] {
            info!(
                "Searching DL C-RNTI {} in {} ue locations",
                format,
                locations.len()
            );
            if let Some(message) = blind_search(decoder, &locations, format, rnti, &mut self.state)? {
                return Ok(Some(message));
            }
        }

        let common = self
            .search_space
            .common(cfi)
            .ok_or_else(|| Self::missing_space(cfi, sf_idx))?;
        if common.is_empty() {
            return Ok(None);
        }
        info!("Searching DL C-RNTI in {} common locations, format 1A", common.len());
        blind_search(decoder, common, DciFormat::Format1A, rnti, &mut self.state)
    }

    /// SI, P and RA-RNTI are only scheduled in the common search space
    fn find_dl_dci_common(
        &mut self,
        decoder: &mut dyn DciDecoder,
        cfi: u32,
        rnti: Rnti,
    ) -> Result<Option<DciMessage>, LayerError> {
        let common = self
            .search_space
            .common(cfi)
            .ok_or_else(|| Self::missing_space(cfi, 0))?;
        info!(
            "Searching SI/P/RA-RNTI in {} common locations, {} formats",
            common.len(),
            COMMON_FORMATS.len()
        );

        for format in COMMON_FORMATS {
            if let Some(message) = blind_search(decoder, common, format, rnti, &mut self.state)? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Find the uplink DCI for `rnti`, consuming a pending one first
    pub fn find_ul_dci(
        &mut self,
        decoder: &mut dyn DciDecoder,
        cfi: u32,
        sf_idx: u32,
        rnti: Rnti,
    ) -> Result<Option<DciMessage>, LayerError> {
        Self::check_params(cfi, sf_idx)?;
        if !rnti.is_valid() {
            return Err(LayerError::ConfigurationError("RNTI not specified".to_string()));
        }

        if self.state.pending_ul.map_or(false, |p| p.rnti == rnti) {
            if let Some(pending) = self.state.pending_ul.take() {
                debug!("Using pending UL DCI for RNTI 0x{:04x}", rnti.value());
                return Ok(Some(pending.message));
            }
        }

        let locations = self
            .search_space
            .ue(rnti, cfi, sf_idx)
            .ok_or_else(|| Self::missing_space(cfi, sf_idx))?;
        info!("Searching UL C-RNTI in {} ue locations", locations.len());
        blind_search(decoder, &locations, DciFormat::Format0, rnti, &mut self.state)
    }

    /// Drop any pending uplink grant
    pub fn clear_pending(&mut self) {
        self.state.pending_ul = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::phy::DciFields;
    use common::types::{CyclicPrefix, Pci, PhichLength, PhichResources};
    use interfaces::ue_phy::{DecodedDci, SubframeSymbols};
    use interfaces::InterfaceError;
    use common::phy::ChannelEstimate;
    use std::collections::HashMap;

    /// Decoder answering from a table keyed by location and format
    #[derive(Default)]
    struct TableDecoder {
        answers: HashMap<(DciLocation, DciFormat), (DciFormat, u16)>,
        calls: Vec<(DciLocation, DciFormat)>,
        fail_at: Option<usize>,
    }

    impl TableDecoder {
        fn answer(mut self, location: DciLocation, searched: DciFormat, found: DciFormat, crc: u16) -> Self {
            self.answers.insert((location, searched), (found, crc));
            self
        }
    }

    impl DciDecoder for TableDecoder {
        fn extract_llr(
            &mut self,
            _symbols: &SubframeSymbols,
            _estimate: &ChannelEstimate,
            _sf_idx: u32,
            _cfi: u32,
        ) -> Result<(), InterfaceError> {
            Ok(())
        }

        fn decode_at(&mut self, location: &DciLocation, format: DciFormat) -> Result<DecodedDci, InterfaceError> {
            if self.fail_at == Some(self.calls.len()) {
                return Err(InterfaceError::DecodeFailed("viterbi".to_string()));
            }
            self.calls.push((*location, format));
            let (found, crc_rem) = self
                .answers
                .get(&(*location, format))
                .copied()
                .unwrap_or((format, 0xdead));
            Ok(DecodedDci {
                message: DciMessage {
                    format: found,
                    fields: DciFields::default(),
                },
                crc_rem,
            })
        }
    }

    fn cell() -> CellConfig {
        CellConfig {
            nof_prb: 50,
            nof_ports: 2,
            cp: CyclicPrefix::Normal,
            id: Pci(1),
            phich_resources: PhichResources::One,
            phich_length: PhichLength::Normal,
        }
    }

    fn loc(ncce: u32, l: u8) -> DciLocation {
        DciLocation::new(ncce, l)
    }

    #[test]
    fn test_search_stops_at_first_match() {
        let locations: Vec<DciLocation> = (0..10).map(|i| loc(i, 0)).collect();
        let mut decoder = TableDecoder::default()
            .answer(loc(3, 0), DciFormat::Format1A, DciFormat::Format1A, 0x1234)
            .answer(loc(6, 0), DciFormat::Format1A, DciFormat::Format1A, 0x1234);
        let mut state = SearchState::default();

        let found = blind_search(&mut decoder, &locations, DciFormat::Format1A, Rnti(0x1234), &mut state).unwrap();
        assert!(found.is_some());
        assert_eq!(decoder.calls.len(), 4);
        assert_eq!(state.last_location(), loc(3, 0));
    }

    #[test]
    fn test_search_no_match() {
        let locations: Vec<DciLocation> = (0..6).map(|i| loc(i, 0)).collect();
        let mut decoder = TableDecoder::default().answer(loc(2, 0), DciFormat::Format1A, DciFormat::Format1A, 0x9999);
        let mut state = SearchState::default();

        let found = blind_search(&mut decoder, &locations, DciFormat::Format1A, Rnti(0x1234), &mut state).unwrap();
        assert!(found.is_none());
        assert_eq!(decoder.calls.len(), 6);
    }

    #[test]
    fn test_search_decoder_error_aborts() {
        let locations: Vec<DciLocation> = (0..6).map(|i| loc(i, 0)).collect();
        let mut decoder = TableDecoder {
            fail_at: Some(2),
            ..Default::default()
        };
        let mut state = SearchState::default();

        let result = blind_search(&mut decoder, &locations, DciFormat::Format1A, Rnti(0x1234), &mut state);
        assert!(matches!(result, Err(LayerError::DecodeFailure(_))));
        assert_eq!(decoder.calls.len(), 2);
    }

    #[test]
    fn test_search_rejects_rnti_zero() {
        let mut decoder = TableDecoder::default();
        let mut state = SearchState::default();
        let result = blind_search(&mut decoder, &[loc(0, 0)], DciFormat::Format1A, Rnti(0), &mut state);
        assert!(matches!(result, Err(LayerError::ConfigurationError(_))));
        assert!(decoder.calls.is_empty());
    }

    #[test]
    fn test_format0_parked_during_1a_search() {
        let locations: Vec<DciLocation> = (0..8).map(|i| loc(i, 0)).collect();
        let mut decoder = TableDecoder::default()
            .answer(loc(1, 0), DciFormat::Format1A, DciFormat::Format0, 0x1234)
            .answer(loc(2, 0), DciFormat::Format1A, DciFormat::Format0, 0x1234)
            .answer(loc(5, 0), DciFormat::Format1A, DciFormat::Format1A, 0x1234);
        let mut state = SearchState::default();

        let found = blind_search(&mut decoder, &locations, DciFormat::Format1A, Rnti(0x1234), &mut state).unwrap();
        assert_eq!(found.map(|m| m.format), Some(DciFormat::Format1A));
        assert_eq!(decoder.calls.len(), 6);

        // Only the first incidental match is kept
        let pending = state.pending_ul().unwrap();
        assert_eq!(pending.location, loc(1, 0));
        assert_eq!(pending.rnti, Rnti(0x1234));
    }

    #[test]
    fn test_pending_not_overwritten_by_other_rnti() {
        let locations = vec![loc(0, 0), loc(1, 0)];
        let mut state = SearchState::default();

        let mut decoder = TableDecoder::default().answer(loc(0, 0), DciFormat::Format1A, DciFormat::Format0, 0x1111);
        blind_search(&mut decoder, &locations, DciFormat::Format1A, Rnti(0x1111), &mut state).unwrap();

        let mut decoder = TableDecoder::default().answer(loc(1, 0), DciFormat::Format1A, DciFormat::Format0, 0x2222);
        blind_search(&mut decoder, &locations, DciFormat::Format1A, Rnti(0x2222), &mut state).unwrap();

        assert_eq!(state.pending_ul().unwrap().rnti, Rnti(0x1111));
    }

    #[test]
    fn test_ul_lookup_consumes_pending() {
        let mut search = DciSearch::new(cell());
        search.set_rnti(Rnti(0x1234));
        let ue = search.search_space().ue(Rnti(0x1234), 2, 0).unwrap().into_owned();

        let mut decoder = TableDecoder::default().answer(ue[0], DciFormat::Format1A, DciFormat::Format0, 0x1234);
        let dl = search
            .find_dl_dci(&mut decoder, TransmissionMode::Tm1, 2, 0, Rnti(0x1234))
            .unwrap();
        assert!(dl.is_none());
        assert!(search.state().pending_ul().is_some());

        // Pending grant for a different RNTI is not consumed
        let mut decoder = TableDecoder::default();
        let other = search.find_ul_dci(&mut decoder, 2, 0, Rnti(0x4321)).unwrap();
        assert!(other.is_none());
        assert!(search.state().pending_ul().is_some());

        let mut decoder = TableDecoder::default();
        let ul = search.find_ul_dci(&mut decoder, 2, 0, Rnti(0x1234)).unwrap();
        assert_eq!(ul.map(|m| m.format), Some(DciFormat::Format0));
        assert!(decoder.calls.is_empty());
        assert!(search.state().pending_ul().is_none());

        // Next lookup searches again and finds nothing
        let ul = search.find_ul_dci(&mut decoder, 2, 0, Rnti(0x1234)).unwrap();
        assert!(ul.is_none());
        assert_eq!(decoder.calls.len(), ue.len());
        assert!(decoder.calls.iter().all(|(_, f)| *f == DciFormat::Format0));
    }

    #[test]
    fn test_dl_order_for_user_rnti() {
        let mut search = DciSearch::new(cell());
        search.set_rnti(Rnti(0x1234));
        let nof_ue = search.search_space().ue(Rnti(0x1234), 2, 3).unwrap().len();
        let nof_common = search.search_space().common(2).unwrap().len();

        let mut decoder = TableDecoder::default();
        let found = search
            .find_dl_dci(&mut decoder, TransmissionMode::Tm4, 2, 3, Rnti(0x1234))
            .unwrap();
        assert!(found.is_none());
        assert_eq!(decoder.calls.len(), 2 * nof_ue + nof_common);
        assert_eq!(decoder.calls[0].1, DciFormat::Format1A);
        assert_eq!(decoder.calls[nof_ue].1, DciFormat::Format2);
        assert_eq!(decoder.calls[2 * nof_ue].1, DciFormat::Format1A);
        assert_eq!(decoder.calls[2 * nof_ue].0, search.search_space().common(2).unwrap()[0]);
    }

    #[test]
    fn test_common_fallback_for_user_rnti() {
        let mut search = DciSearch::new(cell());
        search.set_rnti(Rnti(0x1234));
        let common = search.search_space().common(1).unwrap().to_vec();

        let mut decoder = TableDecoder::default().answer(common[1], DciFormat::Format1A, DciFormat::Format1A, 0x1234);
        let found = search
            .find_dl_dci(&mut decoder, TransmissionMode::Tm1, 1, 0, Rnti(0x1234))
            .unwrap();
        assert!(found.is_some());
        assert_eq!(search.state().last_location(), common[1]);
    }

    #[test]
    fn test_dl_order_for_si_rnti() {
        let mut search = DciSearch::new(cell());
        let common = search.search_space().common(3).unwrap().to_vec();

        let mut decoder = TableDecoder::default().answer(common[0], DciFormat::Format1C, DciFormat::Format1C, 0xFFFF);
        let found = search
            .find_dl_dci(&mut decoder, TransmissionMode::Tm2, 3, 5, Rnti::SI)
            .unwrap();
        assert_eq!(found.map(|m| m.format), Some(DciFormat::Format1C));
        // All of 1A, then the first 1C candidate
        assert_eq!(decoder.calls.len(), common.len() + 1);
        assert!(decoder.calls[..common.len()].iter().all(|(_, f)| *f == DciFormat::Format1A));
    }

    #[test]
    fn test_invalid_parameters() {
        let mut search = DciSearch::new(cell());
        let mut decoder = TableDecoder::default();
        assert!(matches!(
            search.find_dl_dci(&mut decoder, TransmissionMode::Tm1, 0, 0, Rnti(0x1234)),
            Err(LayerError::ConfigurationError(_))
        ));
        assert!(matches!(
            search.find_dl_dci(&mut decoder, TransmissionMode::Tm1, 4, 0, Rnti(0x1234)),
            Err(LayerError::ConfigurationError(_))
        ));
        assert!(matches!(
            search.find_ul_dci(&mut decoder, 2, 10, Rnti(0x1234)),
            Err(LayerError::ConfigurationError(_))
        ));
        assert!(matches!(
            search.find_dl_dci(&mut decoder, TransmissionMode::Tm1, 2, 0, Rnti(0)),
            Err(LayerError::ConfigurationError(_))
        ));
    }
}
