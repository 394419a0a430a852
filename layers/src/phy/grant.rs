//! Downlink Grant Interpretation
//!
//! Turns a decoded DCI into the PDSCH configuration of the subframe: MIMO
//! scheme, precoding, layers and redundancy versions. Soft buffers are only
//! touched once the grant is known to be supported.

use crate::phy::harq::HarqSoftBuffers;
use crate::LayerError;
use common::phy::{DciMessage, DlGrant, PdschConfig};
use common::types::{CellConfig, DciFormat, MimoType, MAX_TB};
use tracing::{debug, info};

/// Redundancy version for `sfn` when the DCI does not carry one
///
/// `k = (sfn / 2) mod 4`, `rv = ceil(3k / 2) mod 4`, cycling 0, 2, 3, 1.
pub fn rv_from_sfn(sfn: u32) -> u8 {
    let k = (sfn / 2) % 4;
    (((3 * k + 1) / 2) % 4) as u8
}

/// MIMO scheme signaled by a downlink format
pub fn mimo_type(format: DciFormat, nof_tb: usize, pinfo: u8, nof_ports: u32) -> Result<MimoType, LayerError> {
    let mimo = match format {
        DciFormat::Format1 | DciFormat::Format1A => {
            if nof_ports == 1 {
                MimoType::SingleAntenna
            } else {
                MimoType::TxDiversity
            }
        }
        DciFormat::Format2 => {
            if nof_tb == 1 && pinfo == 0 {
                MimoType::TxDiversity
            } else {
                MimoType::SpatialMultiplex
            }
        }
        DciFormat::Format2A => {
            if nof_tb == 1 && pinfo == 0 {
                MimoType::TxDiversity
            } else {
                MimoType::Cdd
            }
        }
        DciFormat::Format0
        | DciFormat::Format1B
        | DciFormat::Format1C
        | DciFormat::Format1D
        | DciFormat::Format2B => {
            return Err(LayerError::UnsupportedConfiguration(format!(
                "Transmission mode not supported for {}",
                format
            )));
        }
    };
    Ok(mimo)
}

/// Precoding matrix indicator for spatial multiplexing
pub fn pmi(nof_tb: usize, pinfo: u8) -> Result<u32, LayerError> {
    match nof_tb {
        1 if (1..=4).contains(&pinfo) => Ok(pinfo as u32 - 1),
        2 if pinfo < 2 => Ok(pinfo as u32),
        _ => Err(LayerError::UnsupportedConfiguration(format!(
            "Not implemented number of transport blocks ({}) / pinfo ({}) combination",
            nof_tb, pinfo
        ))),
    }
}

/// Spatial layers carried by a MIMO scheme
pub fn nof_layers(mimo: MimoType, nof_tb: usize, nof_ports: u32) -> u32 {
    match mimo {
        MimoType::SingleAntenna => 1,
        MimoType::TxDiversity => nof_ports,
        MimoType::SpatialMultiplex => nof_tb as u32,
        MimoType::Cdd => 2,
    }
}

/// Build the PDSCH configuration of a grant
pub fn configure(
    grant: &DlGrant,
    cfi: u32,
    sf_idx: u32,
    rv: [u8; MAX_TB],
    mimo: MimoType,
    nof_ports: u32,
) -> Result<PdschConfig, LayerError> {
    let pmi = if mimo == MimoType::SpatialMultiplex {
        pmi(grant.nof_tb, grant.pinfo)?
    } else {
        0
    };
    let nof_layers = nof_layers(mimo, grant.nof_tb, nof_ports);
    let codebook_idx = if mimo == MimoType::SpatialMultiplex && nof_layers == 2 {
        pmi + 1
    } else {
        pmi
    };

    Ok(PdschConfig {
        grant: *grant,
        cfi,
        sf_idx,
        rv,
        mimo_type: mimo,
        codebook_idx,
        nof_layers,
    })
}

/// Resolve a downlink DCI received at `tti` into a PDSCH configuration
///
/// The soft buffers of the scheduled transport blocks are prepared only after
/// the whole grant validated, so a rejected grant leaves them untouched.
pub fn resolve(
    dci: &DciMessage,
    tti: u32,
    cfi: u32,
    cell: &CellConfig,
    harq: &mut HarqSoftBuffers,
) -> Result<PdschConfig, LayerError> {
    let grant = DlGrant::from_fields(&dci.fields);
    if grant.nof_tb == 0 {
        return Err(LayerError::UnsupportedConfiguration(
            "Grant enables no transport block".to_string(),
        ));
    }

    let sf_idx = tti % 10;
    let mimo = mimo_type(dci.format, grant.nof_tb, grant.pinfo, cell.nof_ports)?;

    let (rv, force_new) = match dci.fields.rv_idx {
        Some(rv_idx) => ([rv_idx, dci.fields.rv_idx_1], false),
        None => {
            let rv = rv_from_sfn(tti / 10);
            ([rv; MAX_TB], true)
        }
    };

    let config = configure(&grant, cfi, sf_idx, rv, mimo, cell.nof_ports)?;

    for tb in 0..grant.nof_tb {
        harq.prepare(
            tb,
            grant.mcs[tb].tbs,
            dci.fields.harq_process,
            dci.fields.ndi[tb],
            force_new,
        );
    }

    info!(
        "PDSCH grant {}: nof_tb={} tbs={} mimo={:?} layers={} codebook={} rv={:?}",
        dci.format, grant.nof_tb, grant.mcs[0].tbs, mimo, config.nof_layers, config.codebook_idx, rv
    );
    debug!("PDSCH config: {:?}", config);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::phy::{DciFields, Mcs};
    use common::types::{CyclicPrefix, Pci, PhichLength, PhichResources};

    fn cell(nof_ports: u32) -> CellConfig {
        CellConfig {
            nof_prb: 50,
            nof_ports,
            cp: CyclicPrefix::Normal,
            id: Pci(1),
            phich_resources: PhichResources::One,
            phich_length: PhichLength::Normal,
        }
    }

    fn dci(format: DciFormat, nof_tb: usize, pinfo: u8) -> DciMessage {
        let mut fields = DciFields::default();
        for tb in 0..nof_tb {
            fields.tb_enabled[tb] = true;
            fields.mcs[tb] = Mcs { idx: 10, tbs: 2000 + tb * 100 };
        }
        fields.pinfo = pinfo;
        fields.rv_idx = Some(1);
        fields.rv_idx_1 = 2;
        fields.harq_process = 4;
        DciMessage { format, fields }
    }

    #[test]
    fn test_rv_schedule() {
        let rvs: Vec<u8> = (0..8).map(rv_from_sfn).collect();
        assert_eq!(rvs, vec![0, 0, 2, 2, 3, 3, 1, 1]);
        assert_eq!(rv_from_sfn(8), 0);
        assert_eq!(rv_from_sfn(1023), 1);
    }

    #[test]
    fn test_mimo_mapping() {
        assert_eq!(mimo_type(DciFormat::Format1A, 1, 0, 1).unwrap(), MimoType::SingleAntenna);
        assert_eq!(mimo_type(DciFormat::Format1, 1, 0, 2).unwrap(), MimoType::TxDiversity);
        assert_eq!(mimo_type(DciFormat::Format2, 1, 0, 2).unwrap(), MimoType::TxDiversity);
        assert_eq!(mimo_type(DciFormat::Format2, 1, 2, 2).unwrap(), MimoType::SpatialMultiplex);
        assert_eq!(mimo_type(DciFormat::Format2, 2, 0, 2).unwrap(), MimoType::SpatialMultiplex);
        assert_eq!(mimo_type(DciFormat::Format2A, 1, 0, 2).unwrap(), MimoType::TxDiversity);
        assert_eq!(mimo_type(DciFormat::Format2A, 2, 0, 2).unwrap(), MimoType::Cdd);
        for format in [
            DciFormat::Format0,
            DciFormat::Format1B,
            DciFormat::Format1C,
            DciFormat::Format1D,
            DciFormat::Format2B,
        ] {
            assert!(matches!(
                mimo_type(format, 1, 0, 2),
                Err(LayerError::UnsupportedConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_pmi_mapping() {
        assert_eq!(pmi(1, 1).unwrap(), 0);
        assert_eq!(pmi(1, 4).unwrap(), 3);
        assert_eq!(pmi(2, 0).unwrap(), 0);
        assert_eq!(pmi(2, 1).unwrap(), 1);
        assert!(pmi(1, 0).is_err());
        assert!(pmi(1, 5).is_err());
        assert!(pmi(2, 2).is_err());
    }

    #[test]
    fn test_configure_layers_and_codebook() {
        let grant = DlGrant::from_fields(&dci(DciFormat::Format2, 2, 1).fields);
        let config = configure(&grant, 2, 3, [0, 0], MimoType::SpatialMultiplex, 2).unwrap();
        assert_eq!(config.nof_layers, 2);
        assert_eq!(config.codebook_idx, 2);

        let grant = DlGrant::from_fields(&dci(DciFormat::Format2, 1, 3).fields);
        let config = configure(&grant, 2, 3, [0, 0], MimoType::SpatialMultiplex, 2).unwrap();
        assert_eq!(config.nof_layers, 1);
        assert_eq!(config.codebook_idx, 2);

        let grant = DlGrant::from_fields(&dci(DciFormat::Format1, 1, 0).fields);
        let config = configure(&grant, 1, 0, [0, 0], MimoType::TxDiversity, 4).unwrap();
        assert_eq!(config.nof_layers, 4);
        assert_eq!(config.codebook_idx, 0);
    }

    #[test]
    fn test_configure_rejects_bad_precoding() {
        // Spatial multiplexing, one TB, precoding info 0
        let grant = DlGrant::from_fields(&dci(DciFormat::Format2, 1, 0).fields);
        assert!(matches!(
            configure(&grant, 2, 0, [0, 0], MimoType::SpatialMultiplex, 2),
            Err(LayerError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_unsupported_grant_leaves_buffers() {
        let mut harq = HarqSoftBuffers::new();
        let message = dci(DciFormat::Format2, 1, 5);
        let result = resolve(&message, 1234, 2, &cell(2), &mut harq);
        assert!(matches!(result, Err(LayerError::UnsupportedConfiguration(_))));
        assert_eq!(harq.buffer(0).tbs(), 0);
        assert_eq!(harq.buffer(0).capacity_cb(), 0);

        let message = dci(DciFormat::Format1B, 1, 0);
        assert!(resolve(&message, 1234, 2, &cell(2), &mut harq).is_err());
        assert_eq!(harq.buffer(0).capacity_cb(), 0);
    }

    #[test]
    fn test_resolve_signaled_rv() {
        let mut harq = HarqSoftBuffers::new();
        let message = dci(DciFormat::Format2, 2, 0);
        let config = resolve(&message, 57, 3, &cell(2), &mut harq).unwrap();
        assert_eq!(config.sf_idx, 7);
        assert_eq!(config.cfi, 3);
        assert_eq!(config.rv, [1, 2]);
        assert_eq!(config.mimo_type, MimoType::SpatialMultiplex);
        assert_eq!(config.codebook_idx, 1);
        assert_eq!(harq.buffer(0).tbs(), 2000);
        assert_eq!(harq.buffer(1).tbs(), 2100);
    }

    #[test]
    fn test_resolve_rv_from_frame_number() {
        let mut harq = HarqSoftBuffers::new();
        let mut message = dci(DciFormat::Format1A, 1, 0);
        message.fields.rv_idx = None;

        // sfn 45: k = 22 mod 4 = 2
        let config = resolve(&message, 453, 1, &cell(1), &mut harq).unwrap();
        assert_eq!(config.rv, [3, 3]);
        assert_eq!(config.mimo_type, MimoType::SingleAntenna);
        assert_eq!(config.nof_layers, 1);

        // Unsignaled RV always resets the buffer
        harq.buffers_mut()[0].cb_mut(0).unwrap()[0] = 7;
        resolve(&message, 463, 1, &cell(1), &mut harq).unwrap();
        assert_eq!(harq.buffer(0).cb(0).unwrap()[0], 0);
    }

    #[test]
    fn test_resolve_retransmission_combines() {
        let mut harq = HarqSoftBuffers::new();
        let message = dci(DciFormat::Format1, 1, 0);
        resolve(&message, 10, 2, &cell(2), &mut harq).unwrap();
        harq.buffers_mut()[0].cb_mut(0).unwrap()[0] = 7;

        resolve(&message, 18, 2, &cell(2), &mut harq).unwrap();
        assert_eq!(harq.buffer(0).cb(0).unwrap()[0], 7);
    }

    #[test]
    fn test_resolve_without_transport_blocks() {
        let mut harq = HarqSoftBuffers::new();
        let message = dci(DciFormat::Format1A, 0, 0);
        assert!(matches!(
            resolve(&message, 0, 1, &cell(1), &mut harq),
            Err(LayerError::UnsupportedConfiguration(_))
        ));
    }
}
