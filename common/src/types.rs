//! Common Types for the LTE UE receiver
//!
//! Defines fundamental types used throughout the downlink receive chain

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

/// Maximum number of antenna ports / receive antennas
pub const MAX_PORTS: usize = 4;

/// Maximum number of transport blocks (codewords) per subframe
pub const MAX_TB: usize = 2;

/// Number of subframes in a radio frame
pub const NSUBFRAMES_X_FRAME: u32 = 10;

/// System frame numbers wrap after this many radio frames
pub const NOF_SFN: u32 = 1024;

/// Subcarriers per resource block
pub const NRE: usize = 12;

/// Maximum number of PRBs in an LTE carrier
pub const MAX_PRB: u32 = 110;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// System Information RNTI
    pub const SI: Self = Self(0xFFFF);
    /// Paging RNTI
    pub const P: Self = Self(0xFFFE);
    /// First Random Access RNTI
    pub const RA_START: Self = Self(0x0001);
    /// Last Random Access RNTI
    pub const RA_END: Self = Self(0x003C);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// RNTI 0 is never assigned and means "not configured"
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Classify the RNTI by the range it falls in
    pub fn rnti_type(&self) -> RntiType {
        if *self == Self::SI {
            RntiType::Si
        } else if *self == Self::P {
            RntiType::Paging
        } else if self.0 <= Self::RA_END.0 {
            RntiType::RandomAccess
        } else {
            RntiType::User
        }
    }
}

/// RNTI classes that select the PDCCH search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RntiType {
    Si,
    Paging,
    RandomAccess,
    User,
}

impl RntiType {
    /// SI, P and RA-RNTI are only ever scheduled in the common search space
    pub fn is_common(&self) -> bool {
        !matches!(self, RntiType::User)
    }
}

/// Physical Cell Identity (0-503)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value
    pub const MAX: u16 = 503;
    /// Number of physical-layer cell identity groups (N_id_1)
    pub const NOF_N_ID_1: u16 = 168;
    /// Number of identities within a group (N_id_2)
    pub const NOF_N_ID_2: u8 = 3;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Combine the group identity and the identity within the group
    pub fn from_parts(n_id_1: u16, n_id_2: u8) -> Option<Self> {
        if n_id_1 < Self::NOF_N_ID_1 && n_id_2 < Self::NOF_N_ID_2 {
            Some(Self(3 * n_id_1 + n_id_2 as u16))
        } else {
            None
        }
    }

    /// Identity group (N_id_1)
    pub fn n_id_1(&self) -> u16 {
        self.0 / 3
    }

    /// Identity within the group (N_id_2)
    pub fn n_id_2(&self) -> u8 {
        (self.0 % 3) as u8
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclicPrefix {
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// OFDM symbols per slot
    pub fn symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 7,
            CyclicPrefix::Extended => 6,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, CyclicPrefix::Normal)
    }
}

/// PHICH resource factor N_g
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhichResources {
    OneSixth,
    Half,
    One,
    Two,
}

impl PhichResources {
    /// Number of PHICH groups for the given bandwidth
    pub fn ngroups(&self, nof_prb: u32, cp: CyclicPrefix) -> u32 {
        // ceil(Ng * nof_prb / 8) with Ng as an exact fraction
        let (num, den) = match self {
            PhichResources::OneSixth => (1, 6),
            PhichResources::Half => (1, 2),
            PhichResources::One => (1, 1),
            PhichResources::Two => (2, 1),
        };
        let ngroups = (num * nof_prb + 8 * den - 1) / (8 * den);
        match cp {
            CyclicPrefix::Normal => ngroups,
            CyclicPrefix::Extended => 2 * ngroups,
        }
    }
}

/// PHICH duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhichLength {
    Normal,
    Extended,
}

/// Errors raised while validating a cell configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellConfigError {
    #[error("Invalid number of PRBs: {0}")]
    InvalidPrb(u32),

    #[error("Invalid number of antenna ports: {0}")]
    InvalidPorts(u32),

    #[error("Invalid cell id: {0}")]
    InvalidId(u16),
}

/// Static description of the serving cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellConfig {
    /// Number of physical resource blocks
    pub nof_prb: u32,
    /// Number of cell-specific antenna ports (1, 2 or 4)
    pub nof_ports: u32,
    /// Cyclic prefix
    pub cp: CyclicPrefix,
    /// Physical cell identity
    pub id: Pci,
    /// PHICH resources
    pub phich_resources: PhichResources,
    /// PHICH duration
    pub phich_length: PhichLength,
}

impl CellConfig {
    /// Check the parameters a receiver can be built for
    pub fn validate(&self) -> Result<(), CellConfigError> {
        if self.nof_prb < 6 || self.nof_prb > MAX_PRB {
            return Err(CellConfigError::InvalidPrb(self.nof_prb));
        }
        if !matches!(self.nof_ports, 1 | 2 | 4) {
            return Err(CellConfigError::InvalidPorts(self.nof_ports));
        }
        if self.id.0 > Pci::MAX {
            return Err(CellConfigError::InvalidId(self.id.0));
        }
        Ok(())
    }

    /// Resource elements per subframe on one antenna
    pub fn sf_len_re(&self) -> usize {
        self.nof_prb as usize * NRE * 2 * self.cp.symbols_per_slot()
    }

    /// Resource elements per OFDM symbol
    pub fn symbol_len_re(&self) -> usize {
        self.nof_prb as usize * NRE
    }
}

/// Downlink transmission modes TM1..TM8
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum TransmissionMode {
    Tm1 = 1,
    Tm2 = 2,
    Tm3 = 3,
    Tm4 = 4,
    Tm5 = 5,
    Tm6 = 6,
    Tm7 = 7,
    Tm8 = 8,
}

impl TransmissionMode {
    /// Zero-based position in per-mode lookup tables
    pub fn index(&self) -> usize {
        *self as usize - 1
    }
}

/// DCI formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DciFormat {
    Format0,
    Format1,
    Format1A,
    Format1B,
    Format1C,
    Format1D,
    Format2,
    Format2A,
    Format2B,
}

impl std::fmt::Display for DciFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DciFormat::Format0 => "Format0",
            DciFormat::Format1 => "Format1",
            DciFormat::Format1A => "Format1A",
            DciFormat::Format1B => "Format1B",
            DciFormat::Format1C => "Format1C",
            DciFormat::Format1D => "Format1D",
            DciFormat::Format2 => "Format2",
            DciFormat::Format2A => "Format2A",
            DciFormat::Format2B => "Format2B",
        };
        f.write_str(name)
    }
}

/// Modulation schemes for PDSCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModulationScheme {
    Qpsk,
    Qam16,
    Qam64,
}

impl ModulationScheme {
    /// Modulation order for I_MCS 0..=28 (36.213 Table 7.1.7.1-1)
    pub fn from_mcs_index(mcs_idx: u8) -> Option<Self> {
        match mcs_idx {
            0..=9 => Some(ModulationScheme::Qpsk),
            10..=16 => Some(ModulationScheme::Qam16),
            17..=28 => Some(ModulationScheme::Qam64),
            _ => None,
        }
    }

    pub fn bits_per_symbol(&self) -> usize {
        match self {
            ModulationScheme::Qpsk => 2,
            ModulationScheme::Qam16 => 4,
            ModulationScheme::Qam64 => 6,
        }
    }
}

/// Multi-antenna transmission scheme of a PDSCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimoType {
    SingleAntenna,
    TxDiversity,
    SpatialMultiplex,
    /// Large-delay cyclic delay diversity
    Cdd,
}
