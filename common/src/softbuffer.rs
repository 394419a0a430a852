//! Receive soft buffer for one transport block
//!
//! Holds the rate-matching soft bits of every code block so that
//! retransmissions of the same data can be combined.

use tracing::trace;

/// Maximum turbo code block size (Z)
pub const MAX_CB_SIZE: usize = 6144;

/// CRC length attached to transport and code blocks
pub const CRC_LEN: usize = 24;

/// Soft bits for a turbo code block of `k` bits (three streams plus tail)
pub fn cb_buffer_len(k: usize) -> usize {
    3 * k + 12
}

/// Code block segmentation of a transport block (36.212 5.1.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CbSegmentation {
    /// Transport block size in bits
    pub tbs: usize,
    /// Number of code blocks (C)
    pub nof_cb: usize,
    /// Code block size including CRC (K)
    pub cb_size: usize,
}

impl CbSegmentation {
    pub fn new(tbs: usize) -> Self {
        if tbs == 0 {
            return Self::default();
        }
        let b = tbs + CRC_LEN;
        if b <= MAX_CB_SIZE {
            Self { tbs, nof_cb: 1, cb_size: b }
        } else {
            let nof_cb = (b + MAX_CB_SIZE - CRC_LEN - 1) / (MAX_CB_SIZE - CRC_LEN);
            let b_prime = b + nof_cb * CRC_LEN;
            Self {
                tbs,
                nof_cb,
                cb_size: (b_prime + nof_cb - 1) / nof_cb,
            }
        }
    }
}

/// Soft buffer of one transport block slot
#[derive(Debug, Clone, Default)]
pub struct SoftBufferRx {
    /// Soft bits per code block; grows with the largest TBS seen
    buffer_f: Vec<Vec<i16>>,
    /// Code blocks already decoded correctly
    cb_crc: Vec<bool>,
    /// Whole transport block decoded correctly
    tb_crc: bool,
    segmentation: CbSegmentation,
}

impl SoftBufferRx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the soft bits and prepare segmentation for a new TBS
    pub fn reset_tbs(&mut self, tbs: usize) {
        let segmentation = CbSegmentation::new(tbs);
        let cb_len = cb_buffer_len(segmentation.cb_size);

        if self.buffer_f.len() < segmentation.nof_cb {
            self.buffer_f.resize_with(segmentation.nof_cb, Vec::new);
        }
        for cb in self.buffer_f.iter_mut().take(segmentation.nof_cb) {
            if cb.len() < cb_len {
                cb.resize(cb_len, 0);
            }
            cb.iter_mut().for_each(|s| *s = 0);
        }

        self.cb_crc.clear();
        self.cb_crc.resize(segmentation.nof_cb, false);
        self.tb_crc = false;
        self.segmentation = segmentation;

        trace!(
            "Soft buffer reset: tbs={} nof_cb={} cb_size={}",
            tbs,
            segmentation.nof_cb,
            segmentation.cb_size
        );
    }

    /// Clear everything, including the segmentation
    pub fn reset(&mut self) {
        for cb in self.buffer_f.iter_mut() {
            cb.iter_mut().for_each(|s| *s = 0);
        }
        self.cb_crc.clear();
        self.tb_crc = false;
        self.segmentation = CbSegmentation::default();
    }

    pub fn tbs(&self) -> usize {
        self.segmentation.tbs
    }

    pub fn segmentation(&self) -> CbSegmentation {
        self.segmentation
    }

    /// Code blocks with allocated storage
    pub fn capacity_cb(&self) -> usize {
        self.buffer_f.len()
    }

    /// Soft bits of code block `i` of the current transport block
    pub fn cb(&self, i: usize) -> Option<&[i16]> {
        if i < self.segmentation.nof_cb {
            let len = cb_buffer_len(self.segmentation.cb_size);
            self.buffer_f.get(i).map(|cb| &cb[..len])
        } else {
            None
        }
    }

    pub fn cb_mut(&mut self, i: usize) -> Option<&mut [i16]> {
        if i < self.segmentation.nof_cb {
            let len = cb_buffer_len(self.segmentation.cb_size);
            self.buffer_f.get_mut(i).map(|cb| &mut cb[..len])
        } else {
            None
        }
    }

    pub fn cb_crc(&self, i: usize) -> bool {
        self.cb_crc.get(i).copied().unwrap_or(false)
    }

    pub fn set_cb_crc(&mut self, i: usize, ok: bool) {
        if let Some(crc) = self.cb_crc.get_mut(i) {
            *crc = ok;
        }
    }

    pub fn tb_crc(&self) -> bool {
        self.tb_crc
    }

    pub fn set_tb_crc(&mut self, ok: bool) {
        self.tb_crc = ok;
    }
}
