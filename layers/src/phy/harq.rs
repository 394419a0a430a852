//! HARQ Soft Buffers
//!
//! One receive soft buffer per transport block slot. A buffer keeps its soft
//! bits across retransmissions of the same transport block and is cleared
//! when new data is scheduled.

use common::softbuffer::SoftBufferRx;
use common::types::MAX_TB;
use tracing::debug;

/// What the last grant said about a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TbState {
    harq_process: u8,
    ndi: bool,
    tbs: usize,
}

/// Soft buffers of the two transport block slots
#[derive(Debug, Clone, Default)]
pub struct HarqSoftBuffers {
    buffers: [SoftBufferRx; MAX_TB],
    state: [Option<TbState>; MAX_TB],
}

impl HarqSoftBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get slot `tb` ready for a grant
    ///
    /// The slot is reset to `tbs` when the grant carries new data: first use,
    /// NDI toggled, different HARQ process or different TBS, or `force_new`.
    /// Returns whether the slot was reset.
    pub fn prepare(&mut self, tb: usize, tbs: usize, harq_process: u8, ndi: bool, force_new: bool) -> bool {
        let next = TbState { harq_process, ndi, tbs };
        let new_data = force_new || self.state[tb] != Some(next);

        if new_data {
            self.buffers[tb].reset_tbs(tbs);
            debug!(
                "HARQ tb={} pid={} ndi={} tbs={}: new data, buffer reset",
                tb, harq_process, ndi, tbs
            );
        } else {
            debug!("HARQ tb={} pid={} tbs={}: retransmission, combining", tb, harq_process, tbs);
        }

        self.state[tb] = Some(next);
        new_data
    }

    /// Clear every slot and forget the NDI history
    pub fn reset_all(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.reset();
        }
        self.state = [None; MAX_TB];
    }

    pub fn buffer(&self, tb: usize) -> &SoftBufferRx {
        &self.buffers[tb]
    }

    pub fn buffers_mut(&mut self) -> &mut [SoftBufferRx] {
        &mut self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_data_resets() {
        let mut harq = HarqSoftBuffers::new();
        assert!(harq.prepare(0, 1000, 3, true, false));
        assert_eq!(harq.buffer(0).tbs(), 1000);
        assert_eq!(harq.buffer(1).tbs(), 0);
    }

    #[test]
    fn test_retransmission_keeps_soft_bits() {
        let mut harq = HarqSoftBuffers::new();
        harq.prepare(0, 1000, 3, true, false);
        harq.buffers_mut()[0].cb_mut(0).unwrap()[5] = 42;

        assert!(!harq.prepare(0, 1000, 3, true, false));
        assert_eq!(harq.buffer(0).cb(0).unwrap()[5], 42);

        // NDI toggled
        assert!(harq.prepare(0, 1000, 3, false, false));
        assert_eq!(harq.buffer(0).cb(0).unwrap()[5], 0);
    }

    #[test]
    fn test_process_or_size_change_is_new_data() {
        let mut harq = HarqSoftBuffers::new();
        harq.prepare(1, 2000, 1, false, false);
        assert!(harq.prepare(1, 2000, 2, false, false));
        assert!(harq.prepare(1, 3000, 2, false, false));
        assert!(harq.prepare(1, 3000, 2, false, true));
        assert!(!harq.prepare(1, 3000, 2, false, false));
    }

    #[test]
    fn test_reset_all() {
        let mut harq = HarqSoftBuffers::new();
        harq.prepare(0, 1000, 0, true, false);
        harq.prepare(1, 1000, 0, true, false);
        harq.reset_all();
        assert_eq!(harq.buffer(0).tbs(), 0);
        assert_eq!(harq.buffer(1).tbs(), 0);
        // Same grant again counts as new data
        assert!(harq.prepare(0, 1000, 0, true, false));
    }
}
