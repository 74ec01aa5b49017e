//! Canned record sources for tests, doctests, and demos.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::record::{CoalescenceRecord, RecordSource};
use crate::TreeSequenceError;

/// In-memory [`RecordSource`] backed by plain vectors.
pub struct VecSource {
    sample_size: u32,
    num_loci: u32,
    breakpoints: Vec<u32>,
    records: Vec<CoalescenceRecord>,
}

impl VecSource {
    pub fn new(
        sample_size: u32,
        num_loci: u32,
        breakpoints: Vec<u32>,
        records: Vec<CoalescenceRecord>,
    ) -> Self {
        VecSource {
            sample_size,
            num_loci,
            breakpoints,
            records,
        }
    }

    /// Shuffle the record order with a seeded generator. The store
    /// sorts on creation, so consumers must not depend on source
    /// order; shuffled fixtures exercise that.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.records.shuffle(&mut StdRng::seed_from_u64(seed));
        self
    }
}

impl RecordSource for VecSource {
    fn sample_size(&self) -> u32 {
        self.sample_size
    }

    fn num_loci(&self) -> u32 {
        self.num_loci
    }

    fn num_breakpoints(&self) -> usize {
        self.breakpoints.len()
    }

    fn num_coalescence_records(&self) -> usize {
        self.records.len()
    }

    fn copy_breakpoints_into(&self, buf: &mut [u32]) -> Result<(), TreeSequenceError> {
        buf.copy_from_slice(&self.breakpoints);
        Ok(())
    }

    fn copy_records_into(&self, buf: &mut [CoalescenceRecord]) -> Result<(), TreeSequenceError> {
        buf.copy_from_slice(&self.records);
        Ok(())
    }
}

/// Four samples, ten loci, one tree over the whole chromosome.
pub fn single_tree() -> VecSource {
    VecSource::new(
        4,
        10,
        vec![0, 10],
        vec![
            CoalescenceRecord::new(0, 10, 5, [1, 2], 0.5),
            CoalescenceRecord::new(0, 10, 6, [3, 4], 0.7),
            CoalescenceRecord::new(0, 10, 7, [5, 6], 1.3),
        ],
    )
}

/// Four samples, ten loci, a recombination at 4 plus a breakpoint at 2
/// that leaves the tree unchanged.
pub fn two_trees() -> VecSource {
    VecSource::new(
        4,
        10,
        vec![0, 2, 4, 10],
        vec![
            CoalescenceRecord::new(0, 4, 5, [1, 2], 0.5),
            CoalescenceRecord::new(0, 10, 6, [3, 4], 0.8),
            CoalescenceRecord::new(4, 10, 7, [1, 2], 0.6),
            CoalescenceRecord::new(0, 4, 8, [5, 6], 1.0),
            CoalescenceRecord::new(4, 10, 9, [7, 6], 1.1),
        ],
    )
}

/// Four samples, twelve loci, three distinct trees with boundaries at
/// 4 and 8; node 6 spans the first two trees.
pub fn three_trees() -> VecSource {
    VecSource::new(
        4,
        12,
        vec![0, 4, 8, 12],
        vec![
            CoalescenceRecord::new(0, 4, 5, [1, 2], 0.5),
            CoalescenceRecord::new(0, 8, 6, [3, 4], 0.7),
            CoalescenceRecord::new(0, 4, 7, [5, 6], 1.3),
            CoalescenceRecord::new(4, 8, 8, [1, 2], 0.6),
            CoalescenceRecord::new(4, 8, 9, [8, 6], 1.4),
            CoalescenceRecord::new(8, 12, 10, [1, 3], 0.5),
            CoalescenceRecord::new(8, 12, 11, [2, 4], 0.8),
            CoalescenceRecord::new(8, 12, 12, [10, 11], 1.6),
        ],
    )
}

/// Four samples, no records: breakpoints only at the chromosome ends.
pub fn empty(num_loci: u32) -> VecSource {
    VecSource::new(4, num_loci, vec![0, num_loci], Vec::new())
}
