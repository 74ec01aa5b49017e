use std::path::Path;

use log::debug;

use crate::diff_iterator::TreeDiffIterator;
use crate::file_format;
use crate::record::{CoalescenceRecord, RecordSource};
use crate::{DumpOptions, TreeDiffOptions, TreeSequenceError};

/// Allocate a zeroed column, surfacing allocation failure instead of
/// aborting.
pub(crate) fn alloc_column<T: Default + Clone>(len: usize) -> Result<Vec<T>, TreeSequenceError> {
    let mut column = Vec::new();
    column
        .try_reserve_exact(len)
        .map_err(|_| TreeSequenceError::NoMemory)?;
    column.resize(len, T::default());
    Ok(column)
}

/// An immutable tree sequence: the coalescence records of a simulated
/// sample laid out as parallel columns, plus the breakpoint index.
///
/// Records are sorted by left coordinate at creation and never change
/// afterwards. The local tree at any coordinate is defined by the
/// records whose interval overlaps it; [`tree_diff_iterator`] streams
/// those trees back as incremental diffs.
///
/// [`tree_diff_iterator`]: TreeSequence::tree_diff_iterator
///
/// # Examples
///
/// ```
/// use treeseq::TreeSequence;
///
/// let source = treeseq::test_data::two_trees();
/// let ts = TreeSequence::create_from(&source).unwrap();
/// assert_eq!(ts.num_records(), 5);
/// assert_eq!(ts.record(0).unwrap().left, 0);
/// ```
#[derive(Debug)]
pub struct TreeSequence {
    pub(crate) sample_size: u32,
    pub(crate) num_loci: u32,
    pub(crate) breakpoints: Vec<u32>,
    pub(crate) left: Vec<u32>,
    pub(crate) right: Vec<u32>,
    pub(crate) node: Vec<u32>,
    pub(crate) children: Vec<[u32; 2]>,
    pub(crate) time: Vec<f64>,
}

impl TreeSequence {
    /// Build a store by bulk copy from a record source. Records are
    /// sorted by left coordinate; breakpoints are taken as-is.
    pub fn create_from<S: RecordSource>(source: &S) -> Result<Self, TreeSequenceError> {
        let num_breakpoints = source.num_breakpoints();
        let num_records = source.num_coalescence_records();

        let mut breakpoints: Vec<u32> = alloc_column(num_breakpoints)?;
        source.copy_breakpoints_into(&mut breakpoints)?;

        let mut scratch: Vec<CoalescenceRecord> = alloc_column(num_records)?;
        source.copy_records_into(&mut scratch)?;
        scratch.sort_unstable_by_key(|record| record.left);

        let mut left: Vec<u32> = alloc_column(num_records)?;
        let mut right: Vec<u32> = alloc_column(num_records)?;
        let mut node: Vec<u32> = alloc_column(num_records)?;
        let mut children: Vec<[u32; 2]> = alloc_column(num_records)?;
        let mut time: Vec<f64> = alloc_column(num_records)?;
        for (j, record) in scratch.iter().enumerate() {
            left[j] = record.left;
            right[j] = record.right;
            node[j] = record.node.into();
            children[j] = [record.children[0].into(), record.children[1].into()];
            time[j] = record.time;
        }

        let ts = TreeSequence {
            sample_size: source.sample_size(),
            num_loci: source.num_loci(),
            breakpoints,
            left,
            right,
            node,
            children,
            time,
        };
        debug!(
            "created tree sequence: {} records, {} breakpoints, n = {}, L = {}",
            ts.num_records(),
            ts.num_breakpoints(),
            ts.sample_size,
            ts.num_loci
        );
        Ok(ts)
    }

    /// Load a store from a container written by [`dump`](Self::dump).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TreeSequenceError> {
        file_format::load(path.as_ref())
    }

    /// Write the store to `path` as a self-describing container.
    pub fn dump<P: AsRef<Path>>(
        &self,
        path: P,
        options: DumpOptions,
    ) -> Result<(), TreeSequenceError> {
        file_format::dump(self, path.as_ref(), options)
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn num_loci(&self) -> u32 {
        self.num_loci
    }

    pub fn num_records(&self) -> usize {
        self.left.len()
    }

    pub fn num_breakpoints(&self) -> usize {
        self.breakpoints.len()
    }

    /// Return record `index` in left-sorted order.
    ///
    /// # Errors
    ///
    /// [`TreeSequenceError::OutOfBounds`] if `index >= num_records()`.
    pub fn record(&self, index: usize) -> Result<CoalescenceRecord, TreeSequenceError> {
        if index >= self.num_records() {
            return Err(TreeSequenceError::OutOfBounds);
        }
        Ok(CoalescenceRecord {
            left: self.left[index],
            right: self.right[index],
            node: self.node[index].into(),
            children: [self.children[index][0].into(), self.children[index][1].into()],
            time: self.time[index],
        })
    }

    pub fn breakpoints(&self) -> &[u32] {
        &self.breakpoints
    }

    /// Copy the breakpoint vector into `buf`, which must have length
    /// [`num_breakpoints`](Self::num_breakpoints).
    pub fn copy_breakpoints_into(&self, buf: &mut [u32]) {
        buf.copy_from_slice(&self.breakpoints);
    }

    /// Create a diff iterator borrowing this store.
    ///
    /// # Errors
    ///
    /// [`TreeSequenceError::NoMemory`] if the iterator pools cannot be
    /// allocated.
    pub fn tree_diff_iterator(
        &self,
        options: TreeDiffOptions,
    ) -> Result<TreeDiffIterator<'_>, TreeSequenceError> {
        TreeDiffIterator::new(self, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;

    #[test]
    fn records_sorted_by_left_after_create() {
        let source = test_data::two_trees().shuffled(17);
        let ts = TreeSequence::create_from(&source).unwrap();
        let mut previous = 0;
        for j in 0..ts.num_records() {
            let record = ts.record(j).unwrap();
            assert!(record.left >= previous);
            previous = record.left;
        }
    }

    #[test]
    fn first_record_after_sort() {
        let ts = TreeSequence::create_from(&test_data::two_trees()).unwrap();
        let first = ts.record(0).unwrap();
        assert_eq!(first.left, 0);
        // All three left-0 records precede both left-4 records.
        assert!(ts.record(2).unwrap().left == 0);
        assert!(ts.record(3).unwrap().left == 4);
    }

    #[test]
    fn record_bounds_checked() {
        let ts = TreeSequence::create_from(&test_data::two_trees()).unwrap();
        assert_eq!(ts.num_records(), 5);
        assert!(ts.record(4).is_ok());
        assert!(matches!(
            ts.record(5),
            Err(TreeSequenceError::OutOfBounds)
        ));
        assert!(matches!(
            ts.record(usize::MAX),
            Err(TreeSequenceError::OutOfBounds)
        ));
    }

    #[test]
    fn breakpoint_accessors_agree() {
        let ts = TreeSequence::create_from(&test_data::two_trees()).unwrap();
        let mut copied = vec![0u32; ts.num_breakpoints()];
        ts.copy_breakpoints_into(&mut copied);
        assert_eq!(copied.as_slice(), ts.breakpoints());
        assert_eq!(copied, vec![0, 2, 4, 10]);
    }

    #[test]
    fn empty_store() {
        let ts = TreeSequence::create_from(&test_data::empty(10)).unwrap();
        assert_eq!(ts.num_records(), 0);
        assert_eq!(ts.breakpoints(), &[0, 10]);
        assert!(matches!(
            ts.record(0),
            Err(TreeSequenceError::OutOfBounds)
        ));
    }
}
