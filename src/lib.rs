//! Columnar storage and diff-streaming of coalescent tree sequences.
//!
//! A coalescent simulation of `n` haploid samples over a chromosome of
//! `L` discrete loci produces a set of coalescence records, each
//! asserting that an internal node with two children exists over a
//! half-open genomic interval. This crate stores those records as an
//! immutable column-oriented [`TreeSequence`] — buildable from any
//! [`RecordSource`] or loadable from a checksummed, optionally
//! compressed container — and streams the sequence of local trees back
//! as incremental [`TreeDiff`] steps: per interval, the nodes that
//! left the tree and the nodes that entered it.
//!
//! ```
//! use streaming_iterator::StreamingIterator;
//! use treeseq::{TreeDiffOptions, TreeSequence};
//!
//! let ts = TreeSequence::create_from(&treeseq::test_data::two_trees())?;
//! let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty())?;
//! while let Some(diff) = diffs.next() {
//!     println!(
//!         "span {}: {} out, {} in",
//!         diff.span(),
//!         diff.nodes_out().len(),
//!         diff.nodes_in().len()
//!     );
//! }
//! # Ok::<(), treeseq::TreeSequenceError>(())
//! ```

mod arena;
mod diff_iterator;
mod error;
mod file_format;
mod flags;
mod ordered_map;
mod record;
pub mod test_data;
mod tree_sequence;

pub use diff_iterator::{TreeDiff, TreeDiffIterator, TreeNode};
pub use error::TreeSequenceError;
pub use file_format::FILE_FORMAT_VERSION;
pub use flags::{DumpOptions, TreeDiffOptions};
pub use record::{CoalescenceRecord, NodeId, RecordSource};
pub use tree_sequence::TreeSequence;
