use std::fmt;
use std::mem;

use log::trace;
use streaming_iterator::StreamingIterator;

use crate::arena::{Arena, NIL};
use crate::ordered_map::OrderedMap;
use crate::record::{CoalescenceRecord, NodeId};
use crate::tree_sequence::TreeSequence;
use crate::{TreeDiffOptions, TreeSequenceError};

/// An internal node of a local tree, as published by the diff stream.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeNode {
    pub id: NodeId,
    pub children: [NodeId; 2],
    pub time: f64,
}

impl From<&CoalescenceRecord> for TreeNode {
    fn from(record: &CoalescenceRecord) -> Self {
        TreeNode {
            id: record.node,
            children: record.children,
            time: record.time,
        }
    }
}

/// Pool slot: a tree node threaded onto an intrusive singly-linked
/// list.
#[derive(Default)]
struct ListNode {
    node: TreeNode,
    next: u32,
}

/// Keyed list head: the records whose intervals all end at `key`.
struct NodeList {
    head: u32,
    tail: u32,
    key: u32,
}

impl Default for NodeList {
    fn default() -> Self {
        NodeList {
            head: NIL,
            tail: NIL,
            key: 0,
        }
    }
}

/// One step of the diff stream: the interval length and the internal
/// nodes leaving and entering the tree at its left edge.
///
/// The node views are owned by the iterator and overwritten on the
/// next step; copy the triples out to retain them.
#[derive(Debug, Default)]
pub struct TreeDiff {
    span: u32,
    changed: bool,
    nodes_out: Vec<TreeNode>,
    nodes_in: Vec<TreeNode>,
}

impl TreeDiff {
    /// Length of the genomic interval this step covers.
    pub fn span(&self) -> u32 {
        self.span
    }

    /// Whether this step starts a new local tree. Breakpoint-paced
    /// iteration yields span-only steps (`false`) at breakpoints that
    /// leave the tree unchanged.
    pub fn tree_changed(&self) -> bool {
        self.changed
    }

    /// Internal nodes that left the tree at this step's left edge.
    pub fn nodes_out(&self) -> &[TreeNode] {
        &self.nodes_out
    }

    /// Internal nodes new to this step's tree.
    pub fn nodes_in(&self) -> &[TreeNode] {
        &self.nodes_in
    }
}

/// Streaming iterator over the local-tree diffs of a [`TreeSequence`].
///
/// Yields one [`TreeDiff`] per distinct local tree (or per breakpoint
/// pair with [`TreeDiffOptions::ALL_BREAKPOINTS`]); the spans of a full
/// run partition `[0, num_loci)`. Obtained from
/// [`TreeSequence::tree_diff_iterator`]; driven through
/// [`StreamingIterator`], so each yielded diff borrows the iterator
/// and dies at the next call:
///
/// ```
/// use streaming_iterator::StreamingIterator;
/// use treeseq::{TreeDiffOptions, TreeSequence};
///
/// let ts = TreeSequence::create_from(&treeseq::test_data::two_trees()).unwrap();
/// let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
/// let mut covered = 0;
/// while let Some(diff) = diffs.next() {
///     covered += diff.span();
/// }
/// assert_eq!(covered, ts.num_loci());
/// ```
pub struct TreeDiffIterator<'a> {
    ts: &'a TreeSequence,
    options: TreeDiffOptions,
    num_records: usize,
    current_left: u32,
    next_record_index: usize,
    current_breakpoint_index: usize,
    next_breakpoint: u32,
    node_pool: Arena<ListNode>,
    list_pool: Arena<NodeList>,
    active_nodes: OrderedMap,
    pending_head: u32,
    pending_tail: u32,
    diff: TreeDiff,
    have: bool,
    done: bool,
    error: Option<TreeSequenceError>,
}

impl<'a> TreeDiffIterator<'a> {
    pub(crate) fn new(
        ts: &'a TreeSequence,
        options: TreeDiffOptions,
    ) -> Result<Self, TreeSequenceError> {
        let n = ts.sample_size() as usize;
        // A local tree holds n - 1 internal nodes and each is pooled
        // twice, once pending and once in the expiry index, so the
        // steady state needs 2(n - 1) tree nodes. 3n leaves headroom
        // for within-step churn. At most n - 1 expiry keys are live at
        // once, bounding the list and map pools at n.
        let iter = TreeDiffIterator {
            ts,
            options,
            num_records: ts.num_records(),
            current_left: 0,
            next_record_index: 0,
            current_breakpoint_index: 0,
            next_breakpoint: 0,
            node_pool: Arena::with_capacity(3 * n)?,
            list_pool: Arena::with_capacity(n)?,
            active_nodes: OrderedMap::with_capacity(n)?,
            pending_head: NIL,
            pending_tail: NIL,
            diff: TreeDiff::default(),
            have: false,
            done: false,
            error: None,
        };
        trace!(
            "tree diff iterator over {} records, options = {:?}",
            iter.num_records,
            options
        );
        Ok(iter)
    }

    /// The error that parked the iterator, if any. A parked iterator
    /// yields `None` forever.
    pub fn error(&self) -> Option<&TreeSequenceError> {
        self.error.as_ref()
    }

    fn alloc_node(&mut self, record: &CoalescenceRecord) -> Result<u32, TreeSequenceError> {
        self.node_pool
            .alloc(ListNode {
                node: TreeNode::from(record),
                next: NIL,
            })
            .ok_or(TreeSequenceError::InvariantViolation(
                "tree node pool exhausted",
            ))
    }

    fn free_list_nodes(&mut self, head: u32) {
        let mut cursor = head;
        while cursor != NIL {
            let next = self.node_pool[cursor].next;
            self.node_pool.free(cursor);
            cursor = next;
        }
    }

    fn copy_list(&self, head: u32, out: &mut Vec<TreeNode>) {
        let mut cursor = head;
        while cursor != NIL {
            out.push(self.node_pool[cursor].node);
            cursor = self.node_pool[cursor].next;
        }
    }

    /// Release the pending list and every remaining expiry entry.
    /// Runs at end of stream so that the pools balance; repeat calls
    /// are no-ops.
    fn drain(&mut self) {
        let head = mem::replace(&mut self.pending_head, NIL);
        self.pending_tail = NIL;
        self.free_list_nodes(head);
        while let Some(handle) = self.active_nodes.head() {
            let key = self.active_nodes.key(handle);
            if let Some(list) = self.active_nodes.remove(key) {
                let list_head = self.list_pool[list].head;
                self.free_list_nodes(list_head);
                self.list_pool.free(list);
            }
        }
    }

    /// Flush the previous step's nodes and publish the records
    /// expiring at the new left edge as `out`.
    fn retire_previous(&mut self) -> Result<(), TreeSequenceError> {
        let head = mem::replace(&mut self.pending_head, NIL);
        self.pending_tail = NIL;
        self.free_list_nodes(head);
        let handle = self
            .active_nodes
            .search(self.current_left)
            .ok_or(TreeSequenceError::InvariantViolation(
                "no expiring records at a tree boundary",
            ))?;
        let list = self.active_nodes.item(handle);
        debug_assert_eq!(self.list_pool[list].key, self.current_left);
        let list_head = self.list_pool[list].head;
        let mut out = mem::take(&mut self.diff.nodes_out);
        self.copy_list(list_head, &mut out);
        self.diff.nodes_out = out;
        self.free_list_nodes(list_head);
        self.active_nodes.remove(self.current_left);
        self.list_pool.free(list);
        Ok(())
    }

    /// Add one record to the pending list and to the expiry index
    /// under its right coordinate. Two pool nodes per record: the
    /// pending copy dies at the next step, the indexed copy lives
    /// until the record's interval ends.
    fn process_record(&mut self, record: &CoalescenceRecord) -> Result<(), TreeSequenceError> {
        let node = self.alloc_node(record)?;
        if self.pending_head == NIL {
            self.pending_head = node;
        } else {
            self.node_pool[self.pending_tail].next = node;
        }
        self.pending_tail = node;

        let list = match self.active_nodes.search(record.right) {
            Some(handle) => self.active_nodes.item(handle),
            None => {
                let list = self
                    .list_pool
                    .alloc(NodeList {
                        head: NIL,
                        tail: NIL,
                        key: record.right,
                    })
                    .ok_or(TreeSequenceError::InvariantViolation(
                        "node list pool exhausted",
                    ))?;
                if let Err(e) = self.active_nodes.insert(record.right, list) {
                    self.list_pool.free(list);
                    return Err(e);
                }
                list
            }
        };
        let dup = self.alloc_node(record)?;
        let tail = self.list_pool[list].tail;
        if tail == NIL {
            self.list_pool[list].head = dup;
        } else {
            self.node_pool[tail].next = dup;
        }
        self.list_pool[list].tail = dup;
        Ok(())
    }

    /// One distinct-tree step. `Ok(false)` is end of stream.
    fn next_tree(&mut self) -> Result<bool, TreeSequenceError> {
        if self.next_record_index >= self.num_records {
            self.drain();
            return Ok(false);
        }
        if self.current_left != 0 {
            self.retire_previous()?;
        }
        let mut record = self.ts.record(self.next_record_index)?;
        while record.left == self.current_left {
            self.process_record(&record)?;
            self.next_record_index += 1;
            if self.next_record_index == self.num_records {
                break;
            }
            record = self.ts.record(self.next_record_index)?;
        }
        let exhausted = self.next_record_index == self.num_records;
        self.diff.span = if exhausted {
            record.right - self.current_left
        } else {
            record.left - self.current_left
        };
        let mut nodes_in = mem::take(&mut self.diff.nodes_in);
        self.copy_list(self.pending_head, &mut nodes_in);
        self.diff.nodes_in = nodes_in;
        self.diff.changed = true;
        self.current_left = if exhausted {
            self.ts.num_loci()
        } else {
            record.left
        };
        Ok(true)
    }

    fn step(&mut self) -> Result<bool, TreeSequenceError> {
        self.diff.nodes_out.clear();
        self.diff.nodes_in.clear();
        self.diff.changed = false;
        self.diff.span = 0;
        if !self.options.contains(TreeDiffOptions::ALL_BREAKPOINTS) {
            return self.next_tree();
        }
        let ts = self.ts;
        let last = ts.num_breakpoints().saturating_sub(1);
        if self.current_breakpoint_index >= last {
            self.drain();
            return Ok(false);
        }
        let breakpoints = ts.breakpoints();
        if breakpoints[self.current_breakpoint_index] == self.next_breakpoint
            && self.next_tree()?
        {
            self.next_breakpoint += self.diff.span;
        }
        let index = self.current_breakpoint_index;
        self.current_breakpoint_index += 1;
        self.diff.span = breakpoints[index + 1] - breakpoints[index];
        Ok(true)
    }
}

impl StreamingIterator for TreeDiffIterator<'_> {
    type Item = TreeDiff;

    fn advance(&mut self) {
        if self.done {
            self.have = false;
            return;
        }
        match self.step() {
            Ok(true) => self.have = true,
            Ok(false) => {
                self.have = false;
                self.done = true;
            }
            Err(e) => {
                self.have = false;
                self.done = true;
                self.error = Some(e);
            }
        }
    }

    fn get(&self) -> Option<&TreeDiff> {
        if self.have {
            Some(&self.diff)
        } else {
            None
        }
    }
}

impl fmt::Debug for TreeDiffIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending = Vec::new();
        self.copy_list(self.pending_head, &mut pending);
        let pending_ids: Vec<NodeId> = pending.iter().map(|node| node.id).collect();
        let mut expiry_keys = Vec::new();
        let mut cursor = self.active_nodes.head();
        while let Some(handle) = cursor {
            expiry_keys.push(self.active_nodes.key(handle));
            cursor = self.active_nodes.next(handle);
        }
        f.debug_struct("TreeDiffIterator")
            .field("current_left", &self.current_left)
            .field("next_record_index", &self.next_record_index)
            .field("num_records", &self.num_records)
            .field("pending", &pending_ids)
            .field("expiry_keys", &expiry_keys)
            .field(
                "tree_nodes_live",
                &(self.node_pool.allocs() - self.node_pool.frees()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;

    // Records tied on `left` have no guaranteed order after the
    // creation sort, so compare id sets.
    fn ids(nodes: &[TreeNode]) -> Vec<u32> {
        let mut ids: Vec<u32> = nodes.iter().map(|node| node.id.as_u32()).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn single_tree_single_step() {
        let ts = TreeSequence::create_from(&test_data::single_tree()).unwrap();
        let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
        let diff = diffs.next().unwrap();
        assert_eq!(diff.span(), 10);
        assert!(diff.nodes_out().is_empty());
        assert_eq!(ids(diff.nodes_in()), vec![5, 6, 7]);
        assert!(diffs.next().is_none());
        assert!(diffs.error().is_none());
    }

    #[test]
    fn two_trees_two_steps() {
        let ts = TreeSequence::create_from(&test_data::two_trees()).unwrap();
        let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();

        let first = diffs.next().unwrap();
        assert_eq!(first.span(), 4);
        assert!(first.nodes_out().is_empty());
        assert_eq!(ids(first.nodes_in()), vec![5, 6, 8]);

        let second = diffs.next().unwrap();
        assert_eq!(second.span(), 6);
        assert_eq!(ids(second.nodes_out()), vec![5, 8]);
        assert_eq!(ids(second.nodes_in()), vec![7, 9]);

        assert!(diffs.next().is_none());
    }

    #[test]
    fn published_nodes_carry_record_fields() {
        let ts = TreeSequence::create_from(&test_data::single_tree()).unwrap();
        let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
        let diff = diffs.next().unwrap();
        let root = diff
            .nodes_in()
            .iter()
            .find(|node| node.id == 7u32)
            .copied()
            .unwrap();
        assert_eq!(root.children, [NodeId::from(5u32), NodeId::from(6u32)]);
        assert_eq!(root.time, 1.3);
    }

    #[test]
    fn pools_balance_after_full_iteration() {
        let ts = TreeSequence::create_from(&test_data::three_trees()).unwrap();
        let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
        while diffs.next().is_some() {}
        assert_eq!(diffs.node_pool.allocs(), diffs.node_pool.frees());
        assert_eq!(diffs.list_pool.allocs(), diffs.list_pool.frees());
        assert_eq!(diffs.active_nodes.allocs(), diffs.active_nodes.frees());
        assert!(diffs.node_pool.allocs() > 0);
    }

    #[test]
    fn pools_balance_in_breakpoint_mode() {
        let ts = TreeSequence::create_from(&test_data::two_trees()).unwrap();
        let mut diffs = ts
            .tree_diff_iterator(TreeDiffOptions::ALL_BREAKPOINTS)
            .unwrap();
        while diffs.next().is_some() {}
        assert_eq!(diffs.node_pool.allocs(), diffs.node_pool.frees());
        assert_eq!(diffs.list_pool.allocs(), diffs.list_pool.frees());
        assert_eq!(diffs.active_nodes.allocs(), diffs.active_nodes.frees());
    }

    #[test]
    fn undersized_pools_park_the_iterator() {
        // A sample size of 1 sizes the pools far below what these
        // records need, which must surface as an invariant violation
        // rather than UB or silent truncation.
        let source = test_data::VecSource::new(
            1,
            10,
            vec![0, 10],
            vec![
                CoalescenceRecord::new(0, 10, 5, [1, 2], 0.5),
                CoalescenceRecord::new(0, 10, 6, [3, 4], 0.7),
                CoalescenceRecord::new(0, 10, 7, [5, 6], 1.3),
            ],
        );
        let ts = TreeSequence::create_from(&source).unwrap();
        let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
        assert!(diffs.next().is_none());
        assert!(matches!(
            diffs.error(),
            Some(TreeSequenceError::InvariantViolation(_))
        ));
        // Parked: further stepping stays at end.
        assert!(diffs.next().is_none());
    }

    #[test]
    fn debug_state_renders() {
        let ts = TreeSequence::create_from(&test_data::two_trees()).unwrap();
        let mut diffs = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
        diffs.next();
        let state = format!("{diffs:?}");
        assert!(state.contains("current_left"));
        assert!(state.contains("expiry_keys"));
    }
}
