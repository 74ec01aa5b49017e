use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::arena::{Arena, NIL};
use crate::TreeSequenceError;

const MAX_LEVEL: usize = 16;

/// Skiplist node. `item` is an opaque payload handle owned by the
/// caller; `prev` is the level-0 predecessor (`NIL` when first).
pub(crate) struct MapNode {
    key: u32,
    item: u32,
    level: u8,
    prev: u32,
    next: [u32; MAX_LEVEL],
}

impl Default for MapNode {
    fn default() -> Self {
        MapNode {
            key: 0,
            item: NIL,
            level: 0,
            prev: NIL,
            next: [NIL; MAX_LEVEL],
        }
    }
}

/// Strictly ordered map from `u32` keys to opaque `u32` payloads,
/// backed by a fixed-capacity node pool.
///
/// Duplicate keys are rejected. Nodes are addressed by pool handle;
/// `head`/`next`/`prev` give ordered traversal in both directions.
pub(crate) struct OrderedMap {
    nodes: Arena<MapNode>,
    head: [u32; MAX_LEVEL],
    len: usize,
    rng: StdRng,
}

impl OrderedMap {
    pub fn with_capacity(capacity: usize) -> Result<Self, TreeSequenceError> {
        Ok(OrderedMap {
            nodes: Arena::with_capacity(capacity)?,
            head: [NIL; MAX_LEVEL],
            len: 0,
            rng: StdRng::seed_from_u64(0),
        })
    }

    fn next_at(&self, at: u32, level: usize) -> u32 {
        if at == NIL {
            self.head[level]
        } else {
            self.nodes[at].next[level]
        }
    }

    fn set_next(&mut self, at: u32, level: usize, target: u32) {
        if at == NIL {
            self.head[level] = target;
        } else {
            self.nodes[at].next[level] = target;
        }
    }

    /// Per level, the handle of the last node with key strictly less
    /// than `key` (`NIL` meaning the list head).
    fn predecessors(&self, key: u32) -> [u32; MAX_LEVEL] {
        let mut preds = [NIL; MAX_LEVEL];
        let mut at = NIL;
        for level in (0..MAX_LEVEL).rev() {
            loop {
                let next = self.next_at(at, level);
                if next != NIL && self.nodes[next].key < key {
                    at = next;
                } else {
                    break;
                }
            }
            preds[level] = at;
        }
        preds
    }

    fn random_level(&mut self) -> u8 {
        let mut level = 1u8;
        while (level as usize) < MAX_LEVEL && self.rng.gen::<bool>() {
            level += 1;
        }
        level
    }

    pub fn search(&self, key: u32) -> Option<u32> {
        let preds = self.predecessors(key);
        let found = self.next_at(preds[0], 0);
        (found != NIL && self.nodes[found].key == key).then_some(found)
    }

    /// Insert `key -> item`, returning the new node handle. Fails on a
    /// duplicate key or when the node pool is exhausted.
    pub fn insert(&mut self, key: u32, item: u32) -> Result<u32, TreeSequenceError> {
        let preds = self.predecessors(key);
        let found = self.next_at(preds[0], 0);
        if found != NIL && self.nodes[found].key == key {
            return Err(TreeSequenceError::InvariantViolation(
                "duplicate key in ordered map",
            ));
        }
        let level = self.random_level();
        let handle = self
            .nodes
            .alloc(MapNode {
                key,
                item,
                level,
                prev: preds[0],
                next: [NIL; MAX_LEVEL],
            })
            .ok_or(TreeSequenceError::InvariantViolation(
                "ordered map pool exhausted",
            ))?;
        for l in 0..level as usize {
            let next = self.next_at(preds[l], l);
            self.nodes[handle].next[l] = next;
            self.set_next(preds[l], l, handle);
        }
        let succ = self.nodes[handle].next[0];
        if succ != NIL {
            self.nodes[succ].prev = handle;
        }
        self.len += 1;
        Ok(handle)
    }

    /// Unlink `key` and return its payload, or `None` if absent.
    pub fn remove(&mut self, key: u32) -> Option<u32> {
        let preds = self.predecessors(key);
        let handle = self.next_at(preds[0], 0);
        if handle == NIL || self.nodes[handle].key != key {
            return None;
        }
        let level = self.nodes[handle].level as usize;
        for l in 0..level {
            debug_assert_eq!(self.next_at(preds[l], l), handle);
            let next = self.nodes[handle].next[l];
            self.set_next(preds[l], l, next);
        }
        let succ = self.nodes[handle].next[0];
        if succ != NIL {
            self.nodes[succ].prev = preds[0];
        }
        let item = self.nodes[handle].item;
        self.nodes.free(handle);
        self.len -= 1;
        Some(item)
    }

    /// Handle of the smallest key.
    pub fn head(&self) -> Option<u32> {
        (self.head[0] != NIL).then_some(self.head[0])
    }

    pub fn next(&self, handle: u32) -> Option<u32> {
        let next = self.nodes[handle].next[0];
        (next != NIL).then_some(next)
    }

    pub fn prev(&self, handle: u32) -> Option<u32> {
        let prev = self.nodes[handle].prev;
        (prev != NIL).then_some(prev)
    }

    pub fn key(&self, handle: u32) -> u32 {
        self.nodes[handle].key
    }

    pub fn item(&self, handle: u32) -> u32 {
        self.nodes[handle].item
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn allocs(&self) -> u64 {
        self.nodes.allocs()
    }

    pub fn frees(&self) -> u64 {
        self.nodes.frees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn collect(map: &OrderedMap) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut cursor = map.head();
        while let Some(h) = cursor {
            out.push((map.key(h), map.item(h)));
            cursor = map.next(h);
        }
        out
    }

    #[test]
    fn insert_search_remove() {
        let mut map = OrderedMap::with_capacity(8).unwrap();
        for key in [40u32, 10, 30, 20] {
            map.insert(key, key + 1).unwrap();
        }
        assert_eq!(map.len(), 4);
        assert_eq!(collect(&map), vec![(10, 11), (20, 21), (30, 31), (40, 41)]);
        let h = map.search(30).unwrap();
        assert_eq!(map.key(h), 30);
        assert_eq!(map.item(h), 31);
        assert!(map.search(25).is_none());
        assert_eq!(map.remove(30), Some(31));
        assert_eq!(map.remove(30), None);
        assert_eq!(collect(&map), vec![(10, 11), (20, 21), (40, 41)]);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut map = OrderedMap::with_capacity(4).unwrap();
        map.insert(5, 0).unwrap();
        assert!(map.insert(5, 1).is_err());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn backward_traversal() {
        let mut map = OrderedMap::with_capacity(8).unwrap();
        for key in [3u32, 1, 2] {
            map.insert(key, 0).unwrap();
        }
        let tail = {
            let mut h = map.head().unwrap();
            while let Some(n) = map.next(h) {
                h = n;
            }
            h
        };
        assert_eq!(map.key(tail), 3);
        let mid = map.prev(tail).unwrap();
        assert_eq!(map.key(mid), 2);
        let first = map.prev(mid).unwrap();
        assert_eq!(map.key(first), 1);
        assert!(map.prev(first).is_none());
    }

    #[test]
    fn exhaustion_reported() {
        let mut map = OrderedMap::with_capacity(1).unwrap();
        map.insert(1, 0).unwrap();
        assert!(matches!(
            map.insert(2, 0),
            Err(TreeSequenceError::InvariantViolation(_))
        ));
    }

    proptest! {
        #[test]
        fn matches_btreemap_model(
            ops in prop::collection::vec((0u32..64, 0u32..1000, any::<bool>()), 1..200)
        ) {
            let mut map = OrderedMap::with_capacity(64).unwrap();
            let mut model: BTreeMap<u32, u32> = BTreeMap::new();
            for (key, item, is_insert) in ops {
                if is_insert {
                    let inserted = map.insert(key, item);
                    if model.contains_key(&key) {
                        prop_assert!(inserted.is_err());
                    } else {
                        prop_assert!(inserted.is_ok());
                        model.insert(key, item);
                    }
                } else {
                    prop_assert_eq!(map.remove(key), model.remove(&key));
                }
                prop_assert_eq!(map.len(), model.len());
            }
            let want: Vec<(u32, u32)> = model.iter().map(|(&k, &v)| (k, v)).collect();
            prop_assert_eq!(collect(&map), want);
        }
    }
}
