//! Children of a declaration ordered by starting bit.

use std::collections::BTreeMap;

use crate::DeclId;

/// Bit offset → declarations starting there.
///
/// A node normally holds one identity; overlapping parents and zero-sized
/// children put several at the same offset. Empty nodes are pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetIndex {
    nodes: BTreeMap<u64, Vec<DeclId>>,
}

impl OffsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, offset: u64, id: DeclId) {
        let node = self.nodes.entry(offset).or_default();
        if !node.contains(&id) {
            node.push(id);
        }
    }

    /// Removes `id` from the node at `offset`. Returns `false` if it was not there.
    pub fn remove(&mut self, offset: u64, id: DeclId) -> bool {
        let Some(node) = self.nodes.get_mut(&offset) else {
            return false;
        };
        let Some(pos) = node.iter().position(|d| *d == id) else {
            return false;
        };
        node.remove(pos);
        if node.is_empty() {
            self.nodes.remove(&offset);
        }
        true
    }

    pub fn at(&self, offset: u64) -> &[DeclId] {
        self.nodes.get(&offset).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The node with the greatest offset.
    pub fn tail(&self) -> Option<(u64, &[DeclId])> {
        self.nodes
            .last_key_value()
            .map(|(offset, ids)| (*offset, ids.as_slice()))
    }

    /// The nearest node strictly before `offset`.
    pub fn predecessor(&self, offset: u64) -> Option<(u64, &[DeclId])> {
        self.nodes
            .range(..offset)
            .next_back()
            .map(|(offset, ids)| (*offset, ids.as_slice()))
    }

    /// Every `(offset, id)` pair in offset order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u64, DeclId)> + '_ {
        self.nodes
            .iter()
            .flat_map(|(offset, ids)| ids.iter().map(move |id| (*offset, *id)))
    }

    /// Pairs starting at or after `offset`.
    pub fn from(&self, offset: u64) -> impl Iterator<Item = (u64, DeclId)> + '_ {
        self.nodes
            .range(offset..)
            .flat_map(|(offset, ids)| ids.iter().map(move |id| (*offset, *id)))
    }

    pub fn len(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First child whose bits would overlap `start..end`, ignoring `exclude`.
    ///
    /// Zero-sized ranges only conflict when they fall strictly inside another
    /// range; touching at an edge is fine. Assumes existing children do not
    /// overlap each other, so the backward walk stops at the first sized child
    /// that ends at or before `start`. The first failing `size_of` aborts the
    /// walk.
    pub fn conflicts<E>(
        &self,
        start: u64,
        end: u64,
        size_of: impl Fn(DeclId) -> Result<u64, E>,
        exclude: Option<DeclId>,
    ) -> Result<Option<DeclId>, E> {
        for (offset, ids) in self.nodes.range(..end.max(start + 1)).rev() {
            let mut passed = false;
            for id in ids {
                if Some(*id) == exclude {
                    continue;
                }
                let size = size_of(*id)?;
                if overlapping(start, end, *offset, *offset + size) {
                    return Ok(Some(*id));
                }
                if size > 0 && *offset + size <= start {
                    passed = true;
                }
            }
            if passed {
                break;
            }
        }
        Ok(None)
    }
}

fn overlapping(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
    match (a_start == a_end, b_start == b_end) {
        (false, false) => a_start < b_end && b_start < a_end,
        (true, false) => b_start < a_start && a_start < b_end,
        (false, true) => a_start < b_start && b_start < a_end,
        (true, true) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn ids(n: usize) -> Vec<DeclId> {
        let mut arena = Arena::default();
        (0..n).map(|_| DeclId(arena.insert(()))).collect()
    }

    #[test]
    fn insert_remove_prunes() {
        let d = ids(2);
        let mut index = OffsetIndex::new();
        index.insert(8, d[0]);
        index.insert(8, d[1]);
        assert_eq!(index.at(8), &[d[0], d[1]]);

        assert!(index.remove(8, d[0]));
        assert!(!index.remove(8, d[0]));
        assert!(index.remove(8, d[1]));
        assert!(index.is_empty());
        assert_eq!(index.at(8), &[] as &[DeclId]);
    }

    #[test]
    fn tail_and_predecessor() {
        let d = ids(3);
        let mut index = OffsetIndex::new();
        index.insert(0, d[0]);
        index.insert(8, d[1]);
        index.insert(24, d[2]);

        assert_eq!(index.tail(), Some((24, &[d[2]][..])));
        assert_eq!(index.predecessor(24), Some((8, &[d[1]][..])));
        assert_eq!(index.predecessor(0), None);
        assert_eq!(index.from(8).map(|(o, _)| o).collect::<Vec<_>>(), vec![8, 24]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn conflict_rules() {
        let d = ids(3);
        let mut index = OffsetIndex::new();
        index.insert(0, d[0]); // 0..8
        index.insert(8, d[1]); // 8..8
        index.insert(16, d[2]); // 16..32
        let size = |id: DeclId| -> Result<u64, ()> {
            Ok(if id == d[0] { 8 } else if id == d[1] { 0 } else { 16 })
        };

        assert_eq!(index.conflicts(8, 16, size, None), Ok(None));
        assert_eq!(index.conflicts(4, 8, size, None), Ok(Some(d[0])));
        assert_eq!(index.conflicts(6, 10, size, None), Ok(Some(d[1])));
        assert_eq!(index.conflicts(20, 20, size, None), Ok(Some(d[2])));
        assert_eq!(index.conflicts(16, 16, size, None), Ok(None));
        assert_eq!(index.conflicts(32, 40, size, None), Ok(None));
        assert_eq!(index.conflicts(12, 24, size, Some(d[2])), Ok(None));
    }

    #[test]
    fn conflict_walk_reports_size_failures() {
        let d = ids(2);
        let mut index = OffsetIndex::new();
        index.insert(0, d[0]);
        index.insert(8, d[1]);
        let size = |id: DeclId| if id == d[1] { Err(id) } else { Ok(8) };

        assert_eq!(index.conflicts(12, 16, size, None), Err(d[1]));
        assert_eq!(index.conflicts(4, 6, size, Some(d[1])), Ok(Some(d[0])));
    }
}
