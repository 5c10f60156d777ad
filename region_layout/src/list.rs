//! Ordered, packed sequences of declarations.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    DeclArgs, DeclId, Kind, Layout, LayoutError, Result,
    layout::{Detach, Shift, wrong_kind},
};

/// Entries of a list (or of a mapping) in order.
///
/// Each entry starts at the aligned end of the previous one, unless the
/// container overlaps, in which case every entry starts at zero.
#[derive(Debug, Clone, Default)]
pub struct ListSpec {
    pub(crate) entries: Vec<DeclId>,
    /// Resolved size hints, target to hint.
    pub(crate) hints: HashMap<DeclId, DeclId>,
    /// Hints whose target is not reachable yet.
    pub(crate) pending: Vec<DeclId>,
}

impl ListSpec {
    pub fn entries(&self) -> &[DeclId] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hint_for(&self, target: DeclId) -> Option<DeclId> {
        self.hints.get(&target).copied()
    }
}

impl Layout {
    pub fn list(&mut self, args: DeclArgs) -> DeclId {
        self.create(Kind::List(ListSpec::default()), args)
    }

    pub(crate) fn list_spec(&self, id: DeclId) -> Result<&ListSpec> {
        let kind = &self.decl(id)?.kind;
        kind.list().ok_or_else(|| wrong_kind(id, "list", kind))
    }

    fn plain_list(&self, id: DeclId) -> Result<&ListSpec> {
        match &self.decl(id)?.kind {
            Kind::List(list) => Ok(list),
            other => Err(wrong_kind(id, "list", other)),
        }
    }

    pub fn entries(&self, list: DeclId) -> Result<&[DeclId]> {
        Ok(self.list_spec(list)?.entries())
    }

    pub fn entry_decl(&self, list: DeclId, index: usize) -> Result<DeclId> {
        let spec = self.list_spec(list)?;
        spec.entries
            .get(index)
            .copied()
            .ok_or(LayoutError::IndexOutOfRange {
                decl: list,
                index: index as u64,
                len: spec.entries.len() as u64,
            })
    }

    /// Adds `child` after the last entry. Returns its offset.
    pub fn append(&mut self, list: DeclId, child: DeclId) -> Result<u64> {
        self.ensure_unbound(list)?;
        let len = self.plain_list(list)?.len();
        self.insert_entry(list, len, child, None)
    }

    /// Inserts `child` before entry `index`, pushing later entries back.
    pub fn insert(&mut self, list: DeclId, index: usize, child: DeclId) -> Result<u64> {
        self.ensure_unbound(list)?;
        self.plain_list(list)?;
        self.insert_entry(list, index, child, None)
    }

    /// Removes entry `index` and closes the gap. The detached declaration is
    /// returned and can be declared elsewhere.
    pub fn remove(&mut self, list: DeclId, index: usize) -> Result<DeclId> {
        self.ensure_unbound(list)?;
        self.plain_list(list)?;
        self.remove_entry(list, index)
    }

    /// Moves entry `from` so that it ends up at index `to`, carrying its bits.
    pub fn move_entry(&mut self, list: DeclId, from: usize, to: usize) -> Result<()> {
        self.ensure_unbound(list)?;
        let len = self.list_spec(list)?.len();
        for index in [from, to] {
            if index >= len {
                return Err(LayoutError::IndexOutOfRange {
                    decl: list,
                    index: index as u64,
                    len: len as u64,
                });
            }
        }
        if from == to {
            return Ok(());
        }

        let child = self.entry_decl(list, from)?;
        let size = self.bits_of(child)?;
        let snapshot = match self.decl(child)?.position {
            Some(position) if !self.settling => Some(self.load(position, size)?),
            _ => None,
        };
        let name = self
            .decl(list)?
            .kind
            .mapping()
            .and_then(|m| m.names.get(from).cloned())
            .flatten();

        let frontier = self.prev_end(list, from)?;
        self.detach(list, child, Detach::Move)?;
        self.take_entry(list, from)?;
        self.close_gap(list, from, frontier, size)?;

        self.insert_entry(list, to, child, name)?;
        if let (Some(bits), Some(position)) = (snapshot, self.decl(child)?.position) {
            self.store(position, &bits)?;
        }
        debug!(%list, %child, from, to, "moved entry");
        self.refit(list)
    }

    /// End of the entry before `index`, where entry `index` would start.
    pub(crate) fn prev_end(&self, list: DeclId, index: usize) -> Result<u64> {
        if index == 0 {
            return Ok(0);
        }
        let previous = self.entry_decl(list, index - 1)?;
        Ok(self.offset_of(list, previous)? + self.bits_of(previous)?)
    }

    pub(crate) fn insert_entry(
        &mut self,
        parent: DeclId,
        index: usize,
        child: DeclId,
        name: Option<String>,
    ) -> Result<u64> {
        let len = self.list_spec(parent)?.len();
        if index > len {
            return Err(LayoutError::IndexOutOfRange {
                decl: parent,
                index: index as u64,
                len: len as u64,
            });
        }
        self.check_adoptable(parent, child)?;

        let overlaps = self.decl(parent)?.args.overlaps;
        let start = if overlaps {
            0
        } else {
            let start = self.alignment_of(child)?.align(self.prev_end(parent, index)?);
            if index < len {
                let size = self.size(child)?;
                let followers = self.list_spec(parent)?.entries[index..].to_vec();
                self.cascade(parent, &followers, start + size, Shift::Grow(size), true)?;
            }
            start
        };

        let offset = self.declare_inner(parent, child, Some(start))?;
        let decl = self.decl_mut(parent)?;
        if let Some(mapping) = decl.kind.mapping_mut() {
            mapping.names.insert(index, name);
        }
        if let Some(list) = decl.kind.list_mut() {
            list.entries.insert(index, child);
        }
        self.refresh_lookups(parent)?;
        self.track_hints(parent, child)?;
        Ok(offset)
    }

    pub(crate) fn remove_entry(&mut self, parent: DeclId, index: usize) -> Result<DeclId> {
        let child = self.entry_decl(parent, index)?;
        let size = self.bits_of(child)?;
        let frontier = self.prev_end(parent, index)?;

        self.detach(parent, child, Detach::Remove)?;
        self.take_entry(parent, index)?;
        self.close_gap(parent, index, frontier, size)?;
        self.refresh_lookups(parent)?;
        self.refit(parent)?;
        debug!(%parent, %child, index, "removed entry");
        Ok(child)
    }

    fn take_entry(&mut self, parent: DeclId, index: usize) -> Result<()> {
        let decl = self.decl_mut(parent)?;
        if let Some(mapping) = decl.kind.mapping_mut() {
            mapping.names.remove(index);
        }
        if let Some(list) = decl.kind.list_mut() {
            list.entries.remove(index);
        }
        Ok(())
    }

    /// Pulls the entries from `index` on back to `frontier`.
    fn close_gap(&mut self, parent: DeclId, index: usize, frontier: u64, size: u64) -> Result<()> {
        if self.decl(parent)?.args.overlaps {
            return Ok(());
        }
        let followers = self.list_spec(parent)?.entries[index..].to_vec();
        self.cascade(parent, &followers, frontier, Shift::Shrink(size), true)
    }
}
