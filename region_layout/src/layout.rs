//! The declaration engine: placement, the resize cascade and rebasing.

use packed_bits::{Bits, covering_bytes};
use raw_bytes::{Allocator, Heap};
use tracing::{debug, trace};

use crate::{
    Alignment, ArgValue, DeclArgs, DeclId, Declaration, Event, Kind, LayoutError, Position, Region,
    Result,
    arena::Arena,
    event::{Listener, Listeners},
    numeric::validate_width,
};

/// Direction and amount of a cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shift {
    Grow(u64),
    Shrink(u64),
}

/// Why a child is being detached from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detach {
    /// Gone for good: bits cleared, regions invalidated.
    Remove,
    /// About to be re-declared elsewhere in the same parent.
    Move,
}

/// Owns every declaration and region, and the storage they are bound to.
///
/// All operations take identities ([`DeclId`], [`RegionId`](crate::RegionId))
/// rather than references, so that a size change anywhere in a tree can
/// reach siblings, parents and live regions without shared ownership.
#[derive(Debug)]
pub struct Layout {
    pub(crate) decls: Arena<Declaration>,
    pub(crate) regions: Arena<Region>,
    pub(crate) storage: Box<dyn Allocator>,
    pub(crate) listeners: Listeners,
    /// Parse mode: cascades recompute offsets without touching bytes.
    pub(crate) settling: bool,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(Box::new(Heap::new()))
    }
}

pub(crate) fn wrong_kind(decl: DeclId, expected: &'static str, kind: &Kind) -> LayoutError {
    LayoutError::WrongKind {
        decl,
        expected,
        actual: kind.name(),
    }
}

impl Layout {
    pub fn new(storage: Box<dyn Allocator>) -> Self {
        Self {
            decls: Arena::default(),
            regions: Arena::default(),
            storage,
            listeners: Listeners::default(),
            settling: false,
        }
    }

    pub fn storage(&self) -> &dyn Allocator {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut dyn Allocator {
        self.storage.as_mut()
    }

    /// Number of live declarations.
    pub fn declaration_count(&self) -> usize {
        self.decls.len()
    }

    pub fn declaration(&self, id: DeclId) -> Result<&Declaration> {
        self.decl(id)
    }

    pub fn contains(&self, id: DeclId) -> bool {
        self.decls.contains(id.0)
    }

    pub(crate) fn decl(&self, id: DeclId) -> Result<&Declaration> {
        self.decls.get(id.0).ok_or(LayoutError::StaleDeclaration(id))
    }

    pub(crate) fn decl_mut(&mut self, id: DeclId) -> Result<&mut Declaration> {
        self.decls
            .get_mut(id.0)
            .ok_or(LayoutError::StaleDeclaration(id))
    }

    pub(crate) fn create(&mut self, kind: Kind, args: DeclArgs) -> DeclId {
        DeclId(self.decls.insert(Declaration::new(kind, args)))
    }

    //
    // -------------------------------------------------------------------------
    // Builders
    // -------------------------------------------------------------------------

    /// Opaque bits (`args.bitspan`), or a container for explicitly placed
    /// subregions.
    pub fn raw(&mut self, args: DeclArgs) -> DeclId {
        self.create(Kind::Raw, args)
    }

    pub fn numeric(&mut self, spec: crate::NumericSpec) -> Result<DeclId> {
        self.numeric_with(spec, DeclArgs::default())
    }

    pub fn numeric_with(&mut self, spec: crate::NumericSpec, args: DeclArgs) -> Result<DeclId> {
        spec.validate()?;
        Ok(self.create(Kind::Numeric(spec), args))
    }

    /// Unsigned big-endian field of `bits` bits.
    pub fn bitfield(&mut self, bits: u32) -> Result<DeclId> {
        self.numeric(crate::NumericSpec::bitfield(bits))
    }

    pub fn listen(&mut self, decl: DeclId, listener: impl FnMut(&Event) + 'static) {
        self.listeners.add(decl, Box::new(listener) as Listener);
    }

    pub fn listen_all(&mut self, listener: impl FnMut(&Event) + 'static) {
        self.listeners.add_global(Box::new(listener));
    }

    //
    // -------------------------------------------------------------------------
    // Size and alignment
    // -------------------------------------------------------------------------

    /// Size in bits, computed on first use and cached.
    pub fn size(&mut self, id: DeclId) -> Result<u64> {
        if let Some(size) = self.decl(id)?.size {
            return Ok(size);
        }
        let size = self.declarative_size(id)?;
        self.decl_mut(id)?.size = Some(size);
        Ok(size)
    }

    /// Cached size, or the declarative size without caching it.
    pub(crate) fn bits_of(&self, id: DeclId) -> Result<u64> {
        match self.decl(id)?.size {
            Some(size) => Ok(size),
            None => self.declarative_size(id),
        }
    }

    /// Size implied by the kind and the children: the numeric width, the
    /// element count times the stride, or the end of the last child (never
    /// less than an explicit `bitspan`).
    pub fn declarative_size(&self, id: DeclId) -> Result<u64> {
        let decl = self.decl(id)?;
        Ok(match &decl.kind {
            Kind::Numeric(spec) => spec.bits as u64,
            Kind::SizeHint(hint) => hint.numeric().bits as u64,
            Kind::Array(array) => array.elements * self.stride_of(array.base)?,
            Kind::Raw | Kind::List(_) | Kind::Mapping(_) => {
                decl.args.bitspan.unwrap_or(0).max(self.extent(id)?)
            }
        })
    }

    /// End of the furthest child.
    pub fn extent(&self, id: DeclId) -> Result<u64> {
        let mut end = 0;
        for (offset, child) in self.decl(id)?.offset_index.iter() {
            end = end.max(offset + self.bits_of(child)?);
        }
        Ok(end)
    }

    /// Explicit alignment, else byte alignment for composites and whole-byte
    /// leaves, bit alignment for everything else.
    pub fn alignment_of(&self, id: DeclId) -> Result<Alignment> {
        let decl = self.decl(id)?;
        if let Some(alignment) = decl.args.alignment {
            return Ok(alignment);
        }
        if decl.kind.is_composite() || self.bits_of(id)? % 8 == 0 {
            Ok(Alignment::Byte)
        } else {
            Ok(Alignment::Bit)
        }
    }

    pub(crate) fn stride_of(&self, base: DeclId) -> Result<u64> {
        Ok(self.alignment_of(base)?.align(self.bits_of(base)?))
    }

    pub fn offset_of(&self, parent: DeclId, child: DeclId) -> Result<u64> {
        self.decl(parent)?
            .offset_of(child)
            .ok_or(LayoutError::NotASubregion { parent, child })
    }

    /// Offset right after the last child.
    fn next_free(&self, parent: DeclId) -> Result<u64> {
        let Some((offset, ids)) = self.decl(parent)?.offset_index.tail() else {
            return Ok(0);
        };
        let mut end = offset;
        for id in ids {
            end = end.max(offset + self.bits_of(*id)?);
        }
        Ok(end)
    }

    fn conflict(
        &self,
        parent: DeclId,
        start: u64,
        end: u64,
        exclude: Option<DeclId>,
    ) -> Result<Option<DeclId>> {
        let index = &self.decl(parent)?.offset_index;
        index.conflicts(start, end, |id| self.bits_of(id), exclude)
    }

    //
    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    pub(crate) fn root_of(&self, id: DeclId) -> Result<DeclId> {
        let mut cursor = id;
        while let Some(parent) = self.decl(cursor)?.parent {
            cursor = parent;
        }
        Ok(cursor)
    }

    /// Fails if the tree holding `id` is bound to a region that froze its
    /// field lists.
    pub(crate) fn ensure_unbound(&self, id: DeclId) -> Result<()> {
        let root = self.root_of(id)?;
        if let Some(region) = self.decl(root)?.instance {
            if self.regions.get(region.0).is_some_and(|r| r.bound) {
                return Err(LayoutError::Bound(id));
            }
        }
        Ok(())
    }

    pub(crate) fn check_adoptable(&self, parent: DeclId, child: DeclId) -> Result<()> {
        self.decl(parent)?;
        let decl = self.decl(child)?;
        if let Some(owner) = decl.parent.or(decl.template_of) {
            return Err(LayoutError::AlreadyDeclared(child, owner));
        }
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(LayoutError::Cycle { parent, child });
            }
            cursor = self.decl(id)?.parent;
        }
        Ok(())
    }

    fn register(&mut self, parent: DeclId, child: DeclId, offset: u64) -> Result<()> {
        let decl = self.decl_mut(parent)?;
        decl.subregions.insert(child);
        decl.subregion_offsets.insert(child, offset);
        decl.offset_index.insert(offset, child);
        self.decl_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn unregister(&mut self, parent: DeclId, child: DeclId) -> Result<u64> {
        let decl = self.decl_mut(parent)?;
        let offset = decl
            .subregion_offsets
            .remove(&child)
            .ok_or(LayoutError::NotASubregion { parent, child })?;
        decl.subregions.remove(&child);
        decl.offset_index.remove(offset, child);
        self.decl_mut(child)?.parent = None;
        Ok(offset)
    }

    /// Places `child` inside a raw container, or appends it to a list.
    ///
    /// With no offset the child goes right after the current tail; a given
    /// offset is rounded up to the child's alignment. Returns the offset used.
    pub fn declare_subregion(
        &mut self,
        parent: DeclId,
        child: DeclId,
        offset: Option<u64>,
    ) -> Result<u64> {
        self.ensure_unbound(parent)?;
        match &self.decl(parent)?.kind {
            Kind::Raw => self.declare_inner(parent, child, offset),
            Kind::List(_) if offset.is_none() => self.append(parent, child),
            other => Err(wrong_kind(parent, "raw region", other)),
        }
    }

    pub(crate) fn declare_inner(
        &mut self,
        parent: DeclId,
        child: DeclId,
        offset: Option<u64>,
    ) -> Result<u64> {
        self.check_adoptable(parent, child)?;
        let size = self.size(child)?;
        let alignment = self.alignment_of(child)?;
        let overlaps = self.decl(parent)?.args.overlaps;

        let offset = match offset {
            Some(offset) => alignment.align(offset),
            None if overlaps => 0,
            None => alignment.align(self.next_free(parent)?),
        };
        if !overlaps {
            if let Some(existing) = self.conflict(parent, offset, offset + size, None)? {
                return Err(LayoutError::Overlap {
                    parent,
                    child,
                    offset,
                    existing,
                });
            }
        }

        let parent_size = self.size(parent)?;
        self.register(parent, child, offset)?;
        let end = offset + size;
        if end > parent_size {
            if let Err(err) = self.resize_decl(parent, end) {
                self.unregister(parent, child)?;
                return Err(err);
            }
        }
        if let Some(position) = self.decl(parent)?.position {
            self.rebase(child, position.advance(offset))?;
        }

        debug!(%parent, %child, offset, size, "declared subregion");
        self.notify(Event::SubregionAdded {
            parent,
            child,
            offset,
        });
        Ok(offset)
    }

    /// Detaches `child`. Lists close the gap; raw containers do so only when
    /// declared with `shrink`. Live regions of the child are invalidated.
    pub fn remove_subregion(&mut self, parent: DeclId, child: DeclId) -> Result<()> {
        self.ensure_unbound(parent)?;
        self.remove_child(parent, child)
    }

    pub(crate) fn remove_child(&mut self, parent: DeclId, child: DeclId) -> Result<()> {
        if self.decl(child)?.parent != Some(parent) {
            return Err(LayoutError::NotASubregion { parent, child });
        }

        let decl = self.decl(parent)?;
        if let Some(list) = decl.kind.list() {
            let index = list
                .entries
                .iter()
                .position(|e| *e == child)
                .ok_or(LayoutError::NotASubregion { parent, child })?;
            return self.remove_entry(parent, index).map(|_| ());
        }
        if let Kind::Array(_) = decl.kind {
            self.detach(parent, child, Detach::Remove)?;
            if let Some(array) = self.decl_mut(parent)?.kind.array_mut() {
                array.declared.retain(|_, element| *element != child);
            }
            return Ok(());
        }

        let shrink = decl.args.shrink;
        let size = self.bits_of(child)?;
        let offset = self.detach(parent, child, Detach::Remove)?;
        if shrink {
            let followers: Vec<DeclId> = self
                .decl(parent)?
                .offset_index
                .from(offset)
                .map(|(_, id)| id)
                .collect();
            self.cascade(parent, &followers, offset, Shift::Shrink(size), false)?;
        }
        self.refit(parent)
    }

    pub(crate) fn detach(&mut self, parent: DeclId, child: DeclId, mode: Detach) -> Result<u64> {
        let size = self.bits_of(child)?;
        if !self.settling {
            if let Some(position) = self.decl(child)?.position {
                self.zero_at(position, size)?;
            }
        }
        if mode == Detach::Remove {
            self.forget_hints(parent, child)?;
        }
        let offset = self.unregister(parent, child)?;
        if mode == Detach::Remove {
            self.dematerialize(child)?;
        }

        debug!(%parent, %child, offset, ?mode, "detached subregion");
        self.notify(Event::SubregionRemoved {
            parent,
            child,
            offset,
        });
        Ok(offset)
    }

    /// Moves a child of a raw container to a new (aligned) offset, carrying
    /// its bits along.
    pub fn move_subregion(&mut self, parent: DeclId, child: DeclId, offset: u64) -> Result<u64> {
        self.ensure_unbound(parent)?;
        let decl = self.decl(parent)?;
        if !matches!(decl.kind, Kind::Raw) {
            return Err(wrong_kind(parent, "raw region", &decl.kind));
        }
        let overlaps = decl.args.overlaps;
        self.offset_of(parent, child)?;

        let to = self.alignment_of(child)?.align(offset);
        let end = to + self.bits_of(child)?;
        if !overlaps {
            if let Some(existing) = self.conflict(parent, to, end, Some(child))? {
                return Err(LayoutError::Overlap {
                    parent,
                    child,
                    offset: to,
                    existing,
                });
            }
        }
        if end > self.size(parent)? {
            self.resize_decl(parent, end)?;
        }
        self.relocate(parent, child, to)?;
        self.refit(parent)?;
        Ok(to)
    }

    /// Drops a declaration and its whole subtree. Regions bound to any of them
    /// are invalidated; storage owned by a root region is freed.
    pub fn drop_declaration(&mut self, id: DeclId) -> Result<()> {
        let decl = self.decl(id)?;
        if let Some(array) = decl.template_of {
            return Err(LayoutError::AlreadyDeclared(id, array));
        }
        match decl.parent {
            Some(parent) => {
                self.ensure_unbound(parent)?;
                self.remove_child(parent, id)?;
            }
            None => {
                if let Some(region) = decl.instance {
                    self.release(region)?;
                }
            }
        }
        self.discard(id);
        debug!(%id, "dropped declaration");
        Ok(())
    }

    /// Removes a detached subtree from the arena.
    pub(crate) fn discard(&mut self, id: DeclId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(decl) = self.decls.remove(current.0) else {
                continue;
            };
            if let Some(region) = decl.instance.and_then(|r| self.regions.get_mut(r.0)) {
                region.invalidated = true;
                region.declaration = None;
            }
            stack.extend(decl.subregions.iter().copied());
            if let Some(array) = decl.kind.array() {
                stack.push(array.base);
            }
            self.listeners.forget(current);
        }
    }

    /// Deep copy of a subtree; the copy is unattached and unbound.
    pub fn clone_tree(&mut self, id: DeclId) -> Result<DeclId> {
        let mut map = std::collections::HashMap::new();
        let root = self.clone_node(id, &mut map)?;
        for copy in map.values() {
            self.decl_mut(*copy)?
                .kind
                .remap(|old| map.get(&old).copied().unwrap_or(old));
        }
        Ok(root)
    }

    fn clone_node(
        &mut self,
        id: DeclId,
        map: &mut std::collections::HashMap<DeclId, DeclId>,
    ) -> Result<DeclId> {
        let source = self.decl(id)?;
        let kind = source.kind.clone();
        let args = source.args.clone();
        let size = source.size;
        let template = source.kind.array().map(|array| array.base);
        let children: Vec<(u64, DeclId)> = source.offset_index.iter().collect();

        let copy = self.create(kind, args);
        self.decl_mut(copy)?.size = size;
        map.insert(id, copy);

        for (offset, child) in children {
            let child_copy = self.clone_node(child, map)?;
            self.register(copy, child_copy, offset)?;
        }
        if let Some(base) = template {
            let base_copy = self.clone_node(base, map)?;
            self.decl_mut(base_copy)?.template_of = Some(copy);
        }
        Ok(copy)
    }

    //
    // -------------------------------------------------------------------------
    // Resizing
    // -------------------------------------------------------------------------

    /// Sets the size of a declaration the way its kind allows: numeric width,
    /// a whole number of array elements, or an explicit size for containers
    /// that does not cut any child.
    pub fn resize_declaration(&mut self, id: DeclId, bits: u64) -> Result<()> {
        let decl = self.decl(id)?;
        match &decl.kind {
            Kind::Numeric(spec) => {
                validate_width(bits, spec.endian)?;
                self.resize_decl(id, bits)
            }
            Kind::SizeHint(hint) => {
                validate_width(bits, hint.numeric().endian)?;
                self.resize_decl(id, bits)
            }
            Kind::Array(array) => {
                let stride = self.stride_of(array.base)?;
                if stride == 0 || bits % stride != 0 {
                    return Err(LayoutError::StrideMismatch {
                        decl: id,
                        bits,
                        stride,
                    });
                }
                self.set_element_count(id, bits / stride)
            }
            Kind::Raw | Kind::List(_) | Kind::Mapping(_) => {
                let extent = self.extent(id)?;
                if bits < extent {
                    return Err(LayoutError::Truncates {
                        decl: id,
                        requested: bits,
                        extent,
                    });
                }
                let previous = self.decl_mut(id)?.args.bitspan.replace(bits);
                let result = self.resize_decl(id, bits);
                if result.is_err() {
                    self.decl_mut(id)?.args.bitspan = previous;
                }
                result
            }
        }
    }

    /// Resizes without kind checks, cascading through the parent or
    /// reallocating the root's storage.
    pub(crate) fn resize_decl(&mut self, id: DeclId, bits: u64) -> Result<()> {
        let decl = self.decl(id)?;
        if let Some(maximum) = decl.args.maximum {
            if bits > maximum {
                return Err(LayoutError::ExceedsMaximum {
                    decl: id,
                    requested: bits,
                    maximum,
                });
            }
        }
        let parent = decl.parent;
        let old = self.size(id)?;
        if old != bits {
            debug!(%id, old, new = bits, "resizing");
            match parent {
                Some(parent) => self.resize_subregion(parent, id, bits)?,
                None => self.resize_root(id, bits)?,
            }
        }
        self.sync_hint_value(id)
    }

    fn resize_subregion(&mut self, parent: DeclId, child: DeclId, bits: u64) -> Result<()> {
        if let Kind::Array(_) = self.decl(parent)?.kind {
            return Err(LayoutError::ElementResize(child));
        }
        let old = self.size(child)?;
        if bits > old {
            self.shift_followers(parent, child, Shift::Grow(bits - old), false)?;
            // the parent must hold the new end before the child is committed
            let end = self.offset_of(parent, child)? + bits;
            if end > self.size(parent)? {
                self.resize_decl(parent, end)?;
            }
        } else {
            if !self.settling {
                if let Some(position) = self.decl(child)?.position {
                    self.zero_at(position.advance(bits), old - bits)?;
                }
            }
            self.shift_followers(parent, child, Shift::Shrink(old - bits), false)?;
        }
        self.set_size(child, bits)?;
        self.refit(parent)
    }

    fn resize_root(&mut self, id: DeclId, bits: u64) -> Result<()> {
        let old = self.size(id)?;
        let decl = self.decl(id)?;
        if let Some(position) = decl.position {
            let (owned, auto_allocate) = decl
                .instance
                .and_then(|r| self.regions.get(r.0))
                .map(|r| (r.allocation.is_some(), r.auto_allocate))
                .unwrap_or((false, true));
            let needed = position.address + (position.bit_shift as u64 + bits).div_ceil(8);
            let current = self.storage.size(position.handle)? as u64;

            if needed > current {
                if !auto_allocate {
                    return Err(LayoutError::AllocationFixed { decl: id, needed });
                }
                debug!(%id, current, needed, "growing storage");
                self.storage.reallocate(position.handle, needed as usize)?;
            } else if bits < old && !self.settling {
                self.zero_at(position.advance(bits), old - bits)?;
                if owned && auto_allocate && needed < current {
                    self.storage.reallocate(position.handle, needed as usize)?;
                }
            }
        }
        self.set_size(id, bits)
    }

    pub(crate) fn set_size(&mut self, id: DeclId, bits: u64) -> Result<()> {
        let old = self.size(id)?;
        let decl = self.decl_mut(id)?;
        decl.size = Some(bits);
        match &mut decl.kind {
            Kind::Numeric(spec) => spec.bits = bits as u32,
            Kind::SizeHint(hint) => hint.numeric.bits = bits as u32,
            _ => {}
        }
        if old != bits {
            self.notify(Event::Resized {
                decl: id,
                old,
                new: bits,
            });
        }
        Ok(())
    }

    /// Brings a container's size back to its declarative size.
    pub(crate) fn refit(&mut self, parent: DeclId) -> Result<()> {
        let decl = self.decl(parent)?;
        if !matches!(decl.kind, Kind::Raw | Kind::List(_) | Kind::Mapping(_)) {
            return Ok(());
        }
        let target = decl.args.bitspan.unwrap_or(0).max(self.extent(parent)?);
        if target != self.size(parent)? {
            self.resize_decl(parent, target)?;
        }
        Ok(())
    }

    /// The resize cascade.
    ///
    /// Moves the siblings after `anchor` (starting with the anchor itself when
    /// `include_anchor`) so that a change of `delta` bits at the anchor's end
    /// leaves no overlap. Growing stops at the first gap large enough;
    /// shrinking only applies to lists and `shrink` containers and never pulls
    /// a sibling onto an earlier one.
    pub fn push_subregions(
        &mut self,
        parent: DeclId,
        anchor: DeclId,
        delta: i64,
        include_anchor: bool,
    ) -> Result<()> {
        let shift = if delta >= 0 {
            Shift::Grow(delta as u64)
        } else {
            Shift::Shrink(delta.unsigned_abs())
        };
        if delta != 0 {
            self.shift_followers(parent, anchor, shift, include_anchor)?;
        }
        self.refit(parent)
    }

    pub(crate) fn shift_followers(
        &mut self,
        parent: DeclId,
        anchor: DeclId,
        shift: Shift,
        include_anchor: bool,
    ) -> Result<()> {
        let decl = self.decl(parent)?;
        if decl.args.overlaps {
            return Ok(());
        }
        let packed = decl.kind.list().is_some();
        if matches!(shift, Shift::Shrink(_)) && !packed && !decl.args.shrink {
            return Ok(());
        }

        let anchor_offset = self.offset_of(parent, anchor)?;
        let followers: Vec<DeclId> = match decl.kind.list() {
            Some(list) => {
                let index = list
                    .entries
                    .iter()
                    .position(|e| *e == anchor)
                    .ok_or(LayoutError::NotASubregion {
                        parent,
                        child: anchor,
                    })?;
                let skip = if include_anchor { index } else { index + 1 };
                list.entries[skip..].to_vec()
            }
            None => decl
                .offset_index
                .from(anchor_offset)
                .map(|(_, id)| id)
                .filter(|id| include_anchor || *id != anchor)
                .collect(),
        };

        let base = if include_anchor {
            anchor_offset
        } else {
            anchor_offset + self.bits_of(anchor)?
        };
        let frontier = match shift {
            Shift::Grow(delta) => base + delta,
            Shift::Shrink(delta) => {
                let floor = self.floor_before(parent, anchor, &followers, include_anchor)?;
                base.saturating_sub(delta).max(floor)
            }
        };
        self.cascade(parent, &followers, frontier, shift, packed)
    }

    /// End of the furthest sibling that neither moves nor is the anchor.
    fn floor_before(
        &self,
        parent: DeclId,
        anchor: DeclId,
        followers: &[DeclId],
        include_anchor: bool,
    ) -> Result<u64> {
        let Some(first) = followers.first() else {
            return Ok(0);
        };
        let limit = self.offset_of(parent, *first)?;
        let mut floor = 0;
        for (offset, id) in self.decl(parent)?.offset_index.iter() {
            if offset > limit {
                break;
            }
            if followers.contains(&id) || (!include_anchor && id == anchor) {
                continue;
            }
            floor = floor.max(offset + self.bits_of(id)?);
        }
        Ok(floor)
    }

    /// Plans and applies the moves of `followers` (in layout order) given the
    /// first free bit `frontier`.
    pub(crate) fn cascade(
        &mut self,
        parent: DeclId,
        followers: &[DeclId],
        frontier: u64,
        shift: Shift,
        packed: bool,
    ) -> Result<()> {
        let mut frontier = frontier;
        let mut moves = Vec::new();
        for &follower in followers {
            let from = self.offset_of(parent, follower)?;
            let size = self.bits_of(follower)?;
            let alignment = self.alignment_of(follower)?;
            let to = match shift {
                Shift::Grow(_) => {
                    if from >= frontier {
                        break;
                    }
                    alignment.align(frontier)
                }
                Shift::Shrink(delta) => {
                    let target = if packed {
                        frontier
                    } else {
                        frontier.max(from.saturating_sub(delta))
                    };
                    let to = alignment.align(target);
                    if to >= from {
                        break;
                    }
                    to
                }
            };
            moves.push((follower, to));
            frontier = to + size;
        }
        if moves.is_empty() {
            return Ok(());
        }

        debug!(%parent, ?shift, moved = moves.len(), "cascading");
        match shift {
            Shift::Grow(_) => {
                let mut needed = 0;
                for (follower, to) in &moves {
                    needed = needed.max(to + self.bits_of(*follower)?);
                }
                if needed > self.size(parent)? {
                    self.resize_decl(parent, needed)?;
                }
                for (follower, to) in moves.into_iter().rev() {
                    self.relocate(parent, follower, to)?;
                }
            }
            Shift::Shrink(_) => {
                for (follower, to) in moves {
                    self.relocate(parent, follower, to)?;
                }
            }
        }
        Ok(())
    }

    /// Moves one child to `to`, carrying its bits unless settling.
    pub(crate) fn relocate(&mut self, parent: DeclId, child: DeclId, to: u64) -> Result<()> {
        let from = self.offset_of(parent, child)?;
        if from == to {
            return Ok(());
        }
        let size = self.bits_of(child)?;
        let base = self.decl(parent)?.position;
        if let Some(base) = base {
            if !self.settling {
                self.move_storage(base.advance(from), base.advance(to), size)?;
            }
        }

        let decl = self.decl_mut(parent)?;
        decl.offset_index.remove(from, child);
        decl.offset_index.insert(to, child);
        decl.subregion_offsets.insert(child, to);
        if let Some(base) = base {
            self.rebase(child, base.advance(to))?;
        }

        trace!(%parent, %child, from, to, "relocated");
        self.notify(Event::SubregionMoved {
            parent,
            child,
            from,
            to,
        });
        Ok(())
    }

    //
    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    /// Places `id` at `position` and every descendant relative to it.
    pub fn rebase(&mut self, id: DeclId, position: Position) -> Result<()> {
        let mut stack = vec![(id, position)];
        while let Some((current, position)) = stack.pop() {
            let decl = self.decl_mut(current)?;
            if decl.position == Some(position) {
                continue;
            }
            decl.position = Some(position);
            stack.extend(
                decl.offset_index
                    .iter()
                    .map(|(offset, child)| (child, position.advance(offset))),
            );
            self.notify(Event::Rebased {
                decl: current,
                address: position.address,
                bit_shift: position.bit_shift,
            });
        }
        Ok(())
    }

    /// Unbinds a subtree from storage and invalidates its regions.
    pub(crate) fn dematerialize(&mut self, id: DeclId) -> Result<()> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let decl = self.decl_mut(current)?;
            decl.position = None;
            let instance = decl.instance.take();
            stack.extend(decl.subregions.iter().copied());
            if let Some(region) = instance.and_then(|r| self.regions.get_mut(r.0)) {
                region.invalidated = true;
            }
        }
        Ok(())
    }

    //
    // -------------------------------------------------------------------------
    // Bits in storage
    // -------------------------------------------------------------------------

    pub(crate) fn load(&self, position: Position, length: u64) -> Result<Bits> {
        if length == 0 {
            return Ok(Bits::zeros(0));
        }
        let shift = position.bit_shift as usize;
        let range = covering_bytes(shift, length as usize);
        let bytes = self.storage.read(
            position.handle,
            position.address as usize + range.start,
            range.len(),
        )?;
        Ok(packed_bits::read_bits(&bytes, shift, length as usize)?)
    }

    pub(crate) fn store(&mut self, position: Position, bits: &Bits) -> Result<()> {
        if bits.is_empty() {
            return Ok(());
        }
        let shift = position.bit_shift as usize;
        let range = covering_bytes(shift, bits.len());
        let address = position.address as usize + range.start;
        let mut bytes = self.storage.read(position.handle, address, range.len())?;
        packed_bits::write_bits(&mut bytes, shift, bits)?;
        self.storage.write(position.handle, address, &bytes)?;
        Ok(())
    }

    pub(crate) fn zero_at(&mut self, position: Position, length: u64) -> Result<()> {
        self.store(position, &Bits::zeros(length as usize))
    }

    /// Read, zero, write: overlapping ranges are handled.
    pub(crate) fn move_storage(&mut self, source: Position, dest: Position, length: u64) -> Result<()> {
        let bits = self.load(source, length)?;
        self.zero_at(source, length)?;
        self.store(dest, &bits)
    }

    //
    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Mirrors size and placement into the live region, then tells listeners.
    pub(crate) fn notify(&mut self, event: Event) {
        match &event {
            Event::Resized { decl, new, .. } => {
                if let Some(region) = self.instance_mut(*decl) {
                    region.size = *new;
                }
            }
            Event::Rebased { decl, .. } => {
                let position = self.decls.get(decl.0).and_then(|d| d.position);
                if let (Some(position), Some(region)) = (position, self.instance_mut(*decl)) {
                    region.handle = position.handle;
                    region.address = position.address;
                    region.bit_shift = position.bit_shift;
                }
            }
            _ => {}
        }
        self.listeners.dispatch(&event);
    }

    fn instance_mut(&mut self, decl: DeclId) -> Option<&mut Region> {
        let region = self.decls.get(decl.0)?.instance?;
        self.regions.get_mut(region.0)
    }

    pub(crate) fn set_argument(&mut self, id: DeclId, name: &str, value: ArgValue) -> Result<()> {
        self.decl_mut(id)?.args.extra.insert(name.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NumericSpec;

    fn byte(layout: &mut Layout) -> DeclId {
        layout.numeric(NumericSpec::u8()).unwrap()
    }

    #[test]
    fn raw_placement_and_conflicts() -> Result<()> {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new());
        let a = byte(&mut layout);
        let b = byte(&mut layout);
        let c = byte(&mut layout);

        assert_eq!(layout.declare_subregion(raw, a, None)?, 0);
        assert_eq!(layout.declare_subregion(raw, b, Some(20))?, 24);
        assert_eq!(layout.size(raw)?, 32);
        // rounded up past b, which ends exactly there
        assert_eq!(layout.declare_subregion(raw, c, Some(28))?, 32);
        assert_eq!(layout.size(raw)?, 40);
        assert_eq!(layout.offset_of(raw, c)?, 32);
        Ok(())
    }

    #[test]
    fn overlapping_declaration_is_rejected() -> Result<()> {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new());
        let a = layout.bitfield(12)?;
        let b = layout.bitfield(4)?;

        layout.declare_subregion(raw, a, None)?;
        let err = layout.declare_subregion(raw, b, Some(8)).unwrap_err();
        assert!(matches!(err, LayoutError::Overlap { offset: 8, existing, .. } if existing == a));
        assert_eq!(err.category(), crate::ErrorCategory::Layout);
        assert_eq!(layout.declaration(b)?.parent(), None);
        Ok(())
    }

    #[test]
    fn maximum_rolls_back_declaration() -> Result<()> {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new().maximum(16));
        let a = byte(&mut layout);
        let b = byte(&mut layout);
        let c = byte(&mut layout);

        layout.declare_subregion(raw, a, None)?;
        layout.declare_subregion(raw, b, None)?;
        assert!(matches!(
            layout.declare_subregion(raw, c, None),
            Err(LayoutError::ExceedsMaximum { requested: 24, maximum: 16, .. })
        ));
        assert_eq!(layout.size(raw)?, 16);
        assert!(layout.declaration(raw)?.offset_index().at(16).is_empty());
        assert_eq!(layout.declaration(c)?.parent(), None);
        Ok(())
    }

    #[test]
    fn cycles_and_double_parents_are_rejected() -> Result<()> {
        let mut layout = Layout::default();
        let outer = layout.raw(DeclArgs::new());
        let inner = layout.raw(DeclArgs::new());
        let other = layout.raw(DeclArgs::new());

        layout.declare_subregion(outer, inner, None)?;
        assert!(matches!(
            layout.declare_subregion(inner, outer, None),
            Err(LayoutError::Cycle { .. })
        ));
        assert!(matches!(
            layout.declare_subregion(other, inner, None),
            Err(LayoutError::AlreadyDeclared(child, owner)) if child == inner && owner == outer
        ));
        Ok(())
    }

    #[test]
    fn shrinking_container_compacts_on_remove() -> Result<()> {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new().shrinking());
        let a = byte(&mut layout);
        let b = byte(&mut layout);
        let c = byte(&mut layout);
        layout.declare_subregion(raw, a, None)?;
        layout.declare_subregion(raw, b, None)?;
        layout.declare_subregion(raw, c, None)?;

        layout.remove_subregion(raw, b)?;
        assert_eq!(layout.offset_of(raw, c)?, 8);
        assert_eq!(layout.size(raw)?, 16);
        Ok(())
    }

    #[test]
    fn plain_container_keeps_gaps_on_remove() -> Result<()> {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new());
        let a = byte(&mut layout);
        let b = byte(&mut layout);
        layout.declare_subregion(raw, a, None)?;
        layout.declare_subregion(raw, b, None)?;

        layout.remove_subregion(raw, a)?;
        assert_eq!(layout.offset_of(raw, b)?, 8);
        assert_eq!(layout.size(raw)?, 16);
        Ok(())
    }

    #[test]
    fn push_subregions_stops_at_gap() -> Result<()> {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new());
        let a = byte(&mut layout);
        let b = byte(&mut layout);
        let c = byte(&mut layout);
        layout.declare_subregion(raw, a, None)?;
        layout.declare_subregion(raw, b, Some(8))?;
        layout.declare_subregion(raw, c, Some(32))?;

        layout.push_subregions(raw, a, 8, false)?;
        assert_eq!(layout.offset_of(raw, b)?, 16);
        assert_eq!(layout.offset_of(raw, c)?, 32);

        layout.push_subregions(raw, a, 16, true)?;
        assert_eq!(layout.offset_of(raw, a)?, 16);
        assert_eq!(layout.offset_of(raw, b)?, 24);
        assert_eq!(layout.offset_of(raw, c)?, 32);
        Ok(())
    }

    #[test]
    fn move_subregion_checks_destination() -> Result<()> {
        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new());
        let a = byte(&mut layout);
        let b = byte(&mut layout);
        layout.declare_subregion(raw, a, None)?;
        layout.declare_subregion(raw, b, None)?;

        assert!(matches!(
            layout.move_subregion(raw, a, 4),
            Err(LayoutError::Overlap { .. })
        ));
        assert_eq!(layout.move_subregion(raw, a, 17)?, 24);
        assert_eq!(layout.size(raw)?, 32);
        Ok(())
    }

    #[test]
    fn events_reach_listeners() -> Result<()> {
        use std::{cell::RefCell, rc::Rc};

        let mut layout = Layout::default();
        let raw = layout.raw(DeclArgs::new());
        let a = byte(&mut layout);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        layout.listen(raw, move |event| sink.borrow_mut().push(event.clone()));

        layout.declare_subregion(raw, a, None)?;
        let seen = seen.borrow();
        assert!(seen.contains(&Event::Resized {
            decl: raw,
            old: 0,
            new: 8
        }));
        assert!(seen.contains(&Event::SubregionAdded {
            parent: raw,
            child: a,
            offset: 0
        }));
        Ok(())
    }
}
