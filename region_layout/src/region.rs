//! Live views of declarations bound to storage.
//!
//! A root region owns (or borrows) an allocation and places its declaration
//! tree at a bit position inside it. Child regions are instantiated on demand
//! and follow their declaration: when a cascade moves or resizes it, the
//! region's address, bit shift and size are updated in place, so a
//! [`RegionId`] stays usable across edits until its declaration is detached.

use core::fmt;

use bytemuck::Pod;
use packed_bits::Bits;
use raw_bytes::{ByteStore, Handle};
use tracing::{debug, trace};

use crate::{
    Alignment, Binding, DeclId, Event, Kind, Layout, LayoutError, Position, Result, arena::Key,
    layout::wrong_kind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub(crate) Key);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

/// A declaration instantiated over storage.
#[derive(Debug, Clone)]
pub struct Region {
    pub(crate) declaration: Option<DeclId>,
    pub(crate) parent: Option<RegionId>,
    /// Set when the region owns its allocation and frees it on release.
    pub(crate) allocation: Option<Handle>,
    pub(crate) handle: Handle,
    pub(crate) address: u64,
    pub(crate) bit_shift: u8,
    pub(crate) size: u64,
    pub(crate) alignment: Alignment,
    pub(crate) bound: bool,
    pub(crate) auto_allocate: bool,
    pub(crate) invalidated: bool,
}

impl Region {
    pub fn declaration(&self) -> Option<DeclId> {
        self.declaration
    }

    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn bit_shift(&self) -> u8 {
        self.bit_shift
    }

    /// Size in bits.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }
}

impl Layout {
    pub fn region(&self, id: RegionId) -> Result<&Region> {
        self.regions.get(id.0).ok_or(LayoutError::StaleRegion(id))
    }

    /// The live region of `decl`, if it has one.
    pub fn instance(&self, decl: DeclId) -> Option<RegionId> {
        let region = self.decls.get(decl.0)?.instance?;
        self.regions
            .get(region.0)
            .filter(|r| !r.invalidated)
            .map(|_| region)
    }

    /// Declaration and current position behind a usable region.
    fn live(&self, id: RegionId) -> Result<(DeclId, Position)> {
        let region = self.region(id)?;
        if region.invalidated {
            return Err(LayoutError::Invalidated(id));
        }
        let decl = region.declaration.ok_or(LayoutError::Invalidated(id))?;
        let position = self
            .decls
            .get(decl.0)
            .and_then(|d| d.position)
            .ok_or(LayoutError::Invalidated(id))?;
        Ok((decl, position))
    }

    pub fn region_declaration(&self, id: RegionId) -> Result<DeclId> {
        self.live(id).map(|(decl, _)| decl)
    }

    //
    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Region over `decl` in fresh zeroed storage, bound by default.
    ///
    /// For a subregion the whole tree is instantiated from its root first.
    pub fn instantiate(&mut self, decl: DeclId) -> Result<RegionId> {
        self.instantiate_with(decl, Binding::default())
    }

    pub fn instantiate_with(&mut self, decl: DeclId, binding: Binding) -> Result<RegionId> {
        if let Some(region) = self.instance(decl) {
            return Ok(region);
        }
        if let Some(parent) = self.decl(decl)?.parent {
            let parent_region = self.instantiate_with(parent, binding)?;
            let root = self.region(parent_region)?;
            let binding = Binding {
                bound: root.bound,
                auto_allocate: root.auto_allocate,
            };
            return self.create_region(decl, Some(parent_region), None, binding);
        }

        self.check_root(decl)?;
        let bytes = self.size(decl)?.div_ceil(8);
        let handle = self.storage.allocate(bytes as usize)?;
        self.bind_root(decl, Position::new(handle, 0, 0), binding, true, false)
    }

    /// Parses `bytes`: stored size hints shape the layout.
    pub fn attach(&mut self, decl: DeclId, bytes: &[u8]) -> Result<RegionId> {
        self.attach_with(decl, bytes, Binding::default())
    }

    pub fn attach_with(&mut self, decl: DeclId, bytes: &[u8], binding: Binding) -> Result<RegionId> {
        self.check_root(decl)?;
        let handle = self.storage.allocate(bytes.len())?;
        self.storage.write(handle, 0, bytes)?;
        self.bind_root(decl, Position::new(handle, 0, 0), binding, true, true)
    }

    /// Parses an existing byte store (a file, a memory map), taking ownership.
    pub fn attach_store(
        &mut self,
        decl: DeclId,
        store: Box<dyn ByteStore>,
        binding: Binding,
    ) -> Result<RegionId> {
        self.check_root(decl)?;
        let handle = self.storage.adopt(store);
        self.bind_root(decl, Position::new(handle, 0, 0), binding, true, true)
    }

    /// Parses `decl` at a bit position inside an allocation the caller owns.
    pub fn attach_at(
        &mut self,
        decl: DeclId,
        handle: Handle,
        address: u64,
        bit_shift: u8,
        binding: Binding,
    ) -> Result<RegionId> {
        self.check_root(decl)?;
        let position = Position::new(handle, address, bit_shift);
        self.bind_root(decl, position, binding, false, true)
    }

    fn check_root(&self, decl: DeclId) -> Result<()> {
        let declaration = self.decl(decl)?;
        if declaration.parent.is_some() {
            return Err(LayoutError::NotARoot(decl));
        }
        if let Some(array) = declaration.template_of {
            return Err(LayoutError::AlreadyDeclared(decl, array));
        }
        Ok(())
    }

    fn bind_root(
        &mut self,
        decl: DeclId,
        position: Position,
        binding: Binding,
        owned: bool,
        parse: bool,
    ) -> Result<RegionId> {
        if let Some(previous) = self.decl(decl)?.instance {
            self.release(previous)?;
        }
        self.rebase(decl, position)?;
        let allocation = owned.then_some(position.handle);
        let region = self.create_region(decl, None, allocation, binding)?;

        if let Err(err) = self.finish_binding(decl, binding, parse) {
            self.release(region)?;
            return Err(err);
        }
        debug!(%decl, %region, parse, "bound root region");
        Ok(region)
    }

    fn finish_binding(&mut self, decl: DeclId, binding: Binding, parse: bool) -> Result<()> {
        self.fit_storage(decl, binding)?;
        if parse {
            self.settle(decl)?;
            self.fit_storage(decl, binding)
        } else {
            self.sync_all_hints(decl)
        }
    }

    /// Makes sure the allocation holds the whole root.
    fn fit_storage(&mut self, decl: DeclId, binding: Binding) -> Result<()> {
        let position = self
            .decl(decl)?
            .position
            .ok_or(LayoutError::NotMaterialized(decl))?;
        let size = self.size(decl)?;
        let needed = position.address + (position.bit_shift as u64 + size).div_ceil(8);
        let current = self.storage.size(position.handle)? as u64;
        if needed > current {
            if !binding.auto_allocate {
                return Err(LayoutError::AllocationFixed { decl, needed });
            }
            self.storage.reallocate(position.handle, needed as usize)?;
        }
        Ok(())
    }

    fn create_region(
        &mut self,
        decl: DeclId,
        parent: Option<RegionId>,
        allocation: Option<Handle>,
        binding: Binding,
    ) -> Result<RegionId> {
        let position = self
            .decl(decl)?
            .position
            .ok_or(LayoutError::NotMaterialized(decl))?;
        let size = self.size(decl)?;
        let alignment = self.alignment_of(decl)?;
        let region = Region {
            declaration: Some(decl),
            parent,
            allocation,
            handle: position.handle,
            address: position.address,
            bit_shift: position.bit_shift,
            size,
            alignment,
            bound: binding.bound,
            auto_allocate: binding.auto_allocate,
            invalidated: false,
        };
        let id = RegionId(self.regions.insert(region));
        self.decl_mut(decl)?.instance = Some(id);
        trace!(%decl, region = %id, "instantiated region");
        Ok(id)
    }

    /// Drops a region. Releasing a root unbinds the whole tree and frees the
    /// allocation it owns.
    pub fn release(&mut self, id: RegionId) -> Result<()> {
        let region = self
            .regions
            .remove(id.0)
            .ok_or(LayoutError::StaleRegion(id))?;
        let Some(decl) = region.declaration.filter(|d| self.contains(*d)) else {
            return Ok(());
        };
        if self.decl(decl)?.instance == Some(id) {
            self.decl_mut(decl)?.instance = None;
        }
        if region.parent.is_none() && !region.invalidated {
            self.dematerialize(decl)?;
            if let Some(handle) = region.allocation {
                self.storage.free(handle)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self, id: RegionId) -> Result<()> {
        let (_, position) = self.live(id)?;
        Ok(self.storage.flush(position.handle)?)
    }

    //
    // -------------------------------------------------------------------------
    // Bits
    // -------------------------------------------------------------------------

    /// Start of an access window. With `apply_shift` offsets count from the
    /// region's first bit; without, from the first bit of its first byte, so
    /// the window may cover the `bit_shift` bits before the region.
    fn window(&self, id: RegionId, offset: u64, length: u64, apply_shift: bool) -> Result<Position> {
        let (_, position) = self.live(id)?;
        let region = self.region(id)?;
        let (start, limit) = if apply_shift {
            (position, region.size)
        } else {
            (
                Position::new(position.handle, position.address, 0),
                region.size + position.bit_shift as u64,
            )
        };
        if offset.checked_add(length).is_none_or(|end| end > limit) {
            return Err(LayoutError::OutOfBounds {
                region: id,
                offset,
                length,
                limit,
            });
        }
        Ok(start.advance(offset))
    }

    /// `length` bits starting `offset` bits into the region.
    pub fn read_bits(&self, id: RegionId, offset: u64, length: u64) -> Result<Bits> {
        self.read_bits_with(id, offset, length, true)
    }

    pub fn write_bits(&mut self, id: RegionId, offset: u64, bits: &Bits) -> Result<()> {
        self.write_bits_with(id, offset, bits, true)
    }

    /// [`Layout::read_bits`], optionally addressed from the region's first
    /// byte instead of its first bit.
    pub fn read_bits_with(
        &self,
        id: RegionId,
        offset: u64,
        length: u64,
        apply_shift: bool,
    ) -> Result<Bits> {
        let start = self.window(id, offset, length, apply_shift)?;
        trace!(region = %id, offset, length, apply_shift, "read bits");
        self.load(start, length)
    }

    pub fn write_bits_with(
        &mut self,
        id: RegionId,
        offset: u64,
        bits: &Bits,
        apply_shift: bool,
    ) -> Result<()> {
        let start = self.window(id, offset, bits.len() as u64, apply_shift)?;
        trace!(region = %id, offset, length = bits.len(), apply_shift, "write bits");
        self.store(start, bits)
    }

    /// Moves `length` bits from `source` to `dest` inside the region. The
    /// source is cleared first, so overlapping ranges end up holding the
    /// moved bits.
    pub fn move_bits(&mut self, id: RegionId, dest: u64, source: u64, length: u64) -> Result<()> {
        let from = self.window(id, source, length, true)?;
        let to = self.window(id, dest, length, true)?;
        self.move_storage(from, to, length)
    }

    /// The whole region, left aligned and zero padded to whole bytes.
    pub fn bytes(&self, id: RegionId) -> Result<Vec<u8>> {
        let size = self.region(id)?.size;
        Ok(self.read_bits(id, 0, size)?.into_bytes())
    }

    /// Resizes the region's declaration; see [`Layout::resize_declaration`].
    pub fn resize(&mut self, id: RegionId, bits: u64) -> Result<()> {
        let (decl, _) = self.live(id)?;
        self.resize_declaration(decl, bits)
    }

    //
    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    fn numeric_of(&self, decl: DeclId) -> Result<crate::NumericSpec> {
        let kind = &self.decl(decl)?.kind;
        kind.numeric()
            .copied()
            .ok_or_else(|| wrong_kind(decl, "numeric", kind))
    }

    pub fn read_value(&self, id: RegionId) -> Result<u64> {
        let (decl, position) = self.live(id)?;
        let numeric = self.numeric_of(decl)?;
        numeric.decode(&self.load(position, numeric.bits as u64)?)
    }

    pub fn read_signed(&self, id: RegionId) -> Result<i64> {
        let (decl, _) = self.live(id)?;
        let numeric = self.numeric_of(decl)?;
        Ok(numeric.to_signed(self.read_value(id)?))
    }

    /// Stores an integer. Setting a size hint also resizes its target; if
    /// that fails the previous value is put back.
    pub fn set_value(&mut self, id: RegionId, value: u64) -> Result<()> {
        let (decl, position) = self.live(id)?;
        let numeric = self.numeric_of(decl)?;
        let bits = numeric.encode(value)?;
        if let Kind::SizeHint(_) = self.decl(decl)?.kind {
            let previous = self.load(position, numeric.bits as u64)?;
            self.store(position, &bits)?;
            if let Err(err) = self.apply_hint(decl, value) {
                if let Some(position) = self.decl(decl)?.position {
                    self.store(position, &previous)?;
                }
                return Err(err);
            }
        } else {
            self.store(position, &bits)?;
        }
        self.notify(Event::ValueSet { decl, value });
        Ok(())
    }

    pub fn set_signed(&mut self, id: RegionId, value: i64) -> Result<()> {
        let (decl, _) = self.live(id)?;
        let raw = self.numeric_of(decl)?.from_signed(value)?;
        self.set_value(id, raw)
    }

    /// Reads a plain-old-data value `offset` bytes into a byte-aligned region.
    pub fn read_pod<T: Pod>(&self, id: RegionId, offset: u64) -> Result<T> {
        let position = self.pod_position(id, offset, core::mem::size_of::<T>())?;
        Ok(raw_bytes::read_pod(
            self.storage.as_ref(),
            position.handle,
            position.address as usize,
        )?)
    }

    pub fn write_pod<T: Pod>(&mut self, id: RegionId, offset: u64, value: &T) -> Result<()> {
        let position = self.pod_position(id, offset, core::mem::size_of::<T>())?;
        Ok(raw_bytes::write_pod(
            self.storage.as_mut(),
            position.handle,
            position.address as usize,
            value,
        )?)
    }

    fn pod_position(&self, id: RegionId, offset: u64, len: usize) -> Result<Position> {
        let (_, position) = self.live(id)?;
        if position.bit_shift != 0 {
            return Err(LayoutError::Unaligned(id));
        }
        self.window(id, offset * 8, len as u64 * 8, true)
    }

    //
    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    /// Region of a named field, hoisted names included.
    pub fn field(&mut self, id: RegionId, name: &str) -> Result<RegionId> {
        let (decl, _) = self.live(id)?;
        let field = self.field_decl(decl, name)?;
        self.instantiate(field)
    }

    pub fn entry(&mut self, id: RegionId, index: usize) -> Result<RegionId> {
        let (decl, _) = self.live(id)?;
        let entry = self.entry_decl(decl, index)?;
        self.instantiate(entry)
    }

    pub fn element(&mut self, id: RegionId, index: u64) -> Result<RegionId> {
        let (decl, _) = self.live(id)?;
        let element = self.element_decl(decl, index)?;
        self.instantiate(element)
    }

    pub fn elements(&self, id: RegionId) -> Result<u64> {
        let (decl, _) = self.live(id)?;
        self.element_count(decl)
    }

    pub fn set_elements(&mut self, id: RegionId, elements: u64) -> Result<()> {
        let (decl, _) = self.live(id)?;
        self.set_element_count(decl, elements)
    }

    /// Grows (or with a negative `delta`, shrinks) an array region.
    pub fn add_elements(&mut self, id: RegionId, delta: i64) -> Result<()> {
        let (decl, _) = self.live(id)?;
        let count = self.element_count(decl)?.saturating_add_signed(delta);
        self.set_element_count(decl, count)
    }
}
