//! Schema nodes.

use core::fmt;
use std::collections::{BTreeSet, HashMap};

use raw_bytes::Handle;

use crate::{
    ArraySpec, DeclArgs, ListSpec, MappingSpec, NumericSpec, OffsetIndex, RegionId, SizeHint,
    arena::Key,
    hint::HintTarget,
};

/// Identity of a declaration inside a [`Layout`](crate::Layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub(crate) Key);

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl#{}", self.0)
    }
}

/// Where a materialized declaration starts: a byte address inside an
/// allocation plus the number of bits to skip in that byte (MSB first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub handle: Handle,
    pub address: u64,
    pub bit_shift: u8,
}

impl Position {
    pub fn new(handle: Handle, address: u64, bit_shift: u8) -> Self {
        Self {
            handle,
            address: address + (bit_shift / 8) as u64,
            bit_shift: bit_shift % 8,
        }
    }

    /// The position `bits` further along.
    pub fn advance(self, bits: u64) -> Self {
        let total = self.bit_shift as u64 + bits;
        Self {
            handle: self.handle,
            address: self.address + total / 8,
            bit_shift: (total % 8) as u8,
        }
    }

    /// Absolute bit address inside the allocation.
    pub fn bit_address(&self) -> u64 {
        self.address * 8 + self.bit_shift as u64
    }
}

/// What a declaration describes.
#[derive(Debug, Clone)]
pub enum Kind {
    /// Opaque bits, or a container of explicitly placed subregions.
    Raw,
    Numeric(NumericSpec),
    List(ListSpec),
    /// Named fields; a union when declared with `overlaps`.
    Mapping(MappingSpec),
    Array(ArraySpec),
    SizeHint(SizeHint),
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Raw => "raw region",
            Kind::Numeric(_) => "numeric",
            Kind::List(_) => "list",
            Kind::Mapping(_) => "mapping",
            Kind::Array(_) => "array",
            Kind::SizeHint(_) => "size hint",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Kind::List(_) | Kind::Mapping(_) | Kind::Array(_))
    }

    pub fn numeric(&self) -> Option<&NumericSpec> {
        match self {
            Kind::Numeric(spec) => Some(spec),
            Kind::SizeHint(hint) => Some(hint.numeric()),
            _ => None,
        }
    }

    pub fn list(&self) -> Option<&ListSpec> {
        match self {
            Kind::List(list) => Some(list),
            Kind::Mapping(mapping) => Some(&mapping.list),
            _ => None,
        }
    }

    pub(crate) fn list_mut(&mut self) -> Option<&mut ListSpec> {
        match self {
            Kind::List(list) => Some(list),
            Kind::Mapping(mapping) => Some(&mut mapping.list),
            _ => None,
        }
    }

    pub fn mapping(&self) -> Option<&MappingSpec> {
        match self {
            Kind::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }

    pub(crate) fn mapping_mut(&mut self) -> Option<&mut MappingSpec> {
        match self {
            Kind::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }

    pub fn array(&self) -> Option<&ArraySpec> {
        match self {
            Kind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub(crate) fn array_mut(&mut self) -> Option<&mut ArraySpec> {
        match self {
            Kind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn hint(&self) -> Option<&SizeHint> {
        match self {
            Kind::SizeHint(hint) => Some(hint),
            _ => None,
        }
    }

    pub(crate) fn hint_mut(&mut self) -> Option<&mut SizeHint> {
        match self {
            Kind::SizeHint(hint) => Some(hint),
            _ => None,
        }
    }

    /// Rewrites every declaration identity the kind refers to.
    pub(crate) fn remap(&mut self, map: impl Fn(DeclId) -> DeclId) {
        let remap_list = |list: &mut ListSpec| {
            for entry in list.entries.iter_mut() {
                *entry = map(*entry);
            }
            list.hints = list.hints.iter().map(|(t, h)| (map(*t), map(*h))).collect();
            for hint in list.pending.iter_mut() {
                *hint = map(*hint);
            }
        };
        match self {
            Kind::Raw | Kind::Numeric(_) => {}
            Kind::List(list) => remap_list(list),
            Kind::Mapping(mapping) => remap_list(&mut mapping.list),
            Kind::Array(array) => {
                array.base = map(array.base);
                for element in array.declared.values_mut() {
                    *element = map(*element);
                }
            }
            Kind::SizeHint(hint) => {
                if let HintTarget::Decl(target) = &mut hint.target {
                    *target = map(*target);
                }
                hint.resolved = None;
            }
        }
    }
}

/// A node of the schema tree.
///
/// Children are owned by identity: `subregions` holds them, `subregion_offsets`
/// and `offset_index` place them. `position` and `instance` are only set while
/// the tree is bound to storage.
#[derive(Debug)]
pub struct Declaration {
    pub(crate) kind: Kind,
    pub(crate) args: DeclArgs,
    pub(crate) parent: Option<DeclId>,
    pub(crate) template_of: Option<DeclId>,
    pub(crate) subregions: BTreeSet<DeclId>,
    pub(crate) subregion_offsets: HashMap<DeclId, u64>,
    pub(crate) offset_index: OffsetIndex,
    pub(crate) size: Option<u64>,
    pub(crate) position: Option<Position>,
    pub(crate) instance: Option<RegionId>,
    pub(crate) recalculating: bool,
}

impl Declaration {
    pub(crate) fn new(kind: Kind, args: DeclArgs) -> Self {
        Self {
            kind,
            args,
            parent: None,
            template_of: None,
            subregions: BTreeSet::new(),
            subregion_offsets: HashMap::new(),
            offset_index: OffsetIndex::new(),
            size: None,
            position: None,
            instance: None,
            recalculating: false,
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn args(&self) -> &DeclArgs {
        &self.args
    }

    pub fn parent(&self) -> Option<DeclId> {
        self.parent
    }

    /// The array this declaration is the element template of.
    pub fn template_of(&self) -> Option<DeclId> {
        self.template_of
    }

    pub fn subregions(&self) -> impl Iterator<Item = DeclId> + '_ {
        self.subregions.iter().copied()
    }

    pub fn offset_of(&self, child: DeclId) -> Option<u64> {
        self.subregion_offsets.get(&child).copied()
    }

    pub fn offset_index(&self) -> &OffsetIndex {
        &self.offset_index
    }

    /// Size in bits, if it has been computed.
    pub fn cached_size(&self) -> Option<u64> {
        self.size
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn is_materialized(&self) -> bool {
        self.position.is_some()
    }

    pub fn instance(&self) -> Option<RegionId> {
        self.instance
    }

    pub fn is_recalculating(&self) -> bool {
        self.recalculating
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_bytes::{Allocator, Heap};

    #[test]
    fn advancing_positions_carries_into_address() {
        let mut heap = Heap::new();
        let handle = heap.allocate(4).unwrap();
        let start = Position::new(handle, 1, 6);

        let next = start.advance(3);
        assert_eq!((next.address, next.bit_shift), (2, 1));
        assert_eq!(next.bit_address(), 17);
        assert_eq!(start.advance(0), start);
        assert_eq!(Position::new(handle, 0, 12).address, 1);
    }
}
