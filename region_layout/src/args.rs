//! Declaration arguments and instantiation flags.

use std::collections::BTreeMap;

/// Where a subregion may start, relative to its parent's first bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    Bit,
    Byte,
    /// A multiple of this many bytes.
    Block(u64),
}

impl Alignment {
    /// Granularity in bits.
    pub fn bits(self) -> u64 {
        match self {
            Alignment::Bit => 1,
            Alignment::Byte => 8,
            Alignment::Block(bytes) => bytes.max(1) * 8,
        }
    }

    /// Rounds `offset` up to the next permitted start.
    pub fn align(self, offset: u64) -> u64 {
        offset.next_multiple_of(self.bits())
    }

    pub fn is_aligned(self, offset: u64) -> bool {
        offset % self.bits() == 0
    }
}

/// Type-specific argument values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(i64),
    UInt(u64),
    Bool(bool),
    Text(String),
}

/// Configuration attached to a declaration.
///
/// `bitspan` is an explicit size; composites never shrink below it. `maximum`
/// caps every resize. `overlaps` lets children share bits (unions). `shrink`
/// makes a generic container pull later children back when one shrinks or is
/// removed; ordered lists always do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclArgs {
    pub bitspan: Option<u64>,
    pub alignment: Option<Alignment>,
    pub maximum: Option<u64>,
    pub overlaps: bool,
    pub shrink: bool,
    pub extra: BTreeMap<String, ArgValue>,
}

impl DeclArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits(mut self, bits: u64) -> Self {
        self.bitspan = Some(bits);
        self
    }

    pub fn bytes(self, bytes: u64) -> Self {
        self.bits(bytes * 8)
    }

    pub fn aligned(mut self, alignment: Alignment) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Caps the size in bits.
    pub fn maximum(mut self, bits: u64) -> Self {
        self.maximum = Some(bits);
        self
    }

    pub fn overlapping(mut self) -> Self {
        self.overlaps = true;
        self
    }

    pub fn shrinking(mut self) -> Self {
        self.shrink = true;
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: ArgValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.extra.get(key)
    }
}

/// How an instantiated root region may change after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Field lists are frozen.
    pub bound: bool,
    /// Storage may be reallocated when the layout grows.
    pub auto_allocate: bool,
}

impl Default for Binding {
    fn default() -> Self {
        Self {
            bound: true,
            auto_allocate: true,
        }
    }
}

impl Binding {
    /// Structure stays editable (schema building over live bytes).
    pub fn unbound() -> Self {
        Self {
            bound: false,
            auto_allocate: true,
        }
    }

    /// Storage size is frozen too.
    pub fn fixed() -> Self {
        Self {
            bound: true,
            auto_allocate: false,
        }
    }
}
