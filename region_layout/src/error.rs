use packed_bits::BitsError;
use raw_bytes::StorageError;
use thiserror::Error;

use crate::{DeclId, RegionId};

/// Broad classes of [`LayoutError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Overlap, alignment, size limits.
    Layout,
    /// Reads and writes outside a region, or through a dead region.
    Access,
    /// Size-hint targets and field names.
    Resolution,
    /// Changing a field list that may not change.
    Structural,
    Storage,
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("{child} at bit {offset} of {parent} overlaps {existing}")]
    Overlap {
        parent: DeclId,
        child: DeclId,
        offset: u64,
        existing: DeclId,
    },

    #[error("{decl} cannot grow to {requested} bits, maximum is {maximum}")]
    ExceedsMaximum {
        decl: DeclId,
        requested: u64,
        maximum: u64,
    },

    #[error("Storage under {decl} is fixed, {needed} bytes required")]
    AllocationFixed { decl: DeclId, needed: u64 },

    #[error("Resizing {decl} to {requested} bits would cut subregions ending at bit {extent}")]
    Truncates {
        decl: DeclId,
        requested: u64,
        extent: u64,
    },

    #[error("{bits} bits is not a whole number of {stride}-bit elements of {decl}")]
    StrideMismatch { decl: DeclId, bits: u64, stride: u64 },

    #[error("Array element {0} cannot be resized")]
    ElementResize(DeclId),

    #[error("Numeric width of {0} bits is not supported")]
    NumericWidth(u64),

    #[error("Access of {length} bits at bit {offset} exceeds {limit} bits of {region}")]
    OutOfBounds {
        region: RegionId,
        offset: u64,
        length: u64,
        limit: u64,
    },

    #[error("{0} does not start on a byte boundary")]
    Unaligned(RegionId),

    #[error("{0} has been invalidated")]
    Invalidated(RegionId),

    #[error("{0} is not bound to storage")]
    NotMaterialized(DeclId),

    #[error("Target {target} of size hint {hint} not found")]
    HintTargetMissing { hint: DeclId, target: String },

    #[error("Size hint {hint} produced negative value {value}")]
    NegativeHint { hint: DeclId, value: i64 },

    #[error("Size hint {hint} value {value} is too large for its transform")]
    HintOverflow { hint: DeclId, value: u64 },

    #[error("No field named {name:?} in {decl}")]
    FieldNotFound { decl: DeclId, name: String },

    #[error("Field name {name:?} is already used in {decl}")]
    NameCollision { decl: DeclId, name: String },

    #[error("Index {index} out of range for {decl} of length {len}")]
    IndexOutOfRange { decl: DeclId, index: u64, len: u64 },

    #[error("{0} is bound, its field list can no longer change")]
    Bound(DeclId),

    #[error("{0} already belongs to {1}")]
    AlreadyDeclared(DeclId, DeclId),

    #[error("{child} is not a subregion of {parent}")]
    NotASubregion { parent: DeclId, child: DeclId },

    #[error("{decl} is a {actual}, expected {expected}")]
    WrongKind {
        decl: DeclId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Anonymous field {0} must be a mapping")]
    AnonymousNotMapping(DeclId),

    #[error("Declaring {child} inside {parent} would create a cycle")]
    Cycle { parent: DeclId, child: DeclId },

    #[error("{0} is a subregion and cannot be bound on its own")]
    NotARoot(DeclId),

    #[error("Stale declaration {0}")]
    StaleDeclaration(DeclId),

    #[error("Stale region {0}")]
    StaleRegion(RegionId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bits(#[from] BitsError),
}

impl LayoutError {
    pub fn category(&self) -> ErrorCategory {
        use LayoutError::*;
        match self {
            Overlap { .. }
            | ExceedsMaximum { .. }
            | AllocationFixed { .. }
            | Truncates { .. }
            | StrideMismatch { .. }
            | ElementResize(_)
            | NumericWidth(_)
            | Unaligned(_) => ErrorCategory::Layout,
            OutOfBounds { .. }
            | Invalidated(_)
            | NotMaterialized(_)
            | StaleDeclaration(_)
            | StaleRegion(_)
            | Bits(_) => ErrorCategory::Access,
            HintTargetMissing { .. }
            | NegativeHint { .. }
            | HintOverflow { .. }
            | FieldNotFound { .. }
            | NameCollision { .. }
            | IndexOutOfRange { .. } => ErrorCategory::Resolution,
            Bound(_)
            | AlreadyDeclared(..)
            | NotASubregion { .. }
            | WrongKind { .. }
            | AnonymousNotMapping(_)
            | Cycle { .. }
            | NotARoot(_) => ErrorCategory::Structural,
            Storage(_) => ErrorCategory::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, LayoutError>;
