//! # region_layout
//!
//! Declarative binary layouts that stay consistent while they are edited.
//!
//! A [`Layout`] owns a tree of declarations (raw containers, numerics, lists,
//! structures, unions, arrays and size hints) and the storage they are bound
//! to. Offsets are in bits, MSB first. Growing or shrinking any declaration
//! runs the resize cascade: later siblings are pushed back (or pulled in),
//! containers are refitted up to the root, and the root's allocation is
//! reallocated. Live [`Region`]s follow their declaration through all of it.
//!
//! ```
//! use region_layout::{DeclArgs, HintAction, Layout, NumericSpec, SizeHint};
//!
//! let mut layout = Layout::default();
//! let packet = layout.structure(DeclArgs::new());
//! let len = layout
//!     .size_hint(SizeHint::new(NumericSpec::u8(), "payload", HintAction::Elements))
//!     .unwrap();
//! let byte = layout.numeric(NumericSpec::u8()).unwrap();
//! let payload = layout.array(byte, 0, DeclArgs::new()).unwrap();
//! layout.push_field(packet, Some("len"), len).unwrap();
//! layout.push_field(packet, Some("payload"), payload).unwrap();
//!
//! // stored length 2: the payload takes the next two bytes
//! let region = layout.attach(packet, &[2, 0xAA, 0xBB]).unwrap();
//! let payload = layout.field(region, "payload").unwrap();
//! assert_eq!(layout.elements(payload).unwrap(), 2);
//!
//! // growing the payload rewrites the length
//! layout.add_elements(payload, 1).unwrap();
//! let len = layout.field(region, "len").unwrap();
//! assert_eq!(layout.read_value(len).unwrap(), 3);
//! assert_eq!(layout.bytes(region).unwrap(), vec![3, 0xAA, 0xBB, 0]);
//! ```

mod arena;

pub mod args;
pub mod array;
pub mod declaration;
pub mod error;
pub mod event;
pub mod hint;
pub mod layout;
pub mod list;
pub mod mapping;
pub mod numeric;
pub mod offset_index;
pub mod region;

pub use args::{Alignment, ArgValue, Binding, DeclArgs};
pub use array::ArraySpec;
pub use declaration::{DeclId, Declaration, Kind, Position};
pub use error::{ErrorCategory, LayoutError, Result};
pub use event::{Event, Listener};
pub use hint::{HintAction, HintCall, HintCallback, HintTarget, SizeHint, Transform};
pub use layout::Layout;
pub use list::ListSpec;
pub use mapping::MappingSpec;
pub use numeric::{Endian, NumericSpec};
pub use offset_index::OffsetIndex;
pub use packed_bits::Bits;
pub use region::{Region, RegionId};
