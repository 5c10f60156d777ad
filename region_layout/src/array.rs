//! Homogeneous arrays of a template declaration.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    DeclArgs, DeclId, Kind, Layout, LayoutError, Result,
    layout::{Detach, wrong_kind},
};

/// `elements` copies of `base`, each `stride` bits apart.
///
/// Element declarations are cloned from the template the first time they are
/// asked for; `declared` holds the ones that exist.
#[derive(Debug, Clone)]
pub struct ArraySpec {
    pub(crate) base: DeclId,
    pub(crate) elements: u64,
    pub(crate) declared: BTreeMap<u64, DeclId>,
}

impl ArraySpec {
    pub fn base(&self) -> DeclId {
        self.base
    }

    pub fn elements(&self) -> u64 {
        self.elements
    }
}

impl Layout {
    /// An array of `elements` copies of `base`, which becomes the template and
    /// can no longer be declared anywhere else.
    pub fn array(&mut self, base: DeclId, elements: u64, args: DeclArgs) -> Result<DeclId> {
        let template = self.decl(base)?;
        if let Some(owner) = template.parent.or(template.template_of) {
            return Err(LayoutError::AlreadyDeclared(base, owner));
        }
        let requested = elements.saturating_mul(self.stride_of(base)?);
        let maximum = args.maximum;

        let spec = ArraySpec {
            base,
            elements,
            declared: BTreeMap::new(),
        };
        let array = self.create(Kind::Array(spec), args);
        if let Some(maximum) = maximum.filter(|m| requested > *m) {
            self.decls.remove(array.0);
            return Err(LayoutError::ExceedsMaximum {
                decl: array,
                requested,
                maximum,
            });
        }
        self.decl_mut(base)?.template_of = Some(array);
        Ok(array)
    }

    pub(crate) fn array_spec(&self, id: DeclId) -> Result<&ArraySpec> {
        let kind = &self.decl(id)?.kind;
        kind.array().ok_or_else(|| wrong_kind(id, "array", kind))
    }

    fn array_spec_mut(&mut self, id: DeclId) -> Result<&mut ArraySpec> {
        let decl = self.decl_mut(id)?;
        let actual = decl.kind.name();
        decl.kind.array_mut().ok_or(LayoutError::WrongKind {
            decl: id,
            expected: "array",
            actual,
        })
    }

    /// Bits between the starts of two consecutive elements.
    pub fn stride(&self, array: DeclId) -> Result<u64> {
        self.stride_of(self.array_spec(array)?.base)
    }

    pub fn element_count(&self, array: DeclId) -> Result<u64> {
        Ok(self.array_spec(array)?.elements)
    }

    /// The declaration of element `index`, cloned from the template on first
    /// use.
    pub fn element_decl(&mut self, array: DeclId, index: u64) -> Result<DeclId> {
        let spec = self.array_spec(array)?;
        if index >= spec.elements {
            return Err(LayoutError::IndexOutOfRange {
                decl: array,
                index,
                len: spec.elements,
            });
        }
        if let Some(element) = spec.declared.get(&index) {
            return Ok(*element);
        }

        let base = spec.base;
        let offset = index * self.stride_of(base)?;
        let element = self.clone_tree(base)?;
        if let Err(err) = self.declare_inner(array, element, Some(offset)) {
            self.discard(element);
            return Err(err);
        }
        self.array_spec_mut(array)?.declared.insert(index, element);
        Ok(element)
    }

    /// Grows or shrinks the array. Dropped elements are detached and their
    /// bits cleared; new elements read as zero.
    pub fn set_element_count(&mut self, array: DeclId, elements: u64) -> Result<()> {
        let spec = self.array_spec(array)?;
        let old = spec.elements;
        if elements == old {
            return Ok(());
        }
        let bits = elements.saturating_mul(self.stride_of(spec.base)?);
        debug!(%array, old, new = elements, "setting element count");

        if elements < old {
            let doomed = self.array_spec_mut(array)?.declared.split_off(&elements);
            for element in doomed.into_values() {
                self.detach(array, element, Detach::Remove)?;
                self.discard(element);
            }
            self.array_spec_mut(array)?.elements = elements;
            return self.resize_decl(array, bits);
        }

        let old_bits = self.size(array)?;
        self.array_spec_mut(array)?.elements = elements;
        if let Err(err) = self.resize_decl(array, bits) {
            self.array_spec_mut(array)?.elements = old;
            self.decl_mut(array)?.size = Some(old_bits);
            return Err(err);
        }
        Ok(())
    }
}
