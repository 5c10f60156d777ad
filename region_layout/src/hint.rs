//! Numeric fields whose value drives the size of another declaration.
//!
//! A size hint is resolved lazily: its target may be declared after it, in
//! which case the hint waits in its parent's pending list until a later
//! declaration makes the target reachable. Once resolved, the relation works
//! both ways:
//!
//! - setting the hint's value resizes the target (forward),
//! - resizing the target rewrites the hint's value (reverse sync), unless the
//!   hint has a transform without an inverse.
//!
//! While a region is being parsed ([`Layout::settle`]) only the forward
//! direction runs, so stored lengths shape the layout over existing bytes.

use core::fmt;
use std::{collections::HashSet, rc::Rc};

use tracing::{debug, trace};

use crate::{
    ArgValue, DeclArgs, DeclId, Event, Kind, Layout, LayoutError, NumericSpec, Result,
    layout::wrong_kind,
};

/// How a size hint finds its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintTarget {
    /// Entry of the hint's own list or mapping.
    Index(usize),
    /// Field name, searched in the enclosing mappings from the nearest out.
    Name(String),
    Decl(DeclId),
}

impl From<usize> for HintTarget {
    fn from(index: usize) -> Self {
        HintTarget::Index(index)
    }
}

impl From<&str> for HintTarget {
    fn from(name: &str) -> Self {
        HintTarget::Name(name.to_owned())
    }
}

impl From<String> for HintTarget {
    fn from(name: String) -> Self {
        HintTarget::Name(name)
    }
}

impl From<DeclId> for HintTarget {
    fn from(decl: DeclId) -> Self {
        HintTarget::Decl(decl)
    }
}

impl fmt::Display for HintTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HintTarget::Index(index) => write!(f, "entry {index}"),
            HintTarget::Name(name) => write!(f, "field {name:?}"),
            HintTarget::Decl(decl) => write!(f, "{decl}"),
        }
    }
}

/// Arguments of a [`HintAction::Callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintCall {
    pub hint: DeclId,
    pub target: DeclId,
    pub value: u64,
}

pub type HintCallback = Rc<dyn Fn(&mut Layout, HintCall) -> Result<()>>;

/// Maps a stored value to the applied one, or back.
pub type Transform = Rc<dyn Fn(i64) -> i64>;

/// What the hint's value means for its target.
#[derive(Clone)]
pub enum HintAction {
    /// Size in bytes.
    Bytes,
    /// Size in bits.
    Bits,
    /// Element count of an array.
    Elements,
    /// Stored as a named argument of the target.
    Argument(String),
    Callback(HintCallback),
}

impl fmt::Debug for HintAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HintAction::Bytes => f.write_str("Bytes"),
            HintAction::Bits => f.write_str("Bits"),
            HintAction::Elements => f.write_str("Elements"),
            HintAction::Argument(name) => f.debug_tuple("Argument").field(name).finish(),
            HintAction::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// A numeric field that sizes another declaration.
#[derive(Clone)]
pub struct SizeHint {
    pub(crate) numeric: NumericSpec,
    pub(crate) target: HintTarget,
    pub(crate) action: HintAction,
    pub(crate) transform: Option<Transform>,
    pub(crate) inverse: Option<Transform>,
    pub(crate) resolved: Option<DeclId>,
}

impl SizeHint {
    pub fn new(numeric: NumericSpec, target: impl Into<HintTarget>, action: HintAction) -> Self {
        Self {
            numeric,
            target: target.into(),
            action,
            transform: None,
            inverse: None,
            resolved: None,
        }
    }

    /// Applies `forward` to stored values and `inverse` to measured sizes.
    pub fn transform(
        mut self,
        forward: impl Fn(i64) -> i64 + 'static,
        inverse: impl Fn(i64) -> i64 + 'static,
    ) -> Self {
        self.transform = Some(Rc::new(forward));
        self.inverse = Some(Rc::new(inverse));
        self
    }

    /// A one-way transform: the hint is never rewritten from its target.
    pub fn transform_only(mut self, forward: impl Fn(i64) -> i64 + 'static) -> Self {
        self.transform = Some(Rc::new(forward));
        self.inverse = None;
        self
    }

    pub fn numeric(&self) -> &NumericSpec {
        &self.numeric
    }

    pub fn target(&self) -> &HintTarget {
        &self.target
    }

    pub fn action(&self) -> &HintAction {
        &self.action
    }

    pub fn resolved(&self) -> Option<DeclId> {
        self.resolved
    }

    fn reversible(&self) -> bool {
        self.transform.is_none() || self.inverse.is_some()
    }
}

impl fmt::Debug for SizeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeHint")
            .field("numeric", &self.numeric)
            .field("target", &self.target)
            .field("action", &self.action)
            .field("transformed", &self.transform.is_some())
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Layout {
    pub fn size_hint(&mut self, hint: SizeHint) -> Result<DeclId> {
        hint.numeric.validate()?;
        Ok(self.create(Kind::SizeHint(hint), DeclArgs::default()))
    }

    pub(crate) fn hint_spec(&self, id: DeclId) -> Result<&SizeHint> {
        let kind = &self.decl(id)?.kind;
        kind.hint().ok_or_else(|| wrong_kind(id, "size hint", kind))
    }

    fn hint_spec_mut(&mut self, id: DeclId) -> Result<&mut SizeHint> {
        let decl = self.decl_mut(id)?;
        let name = decl.kind.name();
        decl.kind.hint_mut().ok_or(LayoutError::WrongKind {
            decl: id,
            expected: "size hint",
            actual: name,
        })
    }

    /// Resolves (and caches) the declaration a hint sizes.
    pub fn hint_target(&mut self, hint: DeclId) -> Result<DeclId> {
        let spec = self.hint_spec(hint)?;
        if let Some(target) = spec.resolved {
            let still_placed = matches!(spec.target, HintTarget::Decl(_))
                || self.decls.get(target.0).is_some_and(|d| d.parent.is_some());
            if still_placed {
                return Ok(target);
            }
        }

        let wanted = spec.target.clone();
        let parent = self.decl(hint)?.parent;
        let found = match &wanted {
            HintTarget::Decl(id) => self.contains(*id).then_some(*id),
            HintTarget::Index(index) => parent
                .and_then(|p| self.decls.get(p.0))
                .and_then(|p| p.kind.list())
                .and_then(|list| list.entries.get(*index).copied()),
            HintTarget::Name(name) => self.find_in_scope(parent, name)?,
        };
        let Some(target) = found else {
            return Err(LayoutError::HintTargetMissing {
                hint,
                target: wanted.to_string(),
            });
        };

        self.hint_spec_mut(hint)?.resolved = Some(target);
        if let Some(owner) = self.decl(target)?.parent {
            if let Some(list) = self.decl_mut(owner)?.kind.list_mut() {
                list.hints.insert(target, hint);
            }
        }
        debug!(%hint, %target, "resolved size hint");
        Ok(target)
    }

    fn find_in_scope(&self, from: Option<DeclId>, name: &str) -> Result<Option<DeclId>> {
        let mut cursor = from;
        while let Some(scope) = cursor {
            let decl = self.decl(scope)?;
            if decl.kind.mapping().is_some() {
                if let Ok(field) = self.field_decl(scope, name) {
                    return Ok(Some(field));
                }
            }
            cursor = decl.parent;
        }
        Ok(None)
    }

    /// The hint that sizes `target`, if one has been resolved to it.
    pub fn hint_for(&self, target: DeclId) -> Result<Option<DeclId>> {
        let Some(parent) = self.decl(target)?.parent else {
            return Ok(None);
        };
        Ok(self
            .decl(parent)?
            .kind
            .list()
            .and_then(|list| list.hint_for(target)))
    }

    /// Forward direction: resizes the target from a hint value.
    pub(crate) fn apply_hint(&mut self, hint: DeclId, stored: u64) -> Result<()> {
        let target = self.hint_target(hint)?;
        if self.decl(target)?.recalculating {
            return Ok(());
        }
        let spec = self.hint_spec(hint)?;
        let value = match &spec.transform {
            Some(forward) => run_transform(hint, forward, stored)?,
            None => stored,
        };
        let action = spec.action.clone();

        debug!(%hint, %target, value, ?action, "applying size hint");
        self.decl_mut(target)?.recalculating = true;
        let result = match action {
            HintAction::Bytes => self.resize_declaration(target, value.saturating_mul(8)),
            HintAction::Bits => self.resize_declaration(target, value),
            HintAction::Elements => self.set_element_count(target, value),
            HintAction::Argument(name) => self.set_argument(target, &name, ArgValue::UInt(value)),
            HintAction::Callback(callback) => callback(
                self,
                HintCall {
                    hint,
                    target,
                    value,
                },
            ),
        };
        if let Some(decl) = self.decls.get_mut(target.0) {
            decl.recalculating = false;
        }
        result
    }

    /// Reverse direction: rewrites the hint of `target` from its current size.
    pub(crate) fn sync_hint_value(&mut self, target: DeclId) -> Result<()> {
        if self.settling || self.decl(target)?.recalculating {
            return Ok(());
        }
        let Some(hint) = self.hint_for(target)? else {
            return Ok(());
        };
        if self.decl(hint)?.position.is_none() {
            return Ok(());
        }
        let spec = self.hint_spec(hint)?;
        if !spec.reversible() {
            return Ok(());
        }

        let measured = match &spec.action {
            HintAction::Bytes => self.bits_of(target)?.div_ceil(8),
            HintAction::Bits => self.bits_of(target)?,
            HintAction::Elements => match self.decl(target)?.kind.array() {
                Some(array) => array.elements,
                None => return Ok(()),
            },
            HintAction::Argument(name) => match self.decl(target)?.args.get(name) {
                Some(ArgValue::UInt(value)) => *value,
                _ => return Ok(()),
            },
            HintAction::Callback(_) => return Ok(()),
        };
        let value = match &spec.inverse {
            Some(inverse) => run_transform(hint, inverse, measured)?,
            None => measured,
        };
        self.write_hint_value(hint, value)
    }

    pub(crate) fn read_hint_value(&self, hint: DeclId) -> Result<u64> {
        let position = self
            .decl(hint)?
            .position
            .ok_or(LayoutError::NotMaterialized(hint))?;
        let numeric = *self.hint_spec(hint)?.numeric();
        numeric.decode(&self.load(position, numeric.bits as u64)?)
    }

    fn write_hint_value(&mut self, hint: DeclId, value: u64) -> Result<()> {
        if self.read_hint_value(hint)? == value {
            return Ok(());
        }
        let position = self
            .decl(hint)?
            .position
            .ok_or(LayoutError::NotMaterialized(hint))?;
        let bits = self.hint_spec(hint)?.numeric().encode(value)?;
        self.store(position, &bits)?;
        trace!(%hint, value, "synced size hint");
        self.notify(Event::ValueSet { decl: hint, value });
        Ok(())
    }

    /// Resolves a newly declared hint, and retries hints waiting in `parent`
    /// and its ancestors now that `child` is reachable.
    pub(crate) fn track_hints(&mut self, parent: DeclId, child: DeclId) -> Result<()> {
        if self.decl(child)?.kind.hint().is_some() && !self.try_resolve(child)? {
            if let Some(list) = self.decl_mut(parent)?.kind.list_mut() {
                list.pending.push(child);
            }
        }

        let mut cursor = Some(parent);
        while let Some(scope) = cursor {
            let waiting = match self.decl_mut(scope)?.kind.list_mut() {
                Some(list) => std::mem::take(&mut list.pending),
                None => Vec::new(),
            };
            let mut still = Vec::new();
            for hint in waiting {
                if hint == child {
                    still.push(hint);
                    continue;
                }
                if !self.contains(hint) {
                    continue;
                }
                if !self.try_resolve(hint)? {
                    still.push(hint);
                }
            }
            if let Some(list) = self.decl_mut(scope)?.kind.list_mut() {
                list.pending.extend(still);
            }
            cursor = self.decl(scope)?.parent;
        }
        Ok(())
    }

    fn try_resolve(&mut self, hint: DeclId) -> Result<bool> {
        match self.hint_target(hint) {
            Ok(target) => {
                self.sync_hint_value(target)?;
                Ok(true)
            }
            Err(LayoutError::HintTargetMissing { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Drops every hint relation `child` takes part in under `parent`.
    pub(crate) fn forget_hints(&mut self, parent: DeclId, child: DeclId) -> Result<()> {
        let resolved = self.decl(child)?.kind.hint().and_then(|h| h.resolved);
        if let Some(owner) = resolved.and_then(|t| self.decls.get(t.0)).and_then(|d| d.parent) {
            if let Some(list) = self.decl_mut(owner)?.kind.list_mut() {
                list.hints.retain(|_, hint| *hint != child);
            }
        }

        let mut orphaned = None;
        if let Some(list) = self.decl_mut(parent)?.kind.list_mut() {
            orphaned = list.hints.remove(&child);
            list.pending.retain(|hint| *hint != child);
        }
        if let Some(hint) = orphaned {
            if let Ok(spec) = self.hint_spec_mut(hint) {
                spec.resolved = None;
            }
        }
        Ok(())
    }

    /// Every size hint under `root`, in layout order.
    pub fn hints_in(&self, root: DeclId) -> Result<Vec<DeclId>> {
        let mut hints = Vec::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            let decl = self.decl(current)?;
            if decl.kind.hint().is_some() {
                hints.push(current);
            }
            stack.extend(decl.offset_index.iter().rev().map(|(_, child)| child));
        }
        Ok(hints)
    }

    /// Applies every stored hint value under `root` without moving bytes.
    ///
    /// Hints are visited in layout order; hints that only become reachable
    /// once an earlier hint has sized their container are picked up too.
    pub fn settle(&mut self, root: DeclId) -> Result<()> {
        let was = std::mem::replace(&mut self.settling, true);
        let result = self.settle_hints(root);
        self.settling = was;
        result
    }

    fn settle_hints(&mut self, root: DeclId) -> Result<()> {
        let mut seen = HashSet::new();
        loop {
            let next = self
                .hints_in(root)?
                .into_iter()
                .find(|hint| !seen.contains(hint));
            let Some(hint) = next else {
                return Ok(());
            };
            seen.insert(hint);
            let value = self.read_hint_value(hint)?;
            match self.apply_hint(hint, value) {
                Err(LayoutError::HintTargetMissing { .. }) => {}
                other => other?,
            }
        }
    }

    /// Rewrites every resolvable hint under `root` from its target.
    pub(crate) fn sync_all_hints(&mut self, root: DeclId) -> Result<()> {
        for hint in self.hints_in(root)? {
            match self.hint_target(hint) {
                Ok(target) => self.sync_hint_value(target)?,
                Err(LayoutError::HintTargetMissing { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Runs a transform hook over an unsigned hint value.
fn run_transform(hint: DeclId, transform: &Transform, value: u64) -> Result<u64> {
    let input = i64::try_from(value).map_err(|_| LayoutError::HintOverflow { hint, value })?;
    let output = transform(input);
    u64::try_from(output).map_err(|_| LayoutError::NegativeHint {
        hint,
        value: output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Binding;

    #[test]
    fn target_conversions() {
        assert_eq!(HintTarget::from(2), HintTarget::Index(2));
        assert_eq!(HintTarget::from("data"), HintTarget::Name("data".into()));
        assert_eq!(HintTarget::from("data").to_string(), "field \"data\"");
    }

    #[test]
    fn missing_target_waits_until_declared() -> Result<()> {
        let mut layout = Layout::default();
        let map = layout.structure(DeclArgs::new());
        let len = layout.size_hint(SizeHint::new(
            NumericSpec::u8(),
            "body",
            HintAction::Bytes,
        ))?;
        layout.push_field(map, Some("len"), len)?;
        assert!(matches!(
            layout.hint_target(len),
            Err(LayoutError::HintTargetMissing { .. })
        ));

        let body = layout.raw(DeclArgs::new());
        layout.push_field(map, Some("body"), body)?;
        assert_eq!(layout.hint_target(len)?, body);
        assert_eq!(layout.hint_for(body)?, Some(len));
        Ok(())
    }

    #[test]
    fn index_targets_use_the_hint_list() -> Result<()> {
        let mut layout = Layout::default();
        let list = layout.list(DeclArgs::new());
        let count = layout.size_hint(SizeHint::new(
            NumericSpec::u8(),
            1usize,
            HintAction::Bits,
        ))?;
        let body = layout.raw(DeclArgs::new());
        layout.append(list, count)?;
        layout.append(list, body)?;

        assert_eq!(layout.hint_target(count)?, body);
        Ok(())
    }

    #[test]
    fn one_way_transform_is_not_reversible() {
        let hint = SizeHint::new(NumericSpec::u8(), 0usize, HintAction::Bytes)
            .transform_only(|v| v - 2);
        assert!(!hint.reversible());
        let hint = hint.transform(|v| v - 2, |v| v + 2);
        assert!(hint.reversible());
    }

    #[test]
    fn transforms_reject_values_outside_i64() -> Result<()> {
        let mut layout = Layout::default();
        let record = layout.structure(DeclArgs::new());
        let len = layout.size_hint(
            SizeHint::new(NumericSpec::be(64), "body", HintAction::Bytes)
                .transform(|v| v - 1, |v| v + 1),
        )?;
        let body = layout.raw(DeclArgs::new());
        layout.push_field(record, Some("len"), len)?;
        layout.push_field(record, Some("body"), body)?;

        let root = layout.instantiate_with(record, Binding::unbound())?;
        let len = layout.field(root, "len")?;
        assert_eq!(layout.read_value(len)?, 1);

        assert!(matches!(
            layout.set_value(len, u64::MAX),
            Err(LayoutError::HintOverflow { value: u64::MAX, .. })
        ));
        assert!(matches!(
            layout.set_value(len, 0),
            Err(LayoutError::NegativeHint { value: -1, .. })
        ));
        assert_eq!(layout.read_value(len)?, 1);
        assert_eq!(layout.size(body)?, 0);
        Ok(())
    }
}
