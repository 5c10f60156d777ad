//! Named fields: structures and unions.
//!
//! A mapping is a list whose entries may carry names. An anonymous entry must
//! itself be a mapping; its field names are hoisted into the enclosing
//! mapping, so `outer.field(name)` finds fields of anonymous inner structs
//! and unions.

use std::collections::HashMap;

use tracing::debug;

use crate::{DeclArgs, DeclId, Kind, Layout, LayoutError, ListSpec, Result, layout::wrong_kind};

#[derive(Debug, Clone, Default)]
pub struct MappingSpec {
    pub(crate) list: ListSpec,
    /// One slot per entry; `None` for anonymous entries.
    pub(crate) names: Vec<Option<String>>,
    /// Every reachable name, with the entry path leading to it.
    pub(crate) lookup: HashMap<String, Vec<usize>>,
}

impl MappingSpec {
    pub fn list(&self) -> &ListSpec {
        &self.list
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).and_then(|name| name.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }
}

impl Layout {
    /// Fields laid out one after the other.
    pub fn structure(&mut self, args: DeclArgs) -> DeclId {
        self.create(Kind::Mapping(MappingSpec::default()), args)
    }

    /// Fields sharing the same bits; the size is the largest field.
    pub fn union(&mut self, args: DeclArgs) -> DeclId {
        self.create(Kind::Mapping(MappingSpec::default()), args.overlapping())
    }

    pub(crate) fn mapping_spec(&self, id: DeclId) -> Result<&MappingSpec> {
        let kind = &self.decl(id)?.kind;
        kind.mapping().ok_or_else(|| wrong_kind(id, "mapping", kind))
    }

    pub fn push_field(&mut self, map: DeclId, name: Option<&str>, child: DeclId) -> Result<u64> {
        let len = self.mapping_spec(map)?.list.len();
        self.insert_field(map, len, name, child)
    }

    /// Inserts a field before entry `index`. Anonymous fields must be
    /// mappings, and no name may become reachable twice.
    pub fn insert_field(
        &mut self,
        map: DeclId,
        index: usize,
        name: Option<&str>,
        child: DeclId,
    ) -> Result<u64> {
        self.ensure_unbound(map)?;
        self.mapping_spec(map)?;

        let incoming: Vec<String> = match name {
            Some(name) => vec![name.to_owned()],
            None => match &self.decl(child)?.kind {
                Kind::Mapping(inner) => inner.lookup.keys().cloned().collect(),
                _ => return Err(LayoutError::AnonymousNotMapping(child)),
            },
        };
        let mut scope = Some(map);
        while let Some(current) = scope {
            let mapping = self.mapping_spec(current)?;
            if let Some(name) = incoming.iter().find(|n| mapping.contains(n)) {
                return Err(LayoutError::NameCollision {
                    decl: current,
                    name: name.clone(),
                });
            }
            scope = self.anonymous_parent(current)?;
        }

        let offset = self.insert_entry(map, index, child, name.map(str::to_owned))?;
        debug!(%map, %child, ?name, offset, "declared field");
        Ok(offset)
    }

    /// Removes a field, reachable directly or through anonymous entries.
    pub fn remove_field(&mut self, map: DeclId, name: &str) -> Result<DeclId> {
        self.ensure_unbound(map)?;
        let path = self.resolve_path(map, name)?;
        let Some((last, inner)) = path.split_last() else {
            return Err(LayoutError::FieldNotFound {
                decl: map,
                name: name.to_owned(),
            });
        };
        let mut owner = map;
        for index in inner {
            owner = self.entry_decl(owner, *index)?;
        }
        self.remove_entry(owner, *last)
    }

    pub fn field_decl(&self, map: DeclId, name: &str) -> Result<DeclId> {
        let mut cursor = map;
        for index in self.resolve_path(map, name)? {
            cursor = self.entry_decl(cursor, index)?;
        }
        Ok(cursor)
    }

    /// Reachable field names in layout order, hoisted names included.
    pub fn field_names(&self, map: DeclId) -> Result<Vec<String>> {
        let mapping = self.mapping_spec(map)?;
        let mut names = Vec::new();
        for (index, name) in mapping.names.iter().enumerate() {
            match name {
                Some(name) => names.push(name.clone()),
                None => names.extend(self.field_names(mapping.list.entries[index])?),
            }
        }
        Ok(names)
    }

    fn resolve_path(&self, map: DeclId, name: &str) -> Result<Vec<usize>> {
        self.mapping_spec(map)?
            .lookup
            .get(name)
            .cloned()
            .ok_or_else(|| LayoutError::FieldNotFound {
                decl: map,
                name: name.to_owned(),
            })
    }

    /// The mapping `id` is an anonymous entry of.
    fn anonymous_parent(&self, id: DeclId) -> Result<Option<DeclId>> {
        let Some(parent) = self.decl(id)?.parent else {
            return Ok(None);
        };
        let Some(mapping) = self.decl(parent)?.kind.mapping() else {
            return Ok(None);
        };
        let anonymous = mapping
            .list
            .entries
            .iter()
            .position(|e| *e == id)
            .is_some_and(|index| mapping.names[index].is_none());
        Ok(anonymous.then_some(parent))
    }

    /// Rebuilds the name lookup of `id` and of every mapping it is hoisted
    /// into.
    pub(crate) fn refresh_lookups(&mut self, id: DeclId) -> Result<()> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if self.decl(current)?.kind.mapping().is_none() {
                return Ok(());
            }
            let lookup = self.build_lookup(current)?;
            if let Some(mapping) = self.decl_mut(current)?.kind.mapping_mut() {
                mapping.lookup = lookup;
            }
            cursor = self.anonymous_parent(current)?;
        }
        Ok(())
    }

    fn build_lookup(&self, map: DeclId) -> Result<HashMap<String, Vec<usize>>> {
        let mapping = self.mapping_spec(map)?;
        let mut lookup = HashMap::new();
        for (index, name) in mapping.names.iter().enumerate() {
            match name {
                Some(name) => {
                    lookup.insert(name.clone(), vec![index]);
                }
                None => {
                    let inner = self.mapping_spec(mapping.list.entries[index])?;
                    for (name, path) in &inner.lookup {
                        let mut full = Vec::with_capacity(path.len() + 1);
                        full.push(index);
                        full.extend_from_slice(path);
                        lookup.insert(name.clone(), full);
                    }
                }
            }
        }
        Ok(lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NumericSpec;

    #[test]
    fn structure_fields_by_name() -> Result<()> {
        let mut layout = Layout::default();
        let map = layout.structure(DeclArgs::new());
        let tag = layout.numeric(NumericSpec::u8())?;
        let len = layout.numeric(NumericSpec::be(16))?;

        layout.push_field(map, Some("tag"), tag)?;
        assert_eq!(layout.push_field(map, Some("len"), len)?, 8);
        assert_eq!(layout.field_decl(map, "len")?, len);
        assert_eq!(layout.field_names(map)?, ["tag", "len"]);
        assert!(matches!(
            layout.field_decl(map, "nope"),
            Err(LayoutError::FieldNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn union_fields_share_offset_zero() -> Result<()> {
        let mut layout = Layout::default();
        let union = layout.union(DeclArgs::new());
        let small = layout.numeric(NumericSpec::u8())?;
        let wide = layout.numeric(NumericSpec::be(32))?;

        assert_eq!(layout.push_field(union, Some("small"), small)?, 0);
        assert_eq!(layout.push_field(union, Some("wide"), wide)?, 0);
        assert_eq!(layout.size(union)?, 32);

        layout.remove_field(union, "wide")?;
        assert_eq!(layout.size(union)?, 8);
        Ok(())
    }

    #[test]
    fn anonymous_fields_are_hoisted() -> Result<()> {
        let mut layout = Layout::default();
        let outer = layout.structure(DeclArgs::new());
        let inner = layout.union(DeclArgs::new());
        let a = layout.numeric(NumericSpec::u8())?;
        let b = layout.numeric(NumericSpec::be(16))?;
        layout.push_field(inner, Some("a"), a)?;
        layout.push_field(outer, None, inner)?;

        // declared after hoisting, still visible from the outside
        layout.push_field(inner, Some("b"), b)?;
        assert_eq!(layout.field_decl(outer, "a")?, a);
        assert_eq!(layout.field_decl(outer, "b")?, b);
        assert_eq!(layout.field_names(outer)?, ["a", "b"]);

        let clash = layout.numeric(NumericSpec::u8())?;
        assert!(matches!(
            layout.push_field(outer, Some("b"), clash),
            Err(LayoutError::NameCollision { .. })
        ));
        assert!(matches!(
            layout.push_field(inner, Some("a"), clash),
            Err(LayoutError::NameCollision { .. })
        ));

        assert_eq!(layout.remove_field(outer, "a")?, a);
        assert!(layout.field_decl(outer, "a").is_err());
        Ok(())
    }

    #[test]
    fn anonymous_field_must_be_a_mapping() -> Result<()> {
        let mut layout = Layout::default();
        let map = layout.structure(DeclArgs::new());
        let raw = layout.raw(DeclArgs::new().bits(8));
        assert!(matches!(
            layout.push_field(map, None, raw),
            Err(LayoutError::AnonymousNotMapping(id)) if id == raw
        ));
        Ok(())
    }
}
