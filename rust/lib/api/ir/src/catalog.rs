//! Pre-built index over one API version.
//!
//! Every "is this primitive / opaque / virtual / droppable" question the
//! later stages ask is answered from tables built once in [`Catalog::new`].

use std::collections::HashMap;
use thiserror::Error;

use crate::schema::{ApiVersion, ClassDef, ClassKind};
use crate::types::{analyze, Ownership, Primitive, Target};

/// Dense index of a class within its [`Catalog`], in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

/// Memory representation of a class's generated mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Mirror holds the data directly, matching the backing layout.
    Inline,
    /// Mirror is a handle to heap data owned by the native implementation.
    OpaqueHandle,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("type '{0}' does not name a class")]
    Unresolved(String),

    #[error("type '{name}' is defined in several modules: {}", .modules.join(", "))]
    Ambiguous { name: String, modules: Vec<String> },
}

/// Resolved descriptor of one class.
#[derive(Debug, Clone)]
pub struct ClassEntry<'a> {
    pub id: ClassId,
    pub module: &'a str,
    pub name: &'a str,
    pub def: &'a ClassDef,
    pub representation: Representation,
    /// Dropping the value runs native code: opaque, custom destructor, or a
    /// by-value field that needs drop.
    pub needs_drop: bool,
    /// The class is a callback typedef or holds one by value, transitively.
    pub contains_callback: bool,
}

pub struct Catalog<'a> {
    entries: Vec<ClassEntry<'a>>,
    by_name: HashMap<&'a str, Vec<ClassId>>,
}

impl<'a> Catalog<'a> {
    pub fn new(version: &'a ApiVersion) -> Self {
        let mut entries = Vec::new();
        let mut by_name: HashMap<&'a str, Vec<ClassId>> = HashMap::new();

        for (module, name, def) in version.classes() {
            let id = ClassId(entries.len());
            let representation = if def.is_backed() && def.is_boxed_object {
                Representation::OpaqueHandle
            } else {
                Representation::Inline
            };
            entries.push(ClassEntry {
                id,
                module,
                name,
                def,
                representation,
                needs_drop: representation == Representation::OpaqueHandle || def.custom_destructor,
                contains_callback: matches!(def.kind, ClassKind::Callback(_)),
            });
            by_name.entry(name).or_default().push(id);
        }

        let mut catalog = Catalog { entries, by_name };
        catalog.propagate_value_flags();
        catalog
    }

    /// Spread `needs_drop` / `contains_callback` along by-value edges until stable.
    fn propagate_value_flags(&mut self) {
        let edges: Vec<Vec<ClassId>> = self
            .entries
            .iter()
            .map(|e| self.value_class_refs(e.def))
            .collect();

        loop {
            let mut changed = false;
            for (i, deps) in edges.iter().enumerate() {
                let drop = deps.iter().any(|d| self.entries[d.0].needs_drop);
                let callback = deps.iter().any(|d| self.entries[d.0].contains_callback);
                let is_data = matches!(self.entries[i].def.kind, ClassKind::Struct(_) | ClassKind::Enum(_));
                let entry = &mut self.entries[i];
                if is_data && drop && !entry.needs_drop {
                    entry.needs_drop = true;
                    changed = true;
                }
                if is_data && callback && !entry.contains_callback {
                    entry.contains_callback = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Classes a struct or enum holds by value (fields, payloads, array elements).
    ///
    /// Unresolvable names are skipped; reporting them is the resolver's job.
    pub fn value_class_refs(&self, def: &ClassDef) -> Vec<ClassId> {
        let types: Vec<&str> = match &def.kind {
            ClassKind::Struct(fields) => fields.iter().map(|f| f.ty.as_str()).collect(),
            ClassKind::Enum(variants) => variants.iter().filter_map(|v| v.ty.as_deref()).collect(),
            ClassKind::Callback(_) | ClassKind::Const(_) => Vec::new(),
        };
        types
            .into_iter()
            .map(analyze)
            .filter(|t| t.ownership == Ownership::Value)
            .filter_map(|t| self.resolve(&t.base).ok())
            .collect()
    }

    /// Whether `name` is in the closed primitive set.
    pub fn is_primitive(name: &str) -> bool {
        Primitive::from_name(name).is_some()
    }

    pub fn resolve(&self, name: &str) -> Result<ClassId, ResolveError> {
        match self.by_name.get(name).map(Vec::as_slice) {
            Some([id]) => Ok(*id),
            Some(ids) if ids.len() > 1 => Err(ResolveError::Ambiguous {
                name: name.to_string(),
                modules: ids.iter().map(|id| self.entries[id.0].module.to_string()).collect(),
            }),
            _ => Err(ResolveError::Unresolved(name.to_string())),
        }
    }

    /// Resolve a class by `(module, name)` without ambiguity.
    pub fn find_in_module(&self, module: &str, name: &str) -> Option<ClassId> {
        self.by_name
            .get(name)?
            .iter()
            .copied()
            .find(|id| self.entries[id.0].module == module)
    }

    pub fn entry(&self, id: ClassId) -> &ClassEntry<'a> {
        &self.entries[id.0]
    }

    pub fn entries(&self) -> &[ClassEntry<'a>] {
        &self.entries
    }

    pub fn representation_of(&self, id: ClassId) -> Representation {
        self.entries[id.0].representation
    }

    /// True when the class is supplied entirely by a patch for `target`.
    pub fn is_virtual(&self, id: ClassId, target: Target) -> bool {
        self.entries[id.0].def.use_patches.contains(&target)
    }

    pub fn needs_drop(&self, id: ClassId) -> bool {
        self.entries[id.0].needs_drop
    }

    pub fn contains_callback(&self, id: ClassId) -> bool {
        self.entries[id.0].contains_callback
    }

    /// Class names declared in more than one module, with those modules.
    pub fn duplicates(&self) -> Vec<(&'a str, Vec<&'a str>)> {
        let mut dups: Vec<(&'a str, Vec<&'a str>)> = self
            .by_name
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(name, ids)| (*name, ids.iter().map(|id| self.entries[id.0].module).collect()))
            .collect();
        dups.sort();
        dups
    }
}
