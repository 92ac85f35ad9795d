//! Resolved model of one API version.
//!
//! Built once per run from the schema: every type string is resolved to a
//! [`TyExpr`], the per-class flags come from the [`Catalog`], capability sets
//! are pruned, and the header declaration order is computed by the sorter.
//! Backends only ever read it.

use std::collections::BTreeSet;

use apigen_ir::{
    analyze, is_identifier, ApiSchema, ApiVersion, Capability, CapabilitySet, Catalog, ClassDef, ClassId,
    ClassKind, FunctionDef, Ownership, Primitive, Receiver, Representation, Target,
};
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::error::{BindgenError, Result};
use crate::sort::{self, EdgeKind, SortNode};

/// A resolved type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TyExpr {
    Prim(Primitive),
    Class(ClassId),
    Array { elem: Box<TyExpr>, len: usize },
    Indirect { ownership: Ownership, inner: Box<TyExpr> },
}

impl TyExpr {
    pub fn indirect(ownership: Ownership, inner: TyExpr) -> TyExpr {
        if ownership.is_indirect() {
            TyExpr::Indirect {
                ownership,
                inner: Box::new(inner),
            }
        } else {
            inner
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            TyExpr::Indirect { ownership, .. } => *ownership,
            _ => Ownership::Value,
        }
    }

    /// Type behind the ownership qualifier.
    pub fn pointee(&self) -> &TyExpr {
        match self {
            TyExpr::Indirect { inner, .. } => inner,
            other => other,
        }
    }

    /// Class named at the root of the expression, through arrays and indirection.
    pub fn class(&self) -> Option<ClassId> {
        match self {
            TyExpr::Prim(_) => None,
            TyExpr::Class(id) => Some(*id),
            TyExpr::Array { elem, .. } => elem.class(),
            TyExpr::Indirect { inner, .. } => inner.class(),
        }
    }

    /// Class held by value (directly or as array element).
    pub fn value_class(&self) -> Option<ClassId> {
        match self {
            TyExpr::Indirect { .. } | TyExpr::Prim(_) => None,
            TyExpr::Class(id) => Some(*id),
            TyExpr::Array { elem, .. } => elem.value_class(),
        }
    }

    /// Primitive held by value (directly or as array element).
    pub fn value_primitive(&self) -> Option<Primitive> {
        match self {
            TyExpr::Prim(p) => Some(*p),
            TyExpr::Array { elem, .. } => elem.value_primitive(),
            _ => None,
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, TyExpr::Indirect { .. })
    }

    fn collect_edges(&self, kind: EdgeKind, out: &mut Vec<(ClassId, EdgeKind)>) {
        match self {
            TyExpr::Prim(_) => {}
            TyExpr::Class(id) => out.push((*id, kind)),
            TyExpr::Array { elem, .. } => elem.collect_edges(kind, out),
            TyExpr::Indirect { inner, .. } => inner.collect_edges(EdgeKind::Pointer, out),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub name: String,
    pub ty: TyExpr,
    pub doc: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedVariant {
    pub name: String,
    pub payload: Option<TyExpr>,
    pub doc: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TyExpr,
}

#[derive(Debug, Clone)]
pub struct ResolvedFn {
    pub name: String,
    pub doc: Option<String>,
    pub is_constructor: bool,
    pub receiver: Option<Receiver>,
    pub params: Vec<Param>,
    /// `None` for unit returns.
    pub ret: Option<TyExpr>,
    pub fn_body: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ResolvedKind {
    Struct(Vec<ResolvedField>),
    Enum(Vec<ResolvedVariant>),
    Callback { args: Vec<TyExpr>, ret: Option<TyExpr> },
    Const { ty: Primitive, value: String },
}

#[derive(Debug, Clone)]
pub struct ResolvedClass {
    pub id: ClassId,
    pub module: String,
    pub name: String,
    pub doc: Option<String>,
    pub external: Option<String>,
    pub representation: Representation,
    pub needs_drop: bool,
    pub custom_destructor: bool,
    pub contains_callback: bool,
    /// Capabilities the class implements, derived or by hand.
    pub declared: CapabilitySet,
    /// Capabilities emitted as `#[derive(...)]`.
    pub derived: CapabilitySet,
    pub use_patches: Vec<Target>,
    pub kind: ResolvedKind,
    pub constructors: Vec<ResolvedFn>,
    pub functions: Vec<ResolvedFn>,
    /// Element type when the class has the `ptr`/`len`/`cap` container layout.
    pub container_element: Option<TyExpr>,
}

impl ResolvedClass {
    pub fn is_opaque(&self) -> bool {
        self.representation == Representation::OpaqueHandle
    }

    pub fn is_backed(&self) -> bool {
        self.external.is_some()
    }

    pub fn is_virtual(&self, target: Target) -> bool {
        self.use_patches.contains(&target)
    }

    /// Structs and enums: the classes that get lifecycle functions.
    pub fn is_data(&self) -> bool {
        matches!(self.kind, ResolvedKind::Struct(_) | ResolvedKind::Enum(_))
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind, ResolvedKind::Const { .. })
    }

    pub fn is_callback(&self) -> bool {
        matches!(self.kind, ResolvedKind::Callback { .. })
    }

    pub fn is_plain_enum(&self) -> bool {
        matches!(&self.kind, ResolvedKind::Enum(vs) if vs.iter().all(|v| v.payload.is_none()))
    }

    pub fn is_tagged_union(&self) -> bool {
        matches!(&self.kind, ResolvedKind::Enum(vs) if vs.iter().any(|v| v.payload.is_some()))
    }

    pub fn fields(&self) -> &[ResolvedField] {
        match &self.kind {
            ResolvedKind::Struct(fields) => fields,
            _ => &[],
        }
    }

    pub fn variants(&self) -> &[ResolvedVariant] {
        match &self.kind {
            ResolvedKind::Enum(variants) => variants,
            _ => &[],
        }
    }

    /// Declared capabilities that need a hand-written impl.
    pub fn manual(&self) -> CapabilitySet {
        self.declared.difference(&self.derived)
    }

    pub fn all_functions(&self) -> impl Iterator<Item = &ResolvedFn> {
        self.constructors.iter().chain(self.functions.iter())
    }
}

#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub doc: Option<String>,
    pub classes: Vec<ClassId>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub version: String,
    classes: Vec<ResolvedClass>,
    modules: Vec<ModuleInfo>,
    header_order: Vec<ClassId>,
    element_order: Vec<ClassId>,
    forward_declared: BTreeSet<ClassId>,
    text_class: Option<ClassId>,
}

impl Model {
    /// Resolve the configured version (or the last one) of `schema`.
    pub fn build(schema: &ApiSchema, config: &GeneratorConfig) -> Result<Model> {
        let (name, version) = select_version(schema, config)?;
        Model::from_version(name, version, config)
    }

    pub fn from_version(name: &str, version: &ApiVersion, config: &GeneratorConfig) -> Result<Model> {
        let catalog = Catalog::new(version);

        let mut classes = Vec::with_capacity(catalog.entries().len());
        for entry in catalog.entries() {
            classes.push(resolve_class(&catalog, entry.id)?);
        }

        for i in 0..classes.len() {
            let derived = derive_capabilities(&classes[i], &classes)?;
            classes[i].derived = derived;
        }

        // Catalog ids are dense in declaration order, so each module owns a contiguous range.
        let mut next = 0;
        let modules: Vec<ModuleInfo> = version
            .modules
            .iter()
            .map(|(module_name, module)| {
                let ids = (next..next + module.classes.len()).map(ClassId).collect();
                next += module.classes.len();
                ModuleInfo {
                    name: module_name.clone(),
                    doc: module.doc.clone(),
                    classes: ids,
                }
            })
            .collect();

        let nodes: Vec<SortNode> = classes.iter().filter(|c| !c.is_const()).map(sort_node).collect();
        let sorted = sort::sort(&nodes)?;

        let text_class = match &config.text_class {
            Some(name) => Some(catalog.resolve(name).map_err(|e| BindgenError::SchemaResolution {
                reference: name.clone(),
                context: "config text_class".into(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        debug!(
            "Model: version {} with {} modules, {} classes",
            name,
            modules.len(),
            classes.len()
        );

        Ok(Model {
            version: name.to_string(),
            classes,
            modules,
            header_order: sorted.order,
            element_order: sorted.element_order,
            forward_declared: sorted.forward_declared,
            text_class,
        })
    }

    pub fn class(&self, id: ClassId) -> &ResolvedClass {
        &self.classes[id.0]
    }

    pub fn classes(&self) -> &[ResolvedClass] {
        &self.classes
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    /// Look up a class by name (first match in declaration order).
    pub fn find(&self, name: &str) -> Option<&ResolvedClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Type declarations (no consts) in the order `target` must emit them.
    pub fn declaration_order(&self, target: Target) -> Vec<ClassId> {
        if target.requires_forward_declarations() {
            self.header_order.clone()
        } else {
            self.element_order.clone()
        }
    }

    /// Classes of `module` for `target`: types follow `declaration_order`,
    /// constants keep their schema slots.
    pub fn module_order(&self, module: &ModuleInfo, target: Target) -> Vec<ClassId> {
        let mut types = self
            .declaration_order(target)
            .into_iter()
            .filter(|id| module.classes.contains(id));
        module
            .classes
            .iter()
            .filter_map(|&id| if self.class(id).is_const() { Some(id) } else { types.next() })
            .collect()
    }

    pub fn forward_declared(&self) -> &BTreeSet<ClassId> {
        &self.forward_declared
    }

    pub fn is_forward_declared(&self, id: ClassId) -> bool {
        self.forward_declared.contains(&id)
    }

    pub fn text_class(&self) -> Option<&ResolvedClass> {
        self.text_class.map(|id| self.class(id))
    }

    pub fn is_text(&self, id: ClassId) -> bool {
        self.text_class == Some(id)
    }
}

pub(crate) fn select_version<'s>(schema: &'s ApiSchema, config: &GeneratorConfig) -> Result<(&'s str, &'s ApiVersion)> {
    match &config.version {
        Some(v) => schema
            .versions
            .get_key_value(v)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| BindgenError::UnknownVersion(v.clone())),
        None => schema
            .latest()
            .ok_or_else(|| BindgenError::UnknownVersion("<none>".into())),
    }
}

fn sort_node(class: &ResolvedClass) -> SortNode {
    let mut deps = Vec::new();
    match &class.kind {
        ResolvedKind::Struct(fields) => {
            for f in fields {
                f.ty.collect_edges(EdgeKind::Value, &mut deps);
            }
        }
        ResolvedKind::Enum(variants) => {
            for ty in variants.iter().filter_map(|v| v.payload.as_ref()) {
                ty.collect_edges(EdgeKind::Value, &mut deps);
            }
        }
        ResolvedKind::Callback { args, ret } => {
            for ty in args.iter().chain(ret.iter()) {
                ty.collect_edges(EdgeKind::Value, &mut deps);
            }
        }
        ResolvedKind::Const { .. } => {}
    }
    SortNode {
        id: class.id,
        name: class.name.clone(),
        deps,
        forward_declarable: matches!(class.kind, ResolvedKind::Struct(_)) || class.is_tagged_union(),
    }
}

fn resolve_class(catalog: &Catalog<'_>, id: ClassId) -> Result<ResolvedClass> {
    let entry = catalog.entry(id);
    let def: &ClassDef = entry.def;
    let ctx = |what: &str| format!("{}.{} {}", entry.module, entry.name, what);

    let kind = match &def.kind {
        ClassKind::Struct(fields) => {
            let mut resolved = Vec::with_capacity(fields.len());
            for f in fields {
                resolved.push(ResolvedField {
                    name: f.name.clone(),
                    ty: resolve_type(catalog, &f.ty, &ctx(&format!("field {}", f.name)))?,
                    doc: f.doc.clone(),
                });
            }
            if resolved.is_empty() && entry.representation == Representation::OpaqueHandle {
                resolved.push(ResolvedField {
                    name: "ptr".into(),
                    ty: TyExpr::indirect(Ownership::MutPtr, TyExpr::Prim(Primitive::CVoid)),
                    doc: None,
                });
            }
            ResolvedKind::Struct(resolved)
        }
        ClassKind::Enum(variants) => {
            let mut resolved = Vec::with_capacity(variants.len());
            for v in variants {
                let payload = match &v.ty {
                    Some(ty) => Some(resolve_type(catalog, ty, &ctx(&format!("variant {}", v.name)))?),
                    None => None,
                };
                resolved.push(ResolvedVariant {
                    name: v.name.clone(),
                    payload,
                    doc: v.doc.clone(),
                });
            }
            ResolvedKind::Enum(resolved)
        }
        ClassKind::Callback(cb) => {
            let mut args = Vec::with_capacity(cb.fn_args.len());
            for (i, arg) in cb.fn_args.iter().enumerate() {
                let base = resolve_type(catalog, &arg.ty, &ctx(&format!("callback argument {}", i)))?;
                args.push(TyExpr::indirect(arg.ownership, base));
            }
            let ret = match &cb.returns {
                Some(r) => non_unit(resolve_type(catalog, &r.ty, &ctx("callback return"))?),
                None => None,
            };
            ResolvedKind::Callback { args, ret }
        }
        ClassKind::Const(c) => match Primitive::from_name(c.ty.trim()) {
            Some(ty) => ResolvedKind::Const {
                ty,
                value: c.value.clone(),
            },
            None => {
                return Err(BindgenError::SchemaResolution {
                    reference: c.ty.clone(),
                    context: ctx("const"),
                    reason: "constants must have a primitive type".into(),
                })
            }
        },
    };

    let mut constructors = Vec::new();
    let mut functions = Vec::new();
    for (name, func, is_ctor) in def.all_functions() {
        let resolved = resolve_fn(catalog, name, func, is_ctor, &ctx(name))?;
        if is_ctor {
            constructors.push(resolved);
        } else {
            functions.push(resolved);
        }
    }

    let container_element = match &kind {
        ResolvedKind::Struct(fields) => container_element(fields),
        _ => None,
    };

    Ok(ResolvedClass {
        id,
        module: entry.module.to_string(),
        name: entry.name.to_string(),
        doc: def.doc.clone(),
        external: def.external.clone(),
        representation: entry.representation,
        needs_drop: entry.needs_drop,
        custom_destructor: def.custom_destructor,
        contains_callback: entry.contains_callback,
        declared: def.derive.clone(),
        derived: CapabilitySet::new(),
        use_patches: def.use_patches.clone(),
        kind,
        constructors,
        functions,
        container_element,
    })
}

fn resolve_fn(catalog: &Catalog<'_>, name: &str, func: &FunctionDef, is_ctor: bool, ctx: &str) -> Result<ResolvedFn> {
    let receiver = match func.fn_args.first() {
        Some(first) if first.is_receiver() => match Receiver::parse(&first.ty) {
            Some(r) => Some(r),
            None => {
                return Err(BindgenError::SchemaResolution {
                    reference: first.ty.clone(),
                    context: ctx.to_string(),
                    reason: "unknown receiver convention".into(),
                })
            }
        },
        _ => None,
    };

    let mut params = Vec::new();
    for arg in func.params() {
        params.push(Param {
            name: arg.name.clone(),
            ty: resolve_type(catalog, &arg.ty, &format!("{}({})", ctx, arg.name))?,
        });
    }
    let ret = match &func.returns {
        Some(r) => non_unit(resolve_type(catalog, &r.ty, &format!("{} return", ctx))?),
        None => None,
    };

    Ok(ResolvedFn {
        name: name.to_string(),
        doc: func.doc.clone(),
        is_constructor: is_ctor,
        receiver,
        params,
        ret,
        fn_body: func.fn_body.clone(),
    })
}

fn non_unit(ty: TyExpr) -> Option<TyExpr> {
    match ty {
        TyExpr::Prim(Primitive::Unit) => None,
        other => Some(other),
    }
}

/// Resolve one raw type string. Constants are not types.
pub fn resolve_type(catalog: &Catalog<'_>, raw: &str, context: &str) -> Result<TyExpr> {
    let analyzed = analyze(raw);
    let fail = |reason: String| BindgenError::SchemaResolution {
        reference: raw.to_string(),
        context: context.to_string(),
        reason,
    };

    if !is_identifier(&analyzed.base) {
        return Err(fail("malformed type".into()));
    }
    let base = match Primitive::from_name(&analyzed.base) {
        Some(p) => TyExpr::Prim(p),
        None => {
            let id = catalog.resolve(&analyzed.base).map_err(|e| fail(e.to_string()))?;
            if matches!(catalog.entry(id).def.kind, ClassKind::Const(_)) {
                return Err(fail(format!("'{}' is a constant, not a type", analyzed.base)));
            }
            TyExpr::Class(id)
        }
    };
    let value = match analyzed.array_len {
        Some(len) => TyExpr::Array {
            elem: Box::new(base),
            len,
        },
        None => base,
    };
    Ok(TyExpr::indirect(analyzed.ownership, value))
}

fn container_element(fields: &[ResolvedField]) -> Option<TyExpr> {
    let field = |name: &str| fields.iter().find(|f| f.name == name);
    let is_usize = |f: Option<&ResolvedField>| matches!(f.map(|f| &f.ty), Some(TyExpr::Prim(Primitive::Usize)));
    match field("ptr").map(|f| &f.ty) {
        Some(TyExpr::Indirect { ownership, inner })
            if ownership.is_pointer() && is_usize(field("len")) && is_usize(field("cap")) =>
        {
            match inner.as_ref() {
                TyExpr::Prim(Primitive::CVoid) => None,
                other => Some(other.clone()),
            }
        }
        _ => None,
    }
}

/// Prune the declared set down to what `#[derive]` can provide.
fn derive_capabilities(class: &ResolvedClass, classes: &[ResolvedClass]) -> Result<CapabilitySet> {
    if !class.is_data() {
        return Ok(CapabilitySet::new());
    }
    if class.declared.contains(Capability::Copy) && class.needs_drop {
        return Err(BindgenError::DeriveConflict {
            class: class.name.clone(),
            capability: Capability::Copy,
            reason: "cannot be declared on a class that needs drop".into(),
        });
    }

    let mut caps = class.declared.clone();
    if class.custom_destructor || class.contains_callback {
        caps.retain(|c| matches!(c, Capability::Copy | Capability::Clone));
    }
    if class.is_opaque() || class.custom_destructor {
        caps.remove(Capability::Clone);
    }

    let members: Vec<&TyExpr> = match &class.kind {
        ResolvedKind::Struct(fields) => fields.iter().map(|f| &f.ty).collect(),
        ResolvedKind::Enum(variants) => variants.iter().filter_map(|v| v.payload.as_ref()).collect(),
        _ => Vec::new(),
    };
    for ty in members {
        if let Some(p) = ty.value_primitive() {
            caps = caps.intersection(&p.capabilities());
        }
        if let Some(id) = ty.value_class() {
            let member = &classes[id.0];
            if !member.is_callback() {
                caps = caps.intersection(&member.declared);
            }
        }
    }

    caps.close_over_requirements();
    Ok(caps)
}
