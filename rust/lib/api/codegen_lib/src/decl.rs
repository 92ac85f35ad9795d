//! Typed declaration tree.
//!
//! The emitters turn the resolved model into these declarations once; every
//! backend is a printer over the same table.

use indexmap::IndexMap;

use apigen_ir::{CapabilitySet, ClassId, Primitive, Receiver};

use crate::model::{Param, ResolvedField, ResolvedVariant, TyExpr};

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub class: ClassId,
    pub name: String,
    pub doc: Option<String>,
    pub fields: Vec<ResolvedField>,
    pub derived: CapabilitySet,
    pub manual: CapabilitySet,
    pub opaque: bool,
}

/// Enum without payloads, `repr(C)`.
#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub class: ClassId,
    pub name: String,
    pub doc: Option<String>,
    pub variants: Vec<ResolvedVariant>,
    pub derived: CapabilitySet,
    pub manual: CapabilitySet,
}

/// Enum with at least one payload: a tagged union.
#[derive(Debug, Clone)]
pub struct UnionDecl {
    pub class: ClassId,
    pub name: String,
    pub doc: Option<String>,
    pub variants: Vec<ResolvedVariant>,
    pub derived: CapabilitySet,
    pub manual: CapabilitySet,
}

#[derive(Debug, Clone)]
pub struct CallbackDecl {
    pub class: ClassId,
    pub name: String,
    pub doc: Option<String>,
    pub args: Vec<TyExpr>,
    pub ret: Option<TyExpr>,
}

#[derive(Debug, Clone)]
pub enum TypeDecl {
    Struct(StructDecl),
    Enum(EnumDecl),
    Union(UnionDecl),
    Callback(CallbackDecl),
}

impl TypeDecl {
    pub fn class(&self) -> ClassId {
        match self {
            TypeDecl::Struct(d) => d.class,
            TypeDecl::Enum(d) => d.class,
            TypeDecl::Union(d) => d.class,
            TypeDecl::Callback(d) => d.class,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeDecl::Struct(d) => &d.name,
            TypeDecl::Enum(d) => &d.name,
            TypeDecl::Union(d) => &d.name,
            TypeDecl::Callback(d) => &d.name,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            TypeDecl::Struct(d) => d.doc.as_deref(),
            TypeDecl::Enum(d) => d.doc.as_deref(),
            TypeDecl::Union(d) => d.doc.as_deref(),
            TypeDecl::Callback(d) => d.doc.as_deref(),
        }
    }

    pub fn derived(&self) -> CapabilitySet {
        match self {
            TypeDecl::Struct(d) => d.derived.clone(),
            TypeDecl::Enum(d) => d.derived.clone(),
            TypeDecl::Union(d) => d.derived.clone(),
            TypeDecl::Callback(_) => CapabilitySet::new(),
        }
    }

    pub fn manual(&self) -> CapabilitySet {
        match self {
            TypeDecl::Struct(d) => d.manual.clone(),
            TypeDecl::Enum(d) => d.manual.clone(),
            TypeDecl::Union(d) => d.manual.clone(),
            TypeDecl::Callback(_) => CapabilitySet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub class: ClassId,
    pub name: String,
    pub doc: Option<String>,
    pub ty: Primitive,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Constructor,
    /// Schema function, with or without a receiver.
    Method,
    Delete,
    ShallowCopy,
    DeepCopy,
    PartialEq,
    PartialCmp,
    Cmp,
    Hash,
    DebugString,
}

impl FnKind {
    pub fn is_synthesized(self) -> bool {
        !matches!(self, FnKind::Constructor | FnKind::Method)
    }
}

/// Native-export body, by provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Patch(String),
    Schema(String),
    /// Forwarding call or lifecycle body built by the generator.
    Synthesized(String),
    /// The class is virtual for the native layer; its patch carries the function.
    Omitted,
}

impl Body {
    pub fn text(&self) -> Option<&str> {
        match self {
            Body::Patch(s) | Body::Schema(s) | Body::Synthesized(s) => Some(s),
            Body::Omitted => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FnDecl {
    pub class: ClassId,
    /// Schema spelling (`new`, `shallow_copy`).
    pub name: String,
    /// Exported symbol (`AzApp_shallowCopy`).
    pub symbol: String,
    pub kind: FnKind,
    pub receiver: Option<Receiver>,
    pub receiver_name: String,
    pub params: Vec<Param>,
    pub ret: Option<TyExpr>,
    pub doc: Option<String>,
    pub body: Body,
}

impl FnDecl {
    /// Returns a value of the class itself (constructors, copies).
    pub fn returns_self(&self) -> bool {
        matches!(self.ret, Some(TyExpr::Class(id)) if id == self.class)
    }
}

/// Every declaration of one model, keyed by class in declaration order.
#[derive(Debug, Clone, Default)]
pub struct DeclTable {
    pub types: IndexMap<ClassId, TypeDecl>,
    pub consts: Vec<ConstDecl>,
    pub functions: IndexMap<ClassId, Vec<FnDecl>>,
}

impl DeclTable {
    pub fn type_decl(&self, id: ClassId) -> Option<&TypeDecl> {
        self.types.get(&id)
    }

    pub fn functions_of(&self, id: ClassId) -> &[FnDecl] {
        self.functions.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn function(&self, id: ClassId, kind: FnKind) -> Option<&FnDecl> {
        self.functions_of(id).iter().find(|f| f.kind == kind)
    }

    pub fn all_functions(&self) -> impl Iterator<Item = &FnDecl> {
        self.functions.values().flatten()
    }
}
