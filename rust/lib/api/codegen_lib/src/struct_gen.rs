//! Struct/enum emitter: one typed declaration per class.

use tracing::debug;

use crate::decl::{CallbackDecl, ConstDecl, DeclTable, EnumDecl, StructDecl, TypeDecl, UnionDecl};
use crate::model::{Model, ResolvedClass, ResolvedKind};

/// Type declaration of a class; `None` for constants.
pub fn type_decl(class: &ResolvedClass) -> Option<TypeDecl> {
    let decl = match &class.kind {
        ResolvedKind::Struct(fields) => TypeDecl::Struct(StructDecl {
            class: class.id,
            name: class.name.clone(),
            doc: class.doc.clone(),
            fields: fields.clone(),
            derived: class.derived.clone(),
            manual: class.manual(),
            opaque: class.is_opaque(),
        }),
        ResolvedKind::Enum(variants) if class.is_tagged_union() => TypeDecl::Union(UnionDecl {
            class: class.id,
            name: class.name.clone(),
            doc: class.doc.clone(),
            variants: variants.clone(),
            derived: class.derived.clone(),
            manual: class.manual(),
        }),
        ResolvedKind::Enum(variants) => TypeDecl::Enum(EnumDecl {
            class: class.id,
            name: class.name.clone(),
            doc: class.doc.clone(),
            variants: variants.clone(),
            derived: class.derived.clone(),
            manual: class.manual(),
        }),
        ResolvedKind::Callback { args, ret } => TypeDecl::Callback(CallbackDecl {
            class: class.id,
            name: class.name.clone(),
            doc: class.doc.clone(),
            args: args.clone(),
            ret: ret.clone(),
        }),
        ResolvedKind::Const { .. } => return None,
    };
    Some(decl)
}

pub fn const_decl(class: &ResolvedClass) -> Option<ConstDecl> {
    match &class.kind {
        ResolvedKind::Const { ty, value } => Some(ConstDecl {
            class: class.id,
            name: class.name.clone(),
            doc: class.doc.clone(),
            ty: *ty,
            value: value.clone(),
        }),
        _ => None,
    }
}

/// Fill the type and const sections of `table` in declaration order.
pub fn emit_types(model: &Model, table: &mut DeclTable) {
    for class in model.classes() {
        if let Some(decl) = type_decl(class) {
            table.types.insert(class.id, decl);
        } else if let Some(c) = const_decl(class) {
            table.consts.push(c);
        }
    }
    debug!(
        "StructGen: {} type declarations, {} constants",
        table.types.len(),
        table.consts.len()
    );
}
