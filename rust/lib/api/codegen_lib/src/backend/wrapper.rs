//! Ergonomic Rust wrapper: one file per module plus a crate root.
//!
//! Inline classes are mirrored directly. Opaque classes get a raw handle
//! struct (`AzApp`) and a `#[repr(transparent)]` owner (`App`) whose `Drop`
//! calls the native destructor. An owner passed by value is leaked into the
//! call (shallow copy, then forget), so there is never a second live owner.

use std::collections::BTreeSet;

use apigen_ir::{Capability, ClassId, Ownership, Receiver, Target};
use tracing::debug;

use super::{banner, body_lines, derive_attr, ffi_return, rust_doc, rust_type};
use crate::decl::{FnDecl, FnKind, TypeDecl};
use crate::error::{BindgenError, Result};
use crate::model::{ModuleInfo, ResolvedClass, ResolvedKind, TyExpr};
use crate::naming::escape_rust;
use crate::{ArtifactId, Codegen, Context, GeneratedCode, GeneratedFile};

pub struct RustWrapperGenerator;

impl Codegen for RustWrapperGenerator {
    fn generate(&self, ctx: &Context<'_>) -> Result<GeneratedCode> {
        let mut files = vec![GeneratedFile {
            id: ArtifactId::WrapperRoot,
            path: "wrapper/lib.rs".into(),
            content: generate_root(ctx),
        }];
        for module in ctx.model.modules() {
            files.push(GeneratedFile {
                id: ArtifactId::Wrapper(module.name.clone()),
                path: format!("wrapper/{}.rs", module.name),
                content: generate_module(ctx, module)?,
            });
        }
        debug!("Wrapper: {} files", files.len());
        Ok(GeneratedCode { files })
    }

    fn target(&self) -> Target {
        Target::Rust
    }
}

fn generate_root(ctx: &Context<'_>) -> String {
    let mut output = banner(ctx, "//");
    output.push('\n');
    output.push_str(&format!("//! Safe Rust bindings to the {} native library.\n\n", ctx.config.library_name));
    output.push_str("#![allow(non_snake_case, non_camel_case_types, non_upper_case_globals)]\n");
    output.push_str("#![allow(improper_ctypes, unused_imports, clippy::all)]\n");
    if let Some(header) = ctx.patches.header(Target::Rust) {
        output.push('\n');
        output.push_str(header.trim_end());
        output.push('\n');
    }
    output.push('\n');
    for module in ctx.model.modules() {
        output.push_str(&format!("pub mod {};\n", escape_rust(&module.name)));
    }
    output
}

/// Names as seen inside the wrapper crate.
struct Names<'c> {
    ctx: &'c Context<'c>,
}

impl Names<'_> {
    fn class(&self, id: ClassId) -> &ResolvedClass {
        self.ctx.model.class(id)
    }

    fn safe(&self, id: ClassId) -> String {
        self.class(id).name.clone()
    }

    fn raw(&self, id: ClassId) -> String {
        format!("{}{}", self.ctx.config.prefix, self.class(id).name)
    }

    fn is_opaque(&self, id: ClassId) -> bool {
        self.class(id).is_opaque()
    }

    /// Public-facing spelling.
    fn ty(&self, ty: &TyExpr) -> String {
        rust_type(ty, &|id| self.safe(id))
    }

    /// Spelling in `extern "C"` declarations: opaque handles travel raw.
    fn ext(&self, ty: &TyExpr) -> String {
        let handle = match ty.pointee() {
            TyExpr::Class(id) => self.is_opaque(*id),
            _ => false,
        };
        if handle {
            rust_type(ty, &|id| self.raw(id))
        } else {
            self.ty(ty)
        }
    }

    /// Argument expression handing `name` of type `ty` to the native side.
    fn arg(&self, name: &str, ty: &TyExpr) -> String {
        match ty {
            TyExpr::Class(id) if self.is_opaque(*id) => format!("{}.leak()", name),
            TyExpr::Indirect { ownership, inner } => match inner.as_ref() {
                TyExpr::Class(id) if self.is_opaque(*id) => match ownership {
                    Ownership::Ref => format!("&{}.ptr", name),
                    Ownership::RefMut => format!("&mut {}.ptr", name),
                    _ => format!("{}.cast()", name),
                },
                _ => name.to_string(),
            },
            _ => name.to_string(),
        }
    }
}

fn generate_module(ctx: &Context<'_>, module: &ModuleInfo) -> Result<String> {
    let names = Names { ctx };
    let classes: Vec<&ResolvedClass> = ctx
        .model
        .module_order(module, Target::Rust)
        .into_iter()
        .map(|id| ctx.model.class(id))
        .collect();

    let mut output = banner(ctx, "//");
    output.push('\n');
    match &module.doc {
        Some(doc) => {
            for line in doc.lines() {
                output.push_str(&format!("//! {}\n", line.trim_end()).replace("//! \n", "//!\n"));
            }
        }
        None => output.push_str(&format!("//! `{}` module.\n", module.name)),
    }
    output.push('\n');
    output.push_str("use core::ffi::c_void;\n");
    output.push_str(&imports(ctx, module));

    for class in &classes {
        output.push('\n');
        output.push_str(&class_items(&names, class)?);
    }

    if let Some(patch) = ctx.patches.module(&module.name, Target::Rust) {
        output.push('\n');
        output.push_str(patch.trim_end());
        output.push('\n');
    }

    let externs: Vec<String> = classes
        .iter()
        .filter(|c| !c.is_virtual(Target::Rust))
        .flat_map(|c| ctx.decls.functions_of(c.id))
        .map(|f| extern_decl(&names, f))
        .collect();
    if !externs.is_empty() {
        output.push('\n');
        output.push_str(&format!("#[link(name = \"{}\")]\n", ctx.config.link_name()));
        output.push_str("extern \"C\" {\n");
        for e in externs {
            output.push_str(&e);
        }
        output.push_str("}\n");
    }

    Ok(output)
}

/// `use crate::other::{..};` for every class of another module this module mentions.
fn imports(ctx: &Context<'_>, module: &ModuleInfo) -> String {
    let mut used: BTreeSet<ClassId> = BTreeSet::new();
    let mut note = |ty: &TyExpr| {
        if let Some(id) = ty.class() {
            used.insert(id);
        }
    };
    for &id in &module.classes {
        let class = ctx.model.class(id);
        match &class.kind {
            ResolvedKind::Struct(fields) => fields.iter().for_each(|f| note(&f.ty)),
            ResolvedKind::Enum(variants) => variants.iter().filter_map(|v| v.payload.as_ref()).for_each(&mut note),
            ResolvedKind::Callback { args, ret } => args.iter().chain(ret.iter()).for_each(&mut note),
            ResolvedKind::Const { .. } => {}
        }
        for f in ctx.decls.functions_of(id) {
            f.params.iter().for_each(|p| note(&p.ty));
            f.ret.iter().for_each(&mut note);
        }
    }

    let mut output = String::new();
    for other in ctx.model.modules().iter().filter(|m| m.name != module.name) {
        let mut items = Vec::new();
        for &id in other.classes.iter().filter(|id| used.contains(id)) {
            let class = ctx.model.class(id);
            items.push(class.name.clone());
            if class.is_opaque() {
                items.push(format!("{}{}", ctx.config.prefix, class.name));
            }
        }
        if !items.is_empty() {
            output.push_str(&format!("use crate::{}::{{{}}};\n", escape_rust(&other.name), items.join(", ")));
        }
    }
    output
}

fn class_items(names: &Names<'_>, class: &ResolvedClass) -> Result<String> {
    let ctx = names.ctx;
    let class_patch = ctx.patches.class(&class.module, &class.name, Target::Rust);
    if class.is_virtual(Target::Rust) {
        let patch = class_patch.ok_or_else(|| BindgenError::MissingPatch {
            class: format!("{}.{}", class.module, class.name),
            target: Target::Rust,
        })?;
        return Ok(format!("{}\n", patch.trim_end()));
    }

    let mut output = String::new();
    if let Some(c) = ctx.decls.consts.iter().find(|c| c.class == class.id) {
        output.push_str(&rust_doc(c.doc.as_deref(), ""));
        output.push_str(&format!("pub const {}: {} = {};\n", c.name, c.ty.rust_name(), c.value));
        return Ok(output);
    }
    let decl = match ctx.decls.type_decl(class.id) {
        Some(decl) => decl,
        None => return Ok(output),
    };

    output.push_str(&type_definition(names, class, decl));

    let functions = ctx.decls.functions_of(class.id);
    let methods: Vec<&FnDecl> = functions.iter().filter(|f| !f.kind.is_synthesized()).collect();
    if !methods.is_empty() || class.is_opaque() {
        output.push('\n');
        output.push_str(&format!("impl {} {{\n", class.name));
        for (i, f) in methods.iter().enumerate() {
            if i > 0 {
                output.push('\n');
            }
            output.push_str(&method(names, class, f));
        }
        if class.is_opaque() {
            if !methods.is_empty() {
                output.push('\n');
            }
            output.push_str(&leak(names, class));
        }
        output.push_str("}\n");
    }

    output.push_str(&trait_impls(names, class));

    if let Some(patch) = class_patch {
        output.push('\n');
        output.push_str(patch.trim_end());
        output.push('\n');
    }
    Ok(output)
}

fn type_definition(names: &Names<'_>, class: &ResolvedClass, decl: &TypeDecl) -> String {
    let mut output = String::new();
    match decl {
        TypeDecl::Struct(s) if s.opaque => {
            let raw = names.raw(class.id);
            output.push_str(&format!("/// Native handle of [`{}`].\n", class.name));
            output.push_str("#[repr(C)]\n");
            output.push_str(&format!("pub struct {} {{\n", raw));
            for f in &s.fields {
                output.push_str(&format!("    pub(crate) {}: {},\n", escape_rust(&f.name), names.ty(&f.ty)));
            }
            output.push_str("}\n\n");
            output.push_str(&rust_doc(s.doc.as_deref(), ""));
            output.push_str("#[repr(transparent)]\n");
            output.push_str(&format!("pub struct {} {{\n    pub(crate) ptr: {},\n}}\n", class.name, raw));
        }
        TypeDecl::Struct(s) => {
            output.push_str(&rust_doc(s.doc.as_deref(), ""));
            output.push_str("#[repr(C)]\n");
            output.push_str(&derive_attr(&s.derived, ""));
            output.push_str(&format!("pub struct {} {{\n", class.name));
            for f in &s.fields {
                let mut ty = names.ty(&f.ty);
                let owned = f.ty.value_class().map_or(false, |id| names.class(id).needs_drop);
                if class.custom_destructor && owned {
                    ty = format!("core::mem::ManuallyDrop<{}>", ty);
                }
                output.push_str(&rust_doc(f.doc.as_deref(), "    "));
                output.push_str(&format!("    pub {}: {},\n", escape_rust(&f.name), ty));
            }
            output.push_str("}\n");
        }
        TypeDecl::Enum(e) => {
            output.push_str(&rust_doc(e.doc.as_deref(), ""));
            output.push_str("#[repr(C)]\n");
            output.push_str(&derive_attr(&e.derived, ""));
            output.push_str(&format!("pub enum {} {{\n", class.name));
            for v in &e.variants {
                output.push_str(&rust_doc(v.doc.as_deref(), "    "));
                output.push_str(&format!("    {},\n", v.name));
            }
            output.push_str("}\n");
        }
        TypeDecl::Union(u) => {
            output.push_str(&rust_doc(u.doc.as_deref(), ""));
            output.push_str("#[repr(u8)]\n");
            output.push_str(&derive_attr(&u.derived, ""));
            output.push_str(&format!("pub enum {} {{\n", class.name));
            for v in &u.variants {
                output.push_str(&rust_doc(v.doc.as_deref(), "    "));
                match &v.payload {
                    Some(ty) => output.push_str(&format!("    {}({}),\n", v.name, names.ty(ty))),
                    None => output.push_str(&format!("    {},\n", v.name)),
                }
            }
            output.push_str("}\n");
        }
        TypeDecl::Callback(cb) => {
            output.push_str(&rust_doc(cb.doc.as_deref(), ""));
            let args: Vec<String> = cb.args.iter().map(|a| names.ty(a)).collect();
            let ret = cb
                .ret
                .as_ref()
                .map(|r| format!(" -> {}", names.ty(r)))
                .unwrap_or_default();
            output.push_str(&format!("pub type {} = extern \"C\" fn({}){};\n", class.name, args.join(", "), ret));
        }
    }
    output
}

/// Receiver expression passed to the native function.
fn receiver_arg(class: &ResolvedClass, receiver: Receiver) -> &'static str {
    if !class.is_opaque() {
        return "self";
    }
    match receiver {
        Receiver::Value | Receiver::MutValue => "self.leak()",
        Receiver::Ref => "&self.ptr",
        Receiver::RefMut => "&mut self.ptr",
    }
}

/// Public return type; borrowed returns without a borrowed receiver are `'static`.
fn return_type(names: &Names<'_>, f: &FnDecl, ret: &TyExpr) -> String {
    let borrowed_self = matches!(f.receiver, Some(Receiver::Ref | Receiver::RefMut));
    match ret {
        TyExpr::Indirect { ownership, inner } if !borrowed_self => match ownership {
            Ownership::Ref => format!("&'static {}", names.ty(inner)),
            Ownership::RefMut => format!("&'static mut {}", names.ty(inner)),
            _ => names.ty(ret),
        },
        _ => names.ty(ret),
    }
}

/// Wrap a raw call so it yields the public return type.
fn convert_return(names: &Names<'_>, ret: &TyExpr, call: String) -> String {
    match ret {
        TyExpr::Class(id) if names.is_opaque(*id) => {
            format!("{} {{ ptr: unsafe {{ {} }} }}", names.safe(*id), call)
        }
        TyExpr::Indirect { ownership, inner } => {
            let opaque = matches!(inner.as_ref(), TyExpr::Class(id) if names.is_opaque(*id));
            let target = names.ty(inner);
            match (ownership, opaque) {
                (Ownership::Ref, false) => format!("unsafe {{ &*{} }}", call),
                (Ownership::RefMut, false) => format!("unsafe {{ &mut *{} }}", call),
                (Ownership::Ref, true) => format!("unsafe {{ &*{}.cast::<{}>() }}", call, target),
                (Ownership::RefMut, true) => format!("unsafe {{ &mut *{}.cast::<{}>() }}", call, target),
                (_, true) => format!("unsafe {{ {}.cast() }}", call),
                (_, false) => format!("unsafe {{ {} }}", call),
            }
        }
        _ => format!("unsafe {{ {} }}", call),
    }
}

fn method(names: &Names<'_>, class: &ResolvedClass, f: &FnDecl) -> String {
    let ctx = names.ctx;
    let mut params = Vec::new();
    let mut args = Vec::new();
    if let Some(receiver) = f.receiver.filter(|_| f.kind != FnKind::Constructor) {
        params.push(
            match receiver {
                Receiver::Value => "self",
                Receiver::MutValue => "mut self",
                Receiver::Ref => "&self",
                Receiver::RefMut => "&mut self",
            }
            .to_string(),
        );
        args.push(receiver_arg(class, receiver).to_string());
    }
    for p in &f.params {
        let name = escape_rust(&p.name);
        params.push(format!("{}: {}", name, names.ty(&p.ty)));
        args.push(names.arg(&name, &p.ty));
    }

    let ret = match &f.ret {
        Some(_) if f.returns_self() => " -> Self".to_string(),
        Some(ty) => format!(" -> {}", return_type(names, f, ty)),
        None => String::new(),
    };

    let call = format!("{}({})", f.symbol, args.join(", "));
    let body = match ctx.patches.function(&class.module, &class.name, &f.name, Target::Rust) {
        Some(patch) => patch.to_string(),
        None => match &f.ret {
            Some(ty) => convert_return(names, ty, call),
            None => format!("unsafe {{ {} }}", call),
        },
    };

    let mut output = rust_doc(f.doc.as_deref(), "    ");
    output.push_str(&format!("    pub fn {}({}){} {{\n", escape_rust(&f.name), params.join(", "), ret));
    output.push_str(&body_lines(&body, "        "));
    output.push_str("    }\n");
    output
}

fn leak(names: &Names<'_>, class: &ResolvedClass) -> String {
    let symbol = names.ctx.config.symbol(&class.name, "shallow_copy");
    let mut output = String::new();
    output.push_str("    /// Hands the handle to the native side; `self` is forgotten, not dropped.\n");
    output.push_str(&format!("    pub(crate) fn leak(self) -> {} {{\n", names.raw(class.id)));
    output.push_str(&format!("        let handle = unsafe {{ {}(&self.ptr) }};\n", symbol));
    output.push_str("        core::mem::forget(self);\n");
    output.push_str("        handle\n");
    output.push_str("    }\n");
    output
}

fn trait_impls(names: &Names<'_>, class: &ResolvedClass) -> String {
    let ctx = names.ctx;
    let name = &class.name;
    let (this, other) = if class.is_opaque() {
        ("&self.ptr", "&other.ptr")
    } else {
        ("self", "other")
    };
    let symbol = |kind: FnKind| ctx.decls.function(class.id, kind).map(|f| f.symbol.clone());
    let mut output = String::new();

    if class.is_opaque() || class.custom_destructor {
        if let Some(delete) = symbol(FnKind::Delete) {
            let arg = if class.is_opaque() { "&mut self.ptr" } else { "self" };
            output.push_str(&format!(
                "\nimpl Drop for {} {{\n    fn drop(&mut self) {{\n        unsafe {{ {}({}) }}\n    }}\n}}\n",
                name, delete, arg
            ));
        }
    }

    let manual = class.manual();
    for cap in manual.iter() {
        let text = match cap {
            Capability::Clone => symbol(FnKind::DeepCopy).map(|s| {
                let body = if class.is_opaque() {
                    format!("{} {{ ptr: unsafe {{ {}({}) }} }}", name, s, this)
                } else {
                    format!("unsafe {{ {}({}) }}", s, this)
                };
                format!(
                    "impl Clone for {} {{\n    fn clone(&self) -> Self {{\n        {}\n    }}\n}}\n",
                    name, body
                )
            }),
            Capability::Copy => Some(format!("impl Copy for {} {{}}\n", name)),
            Capability::PartialEq => symbol(FnKind::PartialEq).map(|s| {
                format!(
                    "impl PartialEq for {} {{\n    fn eq(&self, other: &Self) -> bool {{\n        unsafe {{ {}({}, {}) }}\n    }}\n}}\n",
                    name, s, this, other
                )
            }),
            Capability::Eq => Some(format!("impl Eq for {} {{}}\n", name)),
            Capability::PartialOrd => symbol(FnKind::PartialCmp).map(|s| {
                format!(
                    "impl PartialOrd for {} {{\n    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {{\n        match unsafe {{ {}({}, {}) }} {{\n            0 => Some(core::cmp::Ordering::Less),\n            1 => Some(core::cmp::Ordering::Equal),\n            2 => Some(core::cmp::Ordering::Greater),\n            _ => None,\n        }}\n    }}\n}}\n",
                    name, s, this, other
                )
            }),
            Capability::Ord => symbol(FnKind::Cmp).map(|s| {
                format!(
                    "impl Ord for {} {{\n    fn cmp(&self, other: &Self) -> core::cmp::Ordering {{\n        match unsafe {{ {}({}, {}) }} {{\n            0 => core::cmp::Ordering::Less,\n            1 => core::cmp::Ordering::Equal,\n            _ => core::cmp::Ordering::Greater,\n        }}\n    }}\n}}\n",
                    name, s, this, other
                )
            }),
            Capability::Hash => symbol(FnKind::Hash).map(|s| {
                format!(
                    "impl core::hash::Hash for {} {{\n    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {{\n        state.write_u64(unsafe {{ {}({}) }})\n    }}\n}}\n",
                    name, s, this
                )
            }),
            Capability::Debug => Some(match symbol(FnKind::DebugString) {
                Some(s) => format!(
                    "impl core::fmt::Debug for {} {{\n    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {{\n        let text = unsafe {{ {}({}) }};\n        f.write_str(text.as_str())\n    }}\n}}\n",
                    name, s, this
                ),
                None => format!(
                    "impl core::fmt::Debug for {} {{\n    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {{\n        f.debug_struct(\"{}\").finish_non_exhaustive()\n    }}\n}}\n",
                    name, name
                ),
            }),
        };
        if let Some(text) = text {
            output.push('\n');
            output.push_str(&text);
        }
    }
    output
}

fn extern_decl(names: &Names<'_>, f: &FnDecl) -> String {
    let mut params = Vec::new();
    if let Some(receiver) = f.receiver {
        let this = if names.is_opaque(f.class) {
            names.raw(f.class)
        } else {
            names.safe(f.class)
        };
        let ty = match receiver {
            Receiver::Value | Receiver::MutValue => this,
            Receiver::Ref => format!("&{}", this),
            Receiver::RefMut => format!("&mut {}", this),
        };
        params.push(format!("{}: {}", f.receiver_name, ty));
    }
    for p in &f.params {
        params.push(format!("{}: {}", escape_rust(&p.name), names.ext(&p.ty)));
    }
    let ret = f
        .ret
        .as_ref()
        .map(|r| format!(" -> {}", names.ext(&ffi_return(r))))
        .unwrap_or_default();
    format!("    pub(crate) fn {}({}){};\n", f.symbol, params.join(", "), ret)
}
