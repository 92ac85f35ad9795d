//! Native export layer: `extern "C"` functions over the backing implementation.

use apigen_ir::{CapabilitySet, ClassId, Receiver, Target};
use tracing::debug;

use super::{banner, body_lines, derive_attr, ffi_return, rust_doc, rust_type};
use crate::decl::{FnDecl, TypeDecl};
use crate::error::{BindgenError, Result};
use crate::layout::layout_module;
use crate::model::ResolvedClass;
use crate::naming::escape_rust;
use crate::{ArtifactId, Codegen, Context, GeneratedCode, GeneratedFile};

pub struct NativeExportGenerator;

impl Codegen for NativeExportGenerator {
    fn generate(&self, ctx: &Context<'_>) -> Result<GeneratedCode> {
        let content = generate_native(ctx)?;
        Ok(GeneratedCode {
            files: vec![GeneratedFile {
                id: ArtifactId::NativeExport,
                path: "native/lib.rs".into(),
                content,
            }],
        })
    }

    fn target(&self) -> Target {
        Target::Dll
    }
}

fn generate_native(ctx: &Context<'_>) -> Result<String> {
    let config = ctx.config;
    let model = ctx.model;
    let name = |id: ClassId| format!("{}{}", config.prefix, model.class(id).name);

    let mut output = banner(ctx, "//");
    output.push('\n');
    output.push_str("#![allow(non_snake_case, non_camel_case_types, non_upper_case_globals)]\n");
    output.push_str("#![allow(unused_variables, unused_imports, clippy::all)]\n\n");
    output.push_str("use core::ffi::c_void;\n");

    if let Some(header) = ctx.patches.header(Target::Dll) {
        output.push('\n');
        output.push_str(header.trim_end());
        output.push('\n');
    }

    for module in model.modules() {
        output.push_str(&format!("\n// Module: {}\n", module.name));
        for id in model.module_order(module, Target::Dll) {
            let class = model.class(id);
            output.push('\n');
            output.push_str(&class_section(ctx, class, &name)?);
        }
        if let Some(patch) = ctx.patches.module(&module.name, Target::Dll) {
            output.push('\n');
            output.push_str(patch.trim_end());
            output.push('\n');
        }
    }

    output.push('\n');
    output.push_str(&layout_module(model, config));

    debug!("NativeExport: {} bytes", output.len());
    Ok(output)
}

fn class_section(ctx: &Context<'_>, class: &ResolvedClass, name: &dyn Fn(ClassId) -> String) -> Result<String> {
    let class_patch = ctx.patches.class(&class.module, &class.name, Target::Dll);
    if class.is_virtual(Target::Dll) {
        let patch = class_patch.ok_or_else(|| BindgenError::MissingPatch {
            class: format!("{}.{}", class.module, class.name),
            target: Target::Dll,
        })?;
        return Ok(format!("{}\n", patch.trim_end()));
    }

    let native = name(class.id);
    let mut output = rust_doc(class.doc.as_deref(), "");

    if let Some(c) = ctx.decls.consts.iter().find(|c| c.class == class.id) {
        output.push_str(&format!("pub const {}: {} = {};\n", native, c.ty.rust_name(), c.value));
    } else if let Some(decl) = ctx.decls.type_decl(class.id) {
        match (decl, &class.external) {
            (TypeDecl::Callback(cb), _) => {
                let args: Vec<String> = cb.args.iter().map(|a| rust_type(a, name)).collect();
                let ret = cb
                    .ret
                    .as_ref()
                    .map(|r| format!(" -> {}", rust_type(r, name)))
                    .unwrap_or_default();
                output.push_str(&format!("pub type {} = extern \"C\" fn({}){};\n", native, args.join(", "), ret));
            }
            (_, Some(external)) => {
                output.push_str(&format!("pub use {} as {};\n", external, native));
            }
            (decl, None) => output.push_str(&local_definition(decl, &native_caps(class), name)),
        }
    }

    for f in ctx.decls.functions_of(class.id) {
        if let Some(body) = f.body.text() {
            output.push('\n');
            output.push_str(&function(f, body, name));
        }
    }

    if let Some(patch) = class_patch {
        output.push('\n');
        output.push_str(patch.trim_end());
        output.push('\n');
    }
    Ok(output)
}

/// Unbacked types are plain Rust here, so they can derive everything declared.
fn native_caps(class: &ResolvedClass) -> CapabilitySet {
    let mut caps = class.declared.clone();
    caps.close_over_requirements();
    caps
}

fn local_definition(decl: &TypeDecl, caps: &CapabilitySet, name: &dyn Fn(ClassId) -> String) -> String {
    let mut output = String::new();
    match decl {
        TypeDecl::Struct(s) => {
            output.push_str("#[repr(C)]\n");
            output.push_str(&derive_attr(caps, ""));
            output.push_str(&format!("pub struct {} {{\n", name(s.class)));
            for f in &s.fields {
                output.push_str(&rust_doc(f.doc.as_deref(), "    "));
                output.push_str(&format!("    pub {}: {},\n", escape_rust(&f.name), rust_type(&f.ty, name)));
            }
            output.push_str("}\n");
        }
        TypeDecl::Enum(e) => {
            output.push_str("#[repr(C)]\n");
            output.push_str(&derive_attr(caps, ""));
            output.push_str(&format!("pub enum {} {{\n", name(e.class)));
            for v in &e.variants {
                output.push_str(&rust_doc(v.doc.as_deref(), "    "));
                output.push_str(&format!("    {},\n", v.name));
            }
            output.push_str("}\n");
        }
        TypeDecl::Union(u) => {
            output.push_str("#[repr(u8)]\n");
            output.push_str(&derive_attr(caps, ""));
            output.push_str(&format!("pub enum {} {{\n", name(u.class)));
            for v in &u.variants {
                output.push_str(&rust_doc(v.doc.as_deref(), "    "));
                match &v.payload {
                    Some(ty) => output.push_str(&format!("    {}({}),\n", v.name, rust_type(ty, name))),
                    None => output.push_str(&format!("    {},\n", v.name)),
                }
            }
            output.push_str("}\n");
        }
        TypeDecl::Callback(_) => {}
    }
    output
}

fn function(f: &FnDecl, body: &str, name: &dyn Fn(ClassId) -> String) -> String {
    let mut params = Vec::new();
    if let Some(receiver) = f.receiver {
        let this = name(f.class);
        params.push(match receiver {
            Receiver::Value => format!("{}: {}", f.receiver_name, this),
            Receiver::MutValue => format!("mut {}: {}", f.receiver_name, this),
            Receiver::Ref => format!("{}: &{}", f.receiver_name, this),
            Receiver::RefMut => format!("{}: &mut {}", f.receiver_name, this),
        });
    }
    for p in &f.params {
        params.push(format!("{}: {}", escape_rust(&p.name), rust_type(&p.ty, name)));
    }
    let ret = f
        .ret
        .as_ref()
        .map(|r| format!(" -> {}", rust_type(&ffi_return(r), name)))
        .unwrap_or_default();

    let mut output = rust_doc(f.doc.as_deref(), "");
    output.push_str("#[no_mangle]\n");
    output.push_str(&format!("pub extern \"C\" fn {}({}){} {{", f.symbol, params.join(", "), ret));
    if body.trim().is_empty() {
        output.push_str("}\n");
    } else {
        output.push('\n');
        output.push_str(&body_lines(body, "    "));
        output.push_str("}\n");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{Fixture, SCHEMA};
    use crate::config::GeneratorConfig;
    use apigen_ir::{PatchKey, PatchScope, PatchTable};

    fn native(fx: &Fixture) -> String {
        generate_native(&fx.ctx()).unwrap()
    }

    #[test]
    fn backed_types_are_reexported() {
        let out = native(&Fixture::simple(SCHEMA));
        assert!(out.contains("/// A point\npub use backing::Point as AzPoint;\n"));
        assert!(out.contains("pub use backing::App as AzApp;\n"));
        assert!(out.contains("pub const AzMaxPoints: usize = 64;\n"));
        assert!(out.contains("pub type AzCallback = extern \"C\" fn(&mut AzApp) -> u32;\n"));
    }

    #[test]
    fn default_bodies_forward_to_backing() {
        let out = native(&Fixture::simple(SCHEMA));
        assert!(out.contains("#[no_mangle]\npub extern \"C\" fn AzApp_new(origin: AzPoint) -> AzApp {\n    backing::App::new(origin)\n}\n"));
        assert!(out.contains(
            "/// Run the event loop\n#[no_mangle]\npub extern \"C\" fn AzApp_run(app: AzApp, window: AzWindow) {\n    app.run(window)\n}\n"
        ));
        assert!(out.contains("pub extern \"C\" fn AzApp_origin(app: &AzApp) -> AzPoint {\n    app.origin()\n}\n"));
    }

    #[test]
    fn lifecycle_functions() {
        let out = native(&Fixture::simple(SCHEMA));
        assert!(out.contains(
            "pub extern \"C\" fn AzApp_delete(object: &mut AzApp) {\n    unsafe { core::ptr::drop_in_place(object) }\n}\n"
        ));
        assert!(out.contains(
            "pub extern \"C\" fn AzApp_shallowCopy(object: &AzApp) -> AzApp {\n    unsafe { core::ptr::read(object) }\n}\n"
        ));
        assert!(!out.contains("AzApp_deepCopy"));
        assert!(out.contains("pub extern \"C\" fn AzWindow_deepCopy(object: &AzWindow) -> AzWindow {\n    object.clone()\n}\n"));
        assert!(out.contains("pub extern \"C\" fn AzPoint_delete(object: &mut AzPoint) {}\n"));
        assert!(out.contains("pub extern \"C\" fn AzPoint_partialEq(a: &AzPoint, b: &AzPoint) -> bool {"));
    }

    #[test]
    fn unbacked_types_are_defined_locally() {
        let fx = Fixture::simple(
            r#"{ "1": { "m": { "classes": {
                "Size": { "derive": ["Clone", "Copy"], "struct_fields": [ { "w": { "type": "u32", "doc": "width" } }, { "type": { "type": "u8" } } ] },
                "Maybe": { "enum_fields": [ { "No": {} }, { "Yes": { "type": "Size" } } ] }
            } } } }"#,
        );
        let out = native(&fx);
        assert!(out.contains(
            "#[repr(C)]\n#[derive(Clone, Copy)]\npub struct AzSize {\n    /// width\n    pub w: u32,\n    pub r#type: u8,\n}\n"
        ));
        assert!(out.contains("#[repr(u8)]\npub enum AzMaybe {\n    No,\n    Yes(AzSize),\n}\n"));
    }

    #[test]
    fn patches_are_placed() {
        let mut patches = PatchTable::new();
        patches
            .insert(PatchKey::new(PatchScope::Header, Target::Dll), "extern crate backing;")
            .unwrap();
        patches
            .insert(
                PatchKey::new(
                    PatchScope::Class {
                        module: "geom".into(),
                        class: "Point".into(),
                    },
                    Target::Dll,
                ),
                "impl AzPoint { pub fn zero() -> Self { Self::new(0.0, 0.0) } }",
            )
            .unwrap();
        let fx = Fixture::new(SCHEMA, GeneratorConfig::default(), patches);
        let out = native(&fx);
        assert!(out.contains("use core::ffi::c_void;\n\nextern crate backing;\n"));
        let class_at = out.find("impl AzPoint { pub fn zero()").unwrap();
        assert!(class_at > out.find("AzPoint_partialEq").unwrap());
        assert!(class_at < out.find("pub use backing::Color").unwrap());
    }

    #[test]
    fn ends_with_layout_module() {
        let out = native(&Fixture::simple(SCHEMA));
        let layout = out.find("pub mod layout {").unwrap();
        assert!(layout > out.find("AzWindow_deepCopy").unwrap());
        assert!(out.starts_with("// Auto-generated by apigen from API version 1.0.0. Do not edit.\n"));
    }
}
