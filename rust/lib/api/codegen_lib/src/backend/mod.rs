//! Target printers and the syntax helpers they share.

pub mod c_header;
pub mod cpp_header;
pub mod native;
pub mod python;
pub mod wrapper;

use apigen_ir::{Capability, CapabilitySet, ClassId, Ownership};

use crate::model::TyExpr;
use crate::Context;

pub use c_header::CHeaderGenerator;
pub use cpp_header::CppHeaderGenerator;
pub use native::NativeExportGenerator;
pub use python::PythonModuleGenerator;
pub use wrapper::RustWrapperGenerator;

/// Rust spelling of `ty`, naming classes through `name`.
pub(crate) fn rust_type(ty: &TyExpr, name: &dyn Fn(ClassId) -> String) -> String {
    match ty {
        TyExpr::Prim(p) => p.rust_name().to_string(),
        TyExpr::Class(id) => name(*id),
        TyExpr::Array { elem, len } => format!("[{}; {}]", rust_type(elem, name), len),
        TyExpr::Indirect { ownership, inner } => {
            let inner = rust_type(inner, name);
            match ownership {
                Ownership::Ref => format!("&{}", inner),
                Ownership::RefMut => format!("&mut {}", inner),
                Ownership::ConstPtr => format!("*const {}", inner),
                Ownership::MutPtr => format!("*mut {}", inner),
                Ownership::Value => inner,
            }
        }
    }
}

/// Borrowed returns cross the boundary as raw pointers.
pub(crate) fn ffi_return(ty: &TyExpr) -> TyExpr {
    match ty {
        TyExpr::Indirect { ownership, inner } => {
            let ownership = match ownership {
                Ownership::Ref => Ownership::ConstPtr,
                Ownership::RefMut => Ownership::MutPtr,
                other => *other,
            };
            TyExpr::indirect(ownership, inner.as_ref().clone())
        }
        other => other.clone(),
    }
}

/// `///` comment lines for `doc`, each prefixed with `pad`.
pub(crate) fn rust_doc(doc: Option<&str>, pad: &str) -> String {
    let mut out = String::new();
    if let Some(doc) = doc {
        for line in doc.lines() {
            if line.trim().is_empty() {
                out.push_str(&format!("{}///\n", pad));
            } else {
                out.push_str(&format!("{}/// {}\n", pad, line.trim_end()));
            }
        }
    }
    out
}

/// `/** ... */` block for C and C++ headers.
pub(crate) fn c_doc(doc: Option<&str>, pad: &str) -> String {
    match doc {
        Some(doc) if doc.lines().count() > 1 => {
            let mut out = format!("{}/**\n", pad);
            for line in doc.lines() {
                out.push_str(&format!("{} * {}\n", pad, line.trim_end()).replace(" * \n", " *\n"));
            }
            out.push_str(&format!("{} */\n", pad));
            out
        }
        Some(doc) => format!("{}/** {} */\n", pad, doc.trim()),
        None => String::new(),
    }
}

pub(crate) fn derive_attr(caps: &CapabilitySet, pad: &str) -> String {
    if caps.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = caps.iter().map(Capability::as_str).collect();
    format!("{}#[derive({})]\n", pad, names.join(", "))
}

/// License lines and the generated-file banner.
pub(crate) fn banner(ctx: &Context<'_>, marker: &str) -> String {
    let mut out = ctx.config.license_comment(marker);
    if !out.is_empty() {
        out.push_str(&format!("{}\n", marker));
    }
    out.push_str(&format!(
        "{} Auto-generated by apigen from API version {}. Do not edit.\n",
        marker, ctx.model.version
    ));
    out
}

/// Indent a body by `pad`, keeping blank lines empty.
pub(crate) fn body_lines(body: &str, pad: &str) -> String {
    let mut out = String::new();
    for line in body.trim_matches('\n').lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(&format!("{}{}\n", pad, line));
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod test_support {
    use apigen_ir::{ApiSchema, PatchTable};

    use crate::config::GeneratorConfig;
    use crate::decl::DeclTable;
    use crate::model::Model;
    use crate::{func_gen, struct_gen};

    /// Owns everything a [`crate::Context`] borrows.
    pub struct Fixture {
        pub model: Model,
        pub decls: DeclTable,
        pub config: GeneratorConfig,
        pub patches: PatchTable,
    }

    impl Fixture {
        pub fn new(json: &str, config: GeneratorConfig, patches: PatchTable) -> Self {
            let schema = ApiSchema::from_json(json).unwrap();
            let model = Model::build(&schema, &config).unwrap();
            let mut decls = DeclTable::default();
            struct_gen::emit_types(&model, &mut decls);
            func_gen::emit_functions(&model, &config, &patches, &mut decls).unwrap();
            Fixture {
                model,
                decls,
                config,
                patches,
            }
        }

        pub fn simple(json: &str) -> Self {
            Fixture::new(json, GeneratorConfig::default(), PatchTable::new())
        }

        pub fn ctx(&self) -> crate::Context<'_> {
            crate::Context {
                model: &self.model,
                decls: &self.decls,
                config: &self.config,
                patches: &self.patches,
            }
        }
    }

    /// Classes used across the printer tests.
    pub const SCHEMA: &str = r#"{ "1.0.0": {
        "geom": { "doc": "Geometry", "classes": {
            "Point": { "doc": "A point", "external": "backing::Point", "derive": ["Debug", "Clone", "Copy", "PartialEq"],
                       "struct_fields": [ { "x": { "type": "f32" } }, { "y": { "type": "f32" } } ] },
            "Color": { "external": "backing::Color", "derive": ["Clone", "Copy", "PartialEq", "Eq"],
                       "enum_fields": [ { "Red": {} }, { "Green": {} } ] },
            "OptionU32": { "external": "backing::OptionU32", "derive": ["Clone", "Copy"],
                           "enum_fields": [ { "None": {} }, { "Some": { "type": "u32" } } ] },
            "MaxPoints": { "const": { "type": "usize", "value": "64" } }
        } },
        "app": { "classes": {
            "App": { "external": "backing::App", "is_boxed_object": true, "custom_destructor": true,
                     "constructors": { "new": { "fn_args": [ { "origin": "Point" } ] } },
                     "functions": {
                         "run": { "doc": "Run the event loop", "fn_args": [ { "self": "value" }, { "window": "Window" } ] },
                         "origin": { "fn_args": [ { "self": "ref" } ], "returns": { "type": "Point" } }
                     } },
            "Window": { "external": "backing::Window", "is_boxed_object": true, "derive": ["Clone"],
                        "constructors": { "new": { "fn_args": [] } } },
            "Callback": { "callback_typedef": { "fn_args": [ { "type": "App", "ref": "refmut" } ], "returns": { "type": "u32" } } }
        } }
    } }"#;
}
