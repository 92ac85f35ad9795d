//! C++ header.
//!
//! `raw` mirrors the C layout and holds the `extern "C"` prototypes. Above
//! it, every class that needs drop gets a move-only (or deep-copying) owner
//! class; the rest are aliased from `raw`.

use std::collections::BTreeSet;

use apigen_ir::{ClassId, Ownership, Receiver, Target};
use tracing::debug;

use super::c_header::pointer_deps;
use super::{banner, c_doc, ffi_return};
use crate::decl::{FnDecl, FnKind, TypeDecl};
use crate::error::{BindgenError, Result};
use crate::model::{ResolvedClass, TyExpr};
use crate::naming::{escape_cpp, to_lower_camel_case};
use crate::{ArtifactId, Codegen, Context, GeneratedCode, GeneratedFile};

pub struct CppHeaderGenerator;

impl Codegen for CppHeaderGenerator {
    fn generate(&self, ctx: &Context<'_>) -> Result<GeneratedCode> {
        let content = generate_header(ctx)?;
        Ok(GeneratedCode {
            files: vec![GeneratedFile {
                id: ArtifactId::HeaderCpp,
                path: format!("cpp/{}.hpp", ctx.config.library_name),
                content,
            }],
        })
    }

    fn target(&self) -> Target {
        Target::Cpp
    }
}

/// Classes wrapped in an owner class.
fn is_owner(class: &ResolvedClass) -> bool {
    class.is_data() && class.needs_drop && !class.is_virtual(Target::Cpp)
}

struct CppNames<'c> {
    ctx: &'c Context<'c>,
}

impl CppNames<'_> {
    fn name(&self, id: ClassId) -> String {
        escape_cpp(&self.ctx.model.class(id).name)
    }

    fn owner(&self, id: ClassId) -> bool {
        is_owner(self.ctx.model.class(id))
    }

    /// Spelling inside `raw`.
    fn raw(&self, ty: &TyExpr) -> String {
        match ty {
            TyExpr::Prim(p) => p.c_name().to_string(),
            TyExpr::Class(id) => self.name(*id),
            TyExpr::Array { elem, .. } => format!("{}*", self.raw(elem)),
            TyExpr::Indirect { ownership, inner } => {
                let inner = match inner.as_ref() {
                    TyExpr::Array { elem, .. } => self.raw(elem),
                    other => self.raw(other),
                };
                match ownership {
                    Ownership::Ref | Ownership::ConstPtr => format!("const {}*", inner),
                    _ => format!("{}*", inner),
                }
            }
        }
    }

    fn raw_declare(&self, ty: &TyExpr, name: &str) -> String {
        match ty {
            TyExpr::Array { elem, len } => format!("{}[{}]", self.raw_declare(elem, name), len),
            other => format!("{} {}", self.raw(other), name),
        }
    }

    /// Spelling in the outer namespace; pointers to owned classes stay raw.
    fn public(&self, ty: &TyExpr) -> String {
        match ty {
            TyExpr::Indirect { ownership, inner } => {
                let target = match inner.as_ref() {
                    TyExpr::Class(id) if self.owner(*id) && ownership.is_pointer() => format!("raw::{}", self.name(*id)),
                    TyExpr::Class(id) => self.name(*id),
                    TyExpr::Array { elem, .. } => self.public(elem),
                    other => self.public(other),
                };
                match ownership {
                    Ownership::Ref => format!("const {}&", target),
                    Ownership::RefMut => format!("{}&", target),
                    Ownership::ConstPtr => format!("const {}*", target),
                    _ => format!("{}*", target),
                }
            }
            TyExpr::Array { elem, .. } => format!("{}*", self.public(elem)),
            TyExpr::Prim(p) => p.c_name().to_string(),
            TyExpr::Class(id) => self.name(*id),
        }
    }

    fn public_return(&self, ty: &TyExpr) -> String {
        match ty {
            TyExpr::Indirect { .. } => {
                let ptr = ffi_return(ty);
                match ptr.pointee() {
                    TyExpr::Class(id) if self.owner(*id) => {
                        let qual = if ptr.ownership() == Ownership::ConstPtr { "const " } else { "" };
                        format!("{}raw::{}*", qual, self.name(*id))
                    }
                    _ => self.public(&ptr),
                }
            }
            other => self.public(other),
        }
    }

    /// Expression handing a public argument to the raw call.
    fn arg(&self, ty: &TyExpr, name: &str) -> String {
        match ty {
            TyExpr::Class(id) if self.owner(*id) => format!("std::move({}).release()", name),
            TyExpr::Indirect { ownership, inner } if !ownership.is_pointer() => match inner.as_ref() {
                TyExpr::Class(id) if self.owner(*id) => format!("&{}.get()", name),
                _ => format!("&{}", name),
            },
            _ => name.to_string(),
        }
    }

    fn wrap_return(&self, ty: Option<&TyExpr>, call: String) -> String {
        match ty {
            Some(TyExpr::Class(id)) if self.owner(*id) => format!("{}({})", self.name(*id), call),
            _ => call,
        }
    }
}

fn namespace(ctx: &Context<'_>) -> String {
    escape_cpp(&ctx.config.library_name.replace('-', "_"))
}

fn generate_header(ctx: &Context<'_>) -> Result<String> {
    let names = CppNames { ctx };
    let model = ctx.model;
    let ns = namespace(ctx);
    let guard = format!("{}_HPP", ctx.config.library_name.to_uppercase().replace('-', "_"));

    let mut output = banner(ctx, "//");
    output.push('\n');
    output.push_str(&format!("#ifndef {0}\n#define {0}\n\n", guard));
    output.push_str("#include <cstddef>\n#include <cstdint>\n#include <utility>\n");
    if let Some(header) = ctx.patches.header(Target::Cpp) {
        output.push('\n');
        output.push_str(header.trim_end());
        output.push('\n');
    }
    output.push_str(&format!("\nnamespace {} {{\nnamespace raw {{\n", ns));

    let mut declared: BTreeSet<ClassId> = BTreeSet::new();
    let mut forwarded: BTreeSet<ClassId> = BTreeSet::new();
    for id in model.declaration_order(Target::Cpp) {
        let class = model.class(id);
        output.push('\n');
        for dep in pointer_deps(ctx, id) {
            if model.is_forward_declared(dep) && !declared.contains(&dep) && forwarded.insert(dep) {
                let keyword = if model.class(dep).is_tagged_union() { "union" } else { "struct" };
                output.push_str(&format!("{} {};\n", keyword, names.name(dep)));
            }
        }
        declared.insert(id);

        let class_patch = ctx.patches.class(&class.module, &class.name, Target::Cpp);
        if class.is_virtual(Target::Cpp) {
            let patch = class_patch.ok_or_else(|| BindgenError::MissingPatch {
                class: format!("{}.{}", class.module, class.name),
                target: Target::Cpp,
            })?;
            output.push_str(patch.trim_end());
            output.push('\n');
            continue;
        }
        if let Some(decl) = ctx.decls.type_decl(id) {
            output.push_str(&c_doc(decl.doc(), ""));
            output.push_str(&raw_type(&names, decl));
        }
        if let (Some(patch), false) = (class_patch, is_owner(class)) {
            output.push_str(patch.trim_end());
            output.push('\n');
        }
    }

    if !ctx.decls.consts.is_empty() {
        output.push('\n');
        for c in &ctx.decls.consts {
            output.push_str(&format!("constexpr {} {} = {};\n", c.ty.c_name(), escape_cpp(&c.name), c.value));
        }
    }

    let functions: Vec<&FnDecl> = ctx
        .decls
        .all_functions()
        .filter(|f| !model.class(f.class).is_virtual(Target::Cpp))
        .collect();
    if !functions.is_empty() {
        output.push_str("\nextern \"C\" {\n");
        for f in &functions {
            output.push_str(&raw_prototype(&names, f));
        }
        output.push_str("}\n");
    }
    output.push_str("\n} // namespace raw\n");

    let owners: Vec<&ResolvedClass> = model.classes().iter().filter(|c| is_owner(c)).collect();
    let aliases: Vec<&ResolvedClass> = model
        .classes()
        .iter()
        .filter(|c| !c.is_const() && !is_owner(c) && !c.is_virtual(Target::Cpp))
        .collect();
    if !aliases.is_empty() {
        output.push('\n');
        for class in aliases {
            output.push_str(&format!("using {0} = raw::{0};\n", names.name(class.id)));
        }
    }
    if !owners.is_empty() {
        output.push('\n');
        for class in &owners {
            output.push_str(&format!("class {};\n", names.name(class.id)));
        }
        for class in &owners {
            output.push('\n');
            output.push_str(&owner_class(&names, class));
            if let Some(patch) = ctx.patches.class(&class.module, &class.name, Target::Cpp) {
                output.push_str(patch.trim_end());
                output.push('\n');
            }
        }
        for class in &owners {
            let defs = owner_definitions(&names, class);
            if !defs.is_empty() {
                output.push('\n');
                output.push_str(&defs);
            }
        }
    }

    for module in model.modules() {
        if let Some(patch) = ctx.patches.module(&module.name, Target::Cpp) {
            output.push('\n');
            output.push_str(patch.trim_end());
            output.push('\n');
        }
    }

    output.push_str(&format!("\n}} // namespace {}\n\n#endif // {}\n", ns, guard));
    debug!("CppHeader: {} bytes", output.len());
    Ok(output)
}

fn raw_type(names: &CppNames<'_>, decl: &TypeDecl) -> String {
    let mut output = String::new();
    match decl {
        TypeDecl::Struct(s) => {
            output.push_str(&format!("struct {} {{\n", names.name(s.class)));
            for f in &s.fields {
                output.push_str(&c_doc(f.doc.as_deref(), "    "));
                output.push_str(&format!("    {};\n", names.raw_declare(&f.ty, &escape_cpp(&f.name))));
            }
            output.push_str("};\n");
        }
        TypeDecl::Enum(e) => {
            let variants: Vec<String> = e.variants.iter().map(|v| escape_cpp(&v.name)).collect();
            output.push_str(&format!("enum class {} {{ {} }};\n", names.name(e.class), variants.join(", ")));
        }
        TypeDecl::Union(u) => {
            let name = names.name(u.class);
            let tags: Vec<String> = u.variants.iter().map(|v| escape_cpp(&v.name)).collect();
            output.push_str(&format!("enum class {}Tag : uint8_t {{ {} }};\n", name, tags.join(", ")));
            for v in &u.variants {
                output.push_str(&format!("struct {}Variant_{} {{ {}Tag tag;", name, v.name, name));
                if let Some(ty) = &v.payload {
                    output.push_str(&format!(" {};", names.raw_declare(ty, "payload")));
                }
                output.push_str(" };\n");
            }
            output.push_str(&format!("union {} {{\n", name));
            for v in &u.variants {
                output.push_str(&format!("    {}Variant_{} {};\n", name, v.name, escape_cpp(&v.name)));
            }
            output.push_str("};\n");
        }
        TypeDecl::Callback(cb) => {
            let args: Vec<String> = cb.args.iter().map(|a| names.raw(a)).collect();
            let ret = cb.ret.as_ref().map(|r| names.raw(r)).unwrap_or_else(|| "void".into());
            output.push_str(&format!("using {} = {}(*)({});\n", names.name(cb.class), ret, args.join(", ")));
        }
    }
    output
}

fn raw_prototype(names: &CppNames<'_>, f: &FnDecl) -> String {
    let mut params = Vec::new();
    if let Some(receiver) = f.receiver {
        let this = names.name(f.class);
        params.push(match receiver {
            Receiver::Value | Receiver::MutValue => format!("{} {}", this, f.receiver_name),
            Receiver::Ref => format!("const {}* {}", this, f.receiver_name),
            Receiver::RefMut => format!("{}* {}", this, f.receiver_name),
        });
    }
    for p in &f.params {
        params.push(names.raw_declare(&p.ty, &escape_cpp(&p.name)));
    }
    let ret = f
        .ret
        .as_ref()
        .map(|r| names.raw(&ffi_return(r)))
        .unwrap_or_else(|| "void".into());
    format!("    {} {}({});\n", ret, f.symbol, params.join(", "))
}

/// Functions exposed as members; lifecycle ones become special members.
fn members<'d>(names: &CppNames<'d>, class: &ResolvedClass) -> Vec<&'d FnDecl> {
    names
        .ctx
        .decls
        .functions_of(class.id)
        .iter()
        .filter(|f| !matches!(f.kind, FnKind::Delete | FnKind::ShallowCopy | FnKind::DeepCopy))
        .collect()
}

fn member_name(f: &FnDecl) -> String {
    escape_cpp(&to_lower_camel_case(&f.name))
}

fn member_params(names: &CppNames<'_>, f: &FnDecl) -> String {
    f.params
        .iter()
        .map(|p| format!("{} {}", names.public(&p.ty), escape_cpp(&p.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn qualifier(receiver: Option<Receiver>) -> &'static str {
    match receiver {
        Some(Receiver::Ref) => " const",
        Some(Receiver::Value) | Some(Receiver::MutValue) => " &&",
        _ => "",
    }
}

fn owner_class(names: &CppNames<'_>, class: &ResolvedClass) -> String {
    let decls = names.ctx.decls;
    let name = names.name(class.id);
    let raw = format!("raw::{}", name);
    let delete = decls.function(class.id, FnKind::Delete).map(|f| f.symbol.clone());
    let release = match &delete {
        Some(symbol) => format!("if (owned_) {{ raw::{}(&inner_); }}", symbol),
        None => String::new(),
    };

    let mut output = c_doc(class.doc.as_deref(), "");
    output.push_str(&format!("class {} {{\npublic:\n", name));
    output.push_str(&format!("    explicit {}({} inner) noexcept : inner_(inner) {{}}\n", name, raw));
    output.push_str(&format!("    ~{}() {{ {} }}\n\n", name, release));

    match decls.function(class.id, FnKind::DeepCopy) {
        Some(copy) => {
            output.push_str(&format!(
                "    {0}(const {0}& other) : inner_(raw::{1}(&other.inner_)) {{}}\n",
                name, copy.symbol
            ));
            output.push_str(&format!(
                "    {0}& operator=(const {0}& other) {{ if (this != &other) {{ *this = {0}(other); }} return *this; }}\n",
                name
            ));
        }
        None => {
            output.push_str(&format!("    {0}(const {0}&) = delete;\n", name));
            output.push_str(&format!("    {0}& operator=(const {0}&) = delete;\n", name));
        }
    }
    output.push_str(&format!(
        "    {0}({0}&& other) noexcept : inner_(other.inner_), owned_(other.owned_) {{ other.owned_ = false; }}\n",
        name
    ));
    output.push_str(&format!(
        "    {0}& operator=({0}&& other) noexcept {{\n        if (this != &other) {{\n            {1}\n            inner_ = other.inner_;\n            owned_ = other.owned_;\n            other.owned_ = false;\n        }}\n        return *this;\n    }}\n\n",
        name, release
    ));

    output.push_str(&format!("    const {0}& get() const noexcept {{ return inner_; }}\n", raw));
    output.push_str(&format!("    {0}& get() noexcept {{ return inner_; }}\n", raw));
    output.push_str(&format!("    {0} release() && noexcept {{ owned_ = false; return inner_; }}\n", raw));

    let members = members(names, class);
    if !members.is_empty() {
        output.push('\n');
    }
    for f in &members {
        output.push_str(&c_doc(f.doc.as_deref(), "    "));
        let ret = f.ret.as_ref().map(|r| names.public_return(r)).unwrap_or_else(|| "void".into());
        let stat = if f.receiver.is_none() { "static " } else { "" };
        output.push_str(&format!(
            "    {}{} {}({}){};\n",
            stat,
            ret,
            member_name(f),
            member_params(names, f),
            qualifier(f.receiver)
        ));
    }

    if let Some(eq) = decls.function(class.id, FnKind::PartialEq) {
        output.push_str(&format!(
            "\n    bool operator==(const {0}& other) const {{ return raw::{1}(&inner_, &other.inner_); }}\n",
            name, eq.symbol
        ));
        output.push_str(&format!(
            "    bool operator!=(const {0}& other) const {{ return !(*this == other); }}\n",
            name
        ));
    }

    output.push_str(&format!("\nprivate:\n    {} inner_;\n    bool owned_ = true;\n}};\n", raw));
    output
}

fn owner_definitions(names: &CppNames<'_>, class: &ResolvedClass) -> String {
    let name = names.name(class.id);
    let mut output = String::new();
    for f in members(names, class) {
        let mut args = Vec::new();
        let mut consume = false;
        match f.receiver {
            Some(receiver) if receiver.is_move() => {
                consume = true;
                args.push("inner_".to_string());
            }
            Some(_) => args.push("&inner_".to_string()),
            None => {}
        }
        args.extend(f.params.iter().map(|p| names.arg(&p.ty, &escape_cpp(&p.name))));

        let call = format!("raw::{}({})", f.symbol, args.join(", "));
        let ret = f.ret.as_ref().map(|r| names.public_return(r)).unwrap_or_else(|| "void".into());
        output.push_str(&format!(
            "inline {} {}::{}({}){} {{\n",
            ret,
            name,
            member_name(f),
            member_params(names, f),
            qualifier(f.receiver)
        ));
        if consume {
            output.push_str("    owned_ = false;\n");
        }
        output.push_str(&format!("    return {};\n}}\n", names.wrap_return(f.ret.as_ref(), call)));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{Fixture, SCHEMA};

    fn header(fx: &Fixture) -> String {
        generate_header(&fx.ctx()).unwrap()
    }

    #[test]
    fn raw_namespace_mirrors_c_layout() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("namespace azul {\nnamespace raw {\n"));
        assert!(out.contains("/** A point */\nstruct Point {\n    float x;\n    float y;\n};\n"));
        assert!(out.contains("enum class Color { Red, Green };\n"));
        assert!(out.contains("enum class OptionU32Tag : uint8_t { None, Some };\n"));
        assert!(out.contains("struct OptionU32Variant_Some { OptionU32Tag tag; uint32_t payload; };\n"));
        assert!(out.contains("union OptionU32 {\n    OptionU32Variant_None None;\n    OptionU32Variant_Some Some;\n};\n"));
        assert!(out.contains("using Callback = uint32_t(*)(App*);\n"));
        assert!(out.contains("constexpr size_t MaxPoints = 64;\n"));
        assert!(out.contains("    App AzApp_new(Point origin);\n"));
        assert!(out.contains("    Point AzApp_origin(const App* app);\n"));
        assert!(out.contains("    void AzApp_delete(App* object);\n"));
    }

    #[test]
    fn aliases_for_classes_without_drop() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("using Point = raw::Point;\n"));
        assert!(out.contains("using Callback = raw::Callback;\n"));
        assert!(!out.contains("using App = raw::App;"));
        assert!(!out.contains("using MaxPoints"));
    }

    #[test]
    fn move_only_owner() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("class App {\npublic:\n    explicit App(raw::App inner) noexcept : inner_(inner) {}\n"));
        assert!(out.contains("    ~App() { if (owned_) { raw::AzApp_delete(&inner_); } }\n"));
        assert!(out.contains("    App(const App&) = delete;\n"));
        assert!(out.contains("    raw::App release() && noexcept { owned_ = false; return inner_; }\n"));
        assert!(out.contains("    static App new_(Point origin);\n"));
        assert!(out.contains("    /** Run the event loop */\n    void run(Window window) &&;\n"));
        assert!(out.contains("    Point origin() const;\n"));
    }

    #[test]
    fn copyable_owner_uses_deep_copy() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("    Window(const Window& other) : inner_(raw::AzWindow_deepCopy(&other.inner_)) {}\n"));
    }

    #[test]
    fn out_of_line_definitions_convert_arguments() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("inline App App::new_(Point origin) {\n    return App(raw::AzApp_new(origin));\n}\n"));
        assert!(out.contains(
            "inline void App::run(Window window) && {\n    owned_ = false;\n    return raw::AzApp_run(inner_, std::move(window).release());\n}\n"
        ));
        assert!(out.contains("inline Point App::origin() const {\n    return raw::AzApp_origin(&inner_);\n}\n"));
    }

    #[test]
    fn equality_operator() {
        let fx = Fixture::simple(
            r#"{ "1": { "m": { "classes": {
                "Name": { "is_boxed_object": true, "derive": ["PartialEq"] }
            } } } }"#,
        );
        let out = header(&fx);
        assert!(out.contains("    bool operator==(const Name& other) const { return raw::AzName_partialEq(&inner_, &other.inner_); }\n"));
        assert!(out.contains("    static bool partialEq(const Name& a, const Name& b);\n"));
        assert!(out.contains("inline bool Name::partialEq(const Name& a, const Name& b) {\n    return raw::AzName_partialEq(&a.get(), &b.get());\n}\n"));
    }
}
