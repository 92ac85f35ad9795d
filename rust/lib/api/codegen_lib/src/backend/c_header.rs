//! C header.
//!
//! Declarations come out in dependency order. Forward declarations are
//! emitted just before the first declaration that points at them, tagged
//! unions are expanded by hand, and every exported function gets a
//! prototype.

use std::collections::BTreeSet;

use apigen_ir::{ClassId, Ownership, Receiver, Target};
use tracing::debug;

use super::{banner, c_doc, ffi_return};
use crate::decl::{FnDecl, TypeDecl, UnionDecl};
use crate::error::{BindgenError, Result};
use crate::model::TyExpr;
use crate::naming::escape_cpp;
use crate::{ArtifactId, Codegen, Context, GeneratedCode, GeneratedFile};

pub struct CHeaderGenerator;

impl Codegen for CHeaderGenerator {
    fn generate(&self, ctx: &Context<'_>) -> Result<GeneratedCode> {
        let content = generate_header(ctx)?;
        Ok(GeneratedCode {
            files: vec![GeneratedFile {
                id: ArtifactId::HeaderC,
                path: format!("c/{}.h", ctx.config.library_name),
                content,
            }],
        })
    }

    fn target(&self) -> Target {
        Target::C
    }
}

struct CNames<'c> {
    ctx: &'c Context<'c>,
}

impl CNames<'_> {
    fn name(&self, id: ClassId) -> String {
        let class = self.ctx.model.class(id);
        let suffix = if class.is_opaque() {
            self.ctx.config.ptr_suffix.as_str()
        } else {
            ""
        };
        format!("{}{}{}", self.ctx.config.prefix, class.name, suffix)
    }

    /// Type spelling without a declarator; arrays behind pointers decay to their element.
    fn ty(&self, ty: &TyExpr) -> String {
        match ty {
            TyExpr::Prim(p) => p.c_name().to_string(),
            TyExpr::Class(id) => self.name(*id),
            TyExpr::Array { elem, .. } => format!("{}*", self.ty(elem)),
            TyExpr::Indirect { ownership, inner } => {
                let inner = match inner.as_ref() {
                    TyExpr::Array { elem, .. } => self.ty(elem),
                    other => self.ty(other),
                };
                match ownership {
                    Ownership::Ref | Ownership::ConstPtr => format!("const {}*", inner),
                    Ownership::RefMut => format!("{}* restrict", inner),
                    Ownership::MutPtr | Ownership::Value => format!("{}*", inner),
                }
            }
        }
    }

    /// `T name` / `T name[N]`.
    fn declare(&self, ty: &TyExpr, name: &str) -> String {
        match ty {
            TyExpr::Array { elem, len } => format!("{}[{}]", self.declare(elem, name), len),
            other => format!("{} {}", self.ty(other), name),
        }
    }
}

fn guard(ctx: &Context<'_>) -> String {
    format!("{}_H", ctx.config.library_name.to_uppercase().replace('-', "_"))
}

fn generate_header(ctx: &Context<'_>) -> Result<String> {
    let names = CNames { ctx };
    let model = ctx.model;
    let guard = guard(ctx);

    let mut output = banner(ctx, "//");
    output.push('\n');
    output.push_str(&format!("#ifndef {0}\n#define {0}\n\n", guard));
    output.push_str("#include <stdbool.h>\n#include <stddef.h>\n#include <stdint.h>\n\n");
    output.push_str("#ifdef __cplusplus\n#define restrict __restrict\nextern \"C\" {\n#endif\n\n");
    output.push_str("#ifdef _WIN32\n#define DLLIMPORT __declspec(dllimport)\n#else\n#define DLLIMPORT\n#endif\n");

    if let Some(header) = ctx.patches.header(Target::C) {
        output.push('\n');
        output.push_str(header.trim_end());
        output.push('\n');
    }

    let mut declared: BTreeSet<ClassId> = BTreeSet::new();
    let mut forwarded: BTreeSet<ClassId> = BTreeSet::new();
    for id in model.declaration_order(Target::C) {
        let class = model.class(id);
        output.push('\n');

        for dep in pointer_deps(ctx, id) {
            if model.is_forward_declared(dep) && !declared.contains(&dep) && forwarded.insert(dep) {
                let keyword = if model.class(dep).is_tagged_union() { "union" } else { "struct" };
                output.push_str(&format!("{0} {1};\ntypedef {0} {1} {1};\n", keyword, names.name(dep)));
            }
        }

        let class_patch = ctx.patches.class(&class.module, &class.name, Target::C);
        if class.is_virtual(Target::C) {
            let patch = class_patch.ok_or_else(|| BindgenError::MissingPatch {
                class: format!("{}.{}", class.module, class.name),
                target: Target::C,
            })?;
            output.push_str(patch.trim_end());
            output.push('\n');
            declared.insert(id);
            continue;
        }

        if let Some(decl) = ctx.decls.type_decl(id) {
            output.push_str(&c_doc(decl.doc(), ""));
            output.push_str(&type_decl(&names, decl, forwarded.contains(&id)));
        }
        if let Some(patch) = class_patch {
            output.push_str(patch.trim_end());
            output.push('\n');
        }
        declared.insert(id);
    }

    for module in model.modules() {
        if let Some(patch) = ctx.patches.module(&module.name, Target::C) {
            output.push('\n');
            output.push_str(patch.trim_end());
            output.push('\n');
        }
    }

    if !ctx.decls.consts.is_empty() {
        output.push('\n');
        for c in &ctx.decls.consts {
            output.push_str(&c_doc(c.doc.as_deref(), ""));
            output.push_str(&format!("#define {}{} {}\n", ctx.config.prefix, c.name, c.value));
        }
    }

    let functions: Vec<&FnDecl> = ctx
        .decls
        .all_functions()
        .filter(|f| !model.class(f.class).is_virtual(Target::C))
        .collect();
    if !functions.is_empty() {
        output.push('\n');
        for f in functions {
            output.push_str(&c_doc(f.doc.as_deref(), ""));
            output.push_str(&prototype(&names, f));
        }
    }

    for id in model.declaration_order(Target::C) {
        if model.class(id).is_virtual(Target::C) {
            continue;
        }
        if let Some(TypeDecl::Union(u)) = ctx.decls.type_decl(id) {
            output.push('\n');
            output.push_str(&union_helpers(&names, u));
        }
    }

    output.push_str("\n#ifdef __cplusplus\n} /* extern \"C\" */\n#endif\n\n");
    output.push_str(&format!("#endif /* {} */\n", guard));

    debug!("CHeader: {} bytes", output.len());
    Ok(output)
}

/// Classes `id` reaches through a pointer.
pub(crate) fn pointer_deps(ctx: &Context<'_>, id: ClassId) -> Vec<ClassId> {
    let class = ctx.model.class(id);
    let mut types: Vec<&TyExpr> = class.fields().iter().map(|f| &f.ty).collect();
    types.extend(class.variants().iter().filter_map(|v| v.payload.as_ref()));
    if let crate::model::ResolvedKind::Callback { args, ret } = &class.kind {
        types.extend(args.iter());
        types.extend(ret.iter());
    }
    types
        .into_iter()
        .filter(|t| t.is_indirect())
        .filter_map(|t| t.class())
        .collect()
}

fn type_decl(names: &CNames<'_>, decl: &TypeDecl, forwarded: bool) -> String {
    let mut output = String::new();
    match decl {
        TypeDecl::Struct(s) => {
            let name = names.name(s.class);
            output.push_str(&format!("struct {} {{\n", name));
            for f in &s.fields {
                output.push_str(&c_doc(f.doc.as_deref(), "    "));
                output.push_str(&format!("    {};\n", names.declare(&f.ty, &escape_cpp(&f.name))));
            }
            output.push_str("};\n");
            if !forwarded {
                output.push_str(&format!("typedef struct {0} {0};\n", name));
            }
        }
        TypeDecl::Enum(e) => {
            let name = names.name(e.class);
            output.push_str("typedef enum {\n");
            for v in &e.variants {
                output.push_str(&format!("   {}_{},\n", name, v.name));
            }
            output.push_str(&format!("}} {};\n", name));
        }
        TypeDecl::Union(u) => {
            let name = names.name(u.class);
            output.push_str("typedef enum {\n");
            for v in &u.variants {
                output.push_str(&format!("   {}_Tag_{},\n", name, v.name));
            }
            output.push_str(&format!("}} {}_Tag;\n\n", name));
            for v in &u.variants {
                let variant = format!("{}Variant_{}", name, v.name);
                output.push_str(&format!("struct {} {{ uint8_t tag;", variant));
                if let Some(ty) = &v.payload {
                    output.push_str(&format!(" {};", names.declare(ty, "payload")));
                }
                output.push_str(" };\n");
                output.push_str(&format!("typedef struct {0} {0};\n", variant));
            }
            output.push_str(&format!("\nunion {} {{\n", name));
            for v in &u.variants {
                output.push_str(&format!("    {}Variant_{} {};\n", name, v.name, escape_cpp(&v.name)));
            }
            output.push_str("};\n");
            if !forwarded {
                output.push_str(&format!("typedef union {0} {0};\n", name));
            }
        }
        TypeDecl::Callback(cb) => {
            let args: Vec<String> = cb.args.iter().map(|a| names.ty(a)).collect();
            let args = if args.is_empty() { "void".to_string() } else { args.join(", ") };
            let ret = cb.ret.as_ref().map(|r| names.ty(r)).unwrap_or_else(|| "void".into());
            output.push_str(&format!("typedef {} (*{})({});\n", ret, names.name(cb.class), args));
        }
    }
    output
}

fn prototype(names: &CNames<'_>, f: &FnDecl) -> String {
    let mut params = Vec::new();
    if let Some(receiver) = f.receiver {
        let this = names.name(f.class);
        params.push(match receiver {
            Receiver::Value | Receiver::MutValue => format!("{} {}", this, f.receiver_name),
            Receiver::Ref => format!("const {}* {}", this, f.receiver_name),
            Receiver::RefMut => format!("{}* restrict {}", this, f.receiver_name),
        });
    }
    for p in &f.params {
        params.push(names.declare(&p.ty, &escape_cpp(&p.name)));
    }
    let params = if params.is_empty() { "void".to_string() } else { params.join(", ") };
    let ret = f
        .ret
        .as_ref()
        .map(|r| names.ty(&ffi_return(r)))
        .unwrap_or_else(|| "void".into());
    format!("extern DLLIMPORT {} {}({});\n", ret, f.symbol, params)
}

/// Variant macros and `matchRef<V>` / `matchMut<V>` accessors.
fn union_helpers(names: &CNames<'_>, u: &UnionDecl) -> String {
    let name = names.name(u.class);
    let mut output = String::new();

    for v in &u.variants {
        match &v.payload {
            Some(_) => output.push_str(&format!(
                "#define {0}_{1}(v) {{ .{2} = {{ .tag = {0}_Tag_{1}, .payload = v }} }}\n",
                name,
                v.name,
                escape_cpp(&v.name)
            )),
            None => output.push_str(&format!(
                "#define {0}_{1} {{ .{2} = {{ .tag = {0}_Tag_{1} }} }}\n",
                name,
                v.name,
                escape_cpp(&v.name)
            )),
        }
    }

    for v in &u.variants {
        let variant = format!("{}Variant_{}", name, v.name);
        // Unit and array variants hand out the variant struct itself.
        let (target, field) = match &v.payload {
            Some(ty) if !matches!(ty, TyExpr::Array { .. }) => (names.ty(ty), "&casted->payload"),
            _ => (variant.clone(), "casted"),
        };
        output.push('\n');
        output.push_str(&format!(
            "static inline bool {n}_matchRef{v}(const {n}* value, const {t}** restrict out) {{\n    const {s}* casted = (const {s}*)value;\n    bool valid = casted->tag == {n}_Tag_{v};\n    if (valid) {{ *out = {f}; }}\n    return valid;\n}}\n",
            n = name,
            v = v.name,
            t = target,
            s = variant,
            f = field
        ));
        output.push_str(&format!(
            "static inline bool {n}_matchMut{v}({n}* restrict value, {t}* restrict* restrict out) {{\n    {s}* restrict casted = ({s}* restrict)value;\n    bool valid = casted->tag == {n}_Tag_{v};\n    if (valid) {{ *out = {f}; }}\n    return valid;\n}}\n",
            n = name,
            v = v.name,
            t = target,
            s = variant,
            f = field
        ));
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
    fn guard_includes_and_linkage() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("#ifndef AZUL_H\n#define AZUL_H\n"));
        assert!(out.contains("#include <stdint.h>"));
        assert!(out.contains("extern \"C\" {"));
        assert!(out.trim_end().ends_with("#endif /* AZUL_H */"));
    }

    #[test]
    fn structs_enums_and_handles() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("/** A point */\nstruct AzPoint {\n    float x;\n    float y;\n};\ntypedef struct AzPoint AzPoint;\n"));
        assert!(out.contains("typedef enum {\n   AzColor_Red,\n   AzColor_Green,\n} AzColor;\n"));
        assert!(out.contains("struct AzAppPtr {\n    void* ptr;\n};\ntypedef struct AzAppPtr AzAppPtr;\n"));
        assert!(out.contains("typedef uint32_t (*AzCallback)(AzAppPtr* restrict);\n"));
        assert!(out.contains("#define AzMaxPoints 64\n"));
    }

    #[test]
    fn tagged_union_is_expanded() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("typedef enum {\n   AzOptionU32_Tag_None,\n   AzOptionU32_Tag_Some,\n} AzOptionU32_Tag;\n"));
        assert!(out.contains("struct AzOptionU32Variant_None { uint8_t tag; };\n"));
        assert!(out.contains("struct AzOptionU32Variant_Some { uint8_t tag; uint32_t payload; };\n"));
        assert!(out.contains(
            "union AzOptionU32 {\n    AzOptionU32Variant_None None;\n    AzOptionU32Variant_Some Some;\n};\ntypedef union AzOptionU32 AzOptionU32;\n"
        ));
        assert!(out.contains("#define AzOptionU32_Some(v) { .Some = { .tag = AzOptionU32_Tag_Some, .payload = v } }\n"));
        assert!(out.contains("#define AzOptionU32_None { .None = { .tag = AzOptionU32_Tag_None } }\n"));
        assert!(out.contains("static inline bool AzOptionU32_matchRefSome(const AzOptionU32* value, const uint32_t** restrict out) {"));
        assert!(out.contains("static inline bool AzOptionU32_matchMutSome(AzOptionU32* restrict value, uint32_t* restrict* restrict out) {"));
        assert!(out.contains(
            "static inline bool AzOptionU32_matchRefNone(const AzOptionU32* value, const AzOptionU32Variant_None** restrict out) {"
        ));
    }

    #[test]
    fn prototypes() {
        let out = header(&Fixture::simple(SCHEMA));
        assert!(out.contains("extern DLLIMPORT AzAppPtr AzApp_new(AzPoint origin);\n"));
        assert!(out.contains("/** Run the event loop */\nextern DLLIMPORT void AzApp_run(AzAppPtr app, AzWindowPtr window);\n"));
        assert!(out.contains("extern DLLIMPORT AzPoint AzApp_origin(const AzAppPtr* app);\n"));
        assert!(out.contains("extern DLLIMPORT void AzApp_delete(AzAppPtr* restrict object);\n"));
        assert!(out.contains("extern DLLIMPORT AzWindowPtr AzWindow_new(void);\n"));
        assert!(out.contains("extern DLLIMPORT bool AzPoint_partialEq(const AzPoint* a, const AzPoint* b);\n"));
    }

    #[test]
    fn container_follows_its_forward_declaration() {
        let fx = Fixture::simple(
            r#"{ "1": { "dom": { "classes": {
                "Dom": { "struct_fields": [ { "children": { "type": "DomVec" } }, { "id": { "type": "u32" } } ] },
                "DomVec": { "struct_fields": [ { "ptr": { "type": "*const Dom" } }, { "len": { "type": "usize" } }, { "cap": { "type": "usize" } } ] }
            } } } }"#,
        );
        let out = header(&fx);
        let forward = out.find("struct AzDom;\ntypedef struct AzDom AzDom;\n").unwrap();
        let container = out.find("struct AzDomVec {").unwrap();
        let element = out.find("struct AzDom {").unwrap();
        assert!(forward < container && container < element);
        assert_eq!(out[forward..container].matches(';').count(), 2, "container must follow the forward declaration");
        assert!(out.contains("struct AzDomVec {\n    const AzDom* ptr;\n    size_t len;\n    size_t cap;\n};\n"));
        assert_eq!(out.matches("typedef struct AzDom AzDom;").count(), 1);
    }
}
