//! Python extension module (pyo3) over the ergonomic wrapper.
//!
//! Every struct and tagged union becomes a `#[pyclass]` holding the wrapper
//! value; opaque classes hold an `Option` so a by-move call can take the
//! handle out. Plain enums are mirrored as `#[pyclass(eq, eq_int)]` enums
//! with `From` conversions both ways. The text class maps to `str`.
//! Functions whose signature has no Python spelling are listed as
//! `// skipped:` comments.

use apigen_ir::{Capability, ClassId, Ownership, Primitive, Receiver, Target};
use tracing::debug;

use super::{banner, body_lines, rust_doc};
use crate::decl::{FnDecl, FnKind, TypeDecl};
use crate::error::{BindgenError, Result};
use crate::model::{ResolvedClass, TyExpr};
use crate::naming::escape_rust;
use crate::{ArtifactId, Codegen, Context, GeneratedCode, GeneratedFile};

pub struct PythonModuleGenerator;

impl Codegen for PythonModuleGenerator {
    fn generate(&self, ctx: &Context<'_>) -> Result<GeneratedCode> {
        let content = generate_module(ctx)?;
        Ok(GeneratedCode {
            files: vec![GeneratedFile {
                id: ArtifactId::ExtensionModule,
                path: format!("python/{}.rs", ctx.config.library_name),
                content,
            }],
        })
    }

    fn target(&self) -> Target {
        Target::Python
    }
}

/// A Python-side parameter: signature fragment and the wrapper value it yields.
struct PyParam {
    sig: String,
    expr: String,
}

struct PyNames<'c> {
    ctx: &'c Context<'c>,
}

impl PyNames<'_> {
    fn class(&self, id: ClassId) -> &ResolvedClass {
        self.ctx.model.class(id)
    }

    fn py(&self, id: ClassId) -> String {
        format!("Py{}", self.class(id).name)
    }

    /// Wrapper path: `azul::geom::Point`.
    fn path(&self, id: ClassId) -> String {
        let class = self.class(id);
        format!(
            "{}::{}::{}",
            self.ctx.config.wrapper_crate.replace('-', "_"),
            escape_rust(&class.module),
            class.name
        )
    }

    fn clonable(&self, id: ClassId) -> bool {
        self.class(id).declared.contains(Capability::Clone)
    }

    /// Container class with primitive elements: `Vec<T>` at the boundary.
    fn container(&self, id: ClassId) -> Option<Primitive> {
        match &self.class(id).container_element {
            Some(TyExpr::Prim(p)) if supported(*p) => Some(*p),
            _ => None,
        }
    }

    fn param(&self, ty: &TyExpr, name: &str) -> std::result::Result<PyParam, String> {
        let param = |sig: String, expr: String| -> std::result::Result<PyParam, String> { Ok(PyParam { sig, expr }) };
        match ty {
            TyExpr::Prim(p) if supported(*p) => param(format!("{}: {}", name, p.rust_name()), name.to_string()),
            TyExpr::Class(id) => {
                let class = self.class(*id);
                if self.ctx.model.is_text(*id) {
                    param(format!("{}: String", name), format!("{}::from({})", self.path(*id), name))
                } else if let Some(p) = self.container(*id) {
                    param(format!("{}: Vec<{}>", name, p.rust_name()), format!("{}::from({})", self.path(*id), name))
                } else if class.is_plain_enum() {
                    param(format!("{}: {}", name, self.py(*id)), format!("{}.into()", name))
                } else if class.is_opaque() {
                    param(format!("mut {}: PyRefMut<'_, {}>", name, self.py(*id)), format!("{}.take()?", name))
                } else if class.is_data() && self.clonable(*id) {
                    param(format!("{}: PyRef<'_, {}>", name, self.py(*id)), format!("{}.inner.clone()", name))
                } else {
                    Err(format!("`{}` cannot be passed by value", class.name))
                }
            }
            TyExpr::Indirect { ownership, inner } => match (ownership, inner.as_ref()) {
                (Ownership::Ref | Ownership::RefMut, TyExpr::Class(id))
                    if self.class(*id).is_data() && self.pyclass(*id) =>
                {
                    let opaque = self.class(*id).is_opaque();
                    match (ownership, opaque) {
                        (Ownership::Ref, true) => param(format!("{}: PyRef<'_, {}>", name, self.py(*id)), format!("{}.handle()?", name)),
                        (Ownership::Ref, false) => param(format!("{}: PyRef<'_, {}>", name, self.py(*id)), format!("&{}.inner", name)),
                        (_, true) => param(format!("mut {}: PyRefMut<'_, {}>", name, self.py(*id)), format!("{}.handle_mut()?", name)),
                        (_, false) => param(format!("mut {}: PyRefMut<'_, {}>", name, self.py(*id)), format!("&mut {}.inner", name)),
                    }
                }
                _ => Err("pointer or borrowed argument".to_string()),
            },
            TyExpr::Prim(p) => Err(format!("`{}` has no Python spelling", p.rust_name())),
            TyExpr::Array { .. } => Err("array argument".to_string()),
        }
    }

    /// Python return type and the expression converting `value` into it.
    fn ret(&self, ty: &TyExpr) -> std::result::Result<(String, String), String> {
        match ty {
            TyExpr::Prim(p) if supported(*p) => Ok((p.rust_name().to_string(), "value".into())),
            TyExpr::Class(id) => {
                let class = self.class(*id);
                if self.ctx.model.is_text(*id) {
                    Ok(("String".into(), "value.as_str().to_string()".into()))
                } else if let Some(p) = self.container(*id) {
                    Ok((format!("Vec<{}>", p.rust_name()), "value.as_ref().to_vec()".into()))
                } else if class.is_plain_enum() {
                    Ok((self.py(*id), format!("{}::from(value)", self.py(*id))))
                } else if class.is_opaque() {
                    Ok((self.py(*id), format!("{} {{ inner: Some(value) }}", self.py(*id))))
                } else if class.is_data() {
                    Ok((self.py(*id), format!("{} {{ inner: value }}", self.py(*id))))
                } else {
                    Err(format!("`{}` cannot be returned", class.name))
                }
            }
            TyExpr::Indirect { ownership: Ownership::Ref, inner } => match inner.as_ref() {
                TyExpr::Prim(p) if supported(*p) => Ok((p.rust_name().to_string(), "*value".into())),
                TyExpr::Class(id) if self.ctx.model.is_text(*id) => Ok(("String".into(), "value.as_str().to_string()".into())),
                TyExpr::Class(id) if !self.class(*id).is_opaque() && self.class(*id).is_data() && self.clonable(*id) => {
                    let (py, conv) = self.ret(&TyExpr::Class(*id))?;
                    Ok((py, conv.replace("value", "value.clone()")))
                }
                _ => Err("borrowed return".to_string()),
            },
            _ => Err("pointer or array return".to_string()),
        }
    }

    /// Classes mirrored as a `#[pyclass]`.
    fn pyclass(&self, id: ClassId) -> bool {
        let class = self.class(id);
        class.is_data()
            && !class.is_virtual(Target::Python)
            && !self.ctx.model.is_text(id)
            && self.container(id).is_none()
    }
}

/// Primitives pyo3 converts out of the box.
fn supported(p: Primitive) -> bool {
    !matches!(p, Primitive::CVoid | Primitive::Unit | Primitive::I128 | Primitive::U128)
}

fn generate_module(ctx: &Context<'_>) -> Result<String> {
    let names = PyNames { ctx };
    let config = ctx.config;

    let mut output = banner(ctx, "//");
    output.push('\n');
    output.push_str(&format!(
        "//! Python extension module `{}` over the `{}` wrapper crate.\n\n",
        config.python_module, config.wrapper_crate
    ));
    output.push_str("#![allow(non_snake_case, unused_imports, unused_mut, clippy::all)]\n\n");
    output.push_str("use pyo3::exceptions::PyRuntimeError;\nuse pyo3::prelude::*;\n");
    if ctx
        .model
        .classes()
        .iter()
        .any(|c| c.is_opaque() && !c.is_virtual(Target::Python))
    {
        output.push_str("\nfn moved(name: &str) -> PyErr {\n    PyRuntimeError::new_err(format!(\"{} has been moved\", name))\n}\n");
    }
    if let Some(header) = ctx.patches.header(Target::Python) {
        output.push('\n');
        output.push_str(header.trim_end());
        output.push('\n');
    }

    let mut registered = Vec::new();
    for module in ctx.model.modules() {
        output.push_str(&format!("\n// Module: {}\n", module.name));
        for id in ctx.model.module_order(module, Target::Python) {
            let class = ctx.model.class(id);
            output.push('\n');
            output.push_str(&class_items(&names, class)?);
            if names.pyclass(id) {
                registered.push(id);
            }
        }
        if let Some(patch) = ctx.patches.module(&module.name, Target::Python) {
            output.push('\n');
            output.push_str(patch.trim_end());
            output.push('\n');
        }
    }

    output.push_str(&format!("\n#[pymodule]\nfn {}(m: &Bound<'_, PyModule>) -> PyResult<()> {{\n", config.python_module));
    for id in registered {
        output.push_str(&format!("    m.add_class::<{}>()?;\n", names.py(id)));
    }
    for c in &ctx.decls.consts {
        if supported(c.ty) {
            output.push_str(&format!("    m.add(\"{}\", {})?;\n", c.name, names.path(c.class)));
        }
    }
    output.push_str("    Ok(())\n}\n");

    debug!("Python: {} bytes", output.len());
    Ok(output)
}

fn class_items(names: &PyNames<'_>, class: &ResolvedClass) -> Result<String> {
    let ctx = names.ctx;
    let class_patch = ctx.patches.class(&class.module, &class.name, Target::Python);
    if class.is_virtual(Target::Python) {
        let patch = class_patch.ok_or_else(|| BindgenError::MissingPatch {
            class: format!("{}.{}", class.module, class.name),
            target: Target::Python,
        })?;
        return Ok(format!("{}\n", patch.trim_end()));
    }

    let mut output = match ctx.decls.type_decl(class.id) {
        None => return Ok(String::new()),
        Some(TypeDecl::Callback(_)) => format!("// skipped: {}: callback typedef\n", class.name),
        Some(_) if ctx.model.is_text(class.id) => format!("// {} maps to `str`\n", class.name),
        Some(_) if names.container(class.id).is_some() => format!("// {} maps to `list`\n", class.name),
        Some(TypeDecl::Enum(e)) => plain_enum(names, class, &e.variants.iter().map(|v| v.name.as_str()).collect::<Vec<_>>()),
        Some(decl) => holder(names, class, decl),
    };

    if let Some(patch) = class_patch {
        output.push('\n');
        output.push_str(patch.trim_end());
        output.push('\n');
    }
    Ok(output)
}

fn pyclass_attr(names: &PyNames<'_>, class: &ResolvedClass, extra: &str) -> String {
    format!(
        "#[pyclass(name = \"{}\", module = \"{}\"{})]\n",
        class.name, names.ctx.config.python_module, extra
    )
}

fn plain_enum(names: &PyNames<'_>, class: &ResolvedClass, variants: &[&str]) -> String {
    let py = names.py(class.id);
    let path = names.path(class.id);
    let mut output = rust_doc(class.doc.as_deref(), "");
    output.push_str(&pyclass_attr(names, class, ", eq, eq_int"));
    output.push_str("#[derive(Clone, Copy, PartialEq)]\n");
    output.push_str(&format!("pub enum {} {{\n", py));
    for v in variants {
        output.push_str(&format!("    {},\n", v));
    }
    output.push_str("}\n\n");

    for (from, to) in [(py.as_str(), path.as_str()), (path.as_str(), py.as_str())] {
        output.push_str(&format!(
            "impl From<{}> for {} {{\n    fn from(value: {}) -> Self {{\n        match value {{\n",
            from, to, from
        ));
        for v in variants {
            output.push_str(&format!("            {}::{} => {}::{},\n", from, v, to, v));
        }
        output.push_str("        }\n    }\n}\n");
        if from == py {
            output.push('\n');
        }
    }
    output
}

fn holder(names: &PyNames<'_>, class: &ResolvedClass, decl: &TypeDecl) -> String {
    let ctx = names.ctx;
    let py = names.py(class.id);
    let path = names.path(class.id);
    let opaque = class.is_opaque();

    let mut output = rust_doc(class.doc.as_deref(), "");
    output.push_str(&pyclass_attr(names, class, ", unsendable"));
    let inner = if opaque { format!("Option<{}>", path) } else { path.clone() };
    output.push_str(&format!("pub struct {} {{\n    pub(crate) inner: {},\n}}\n", py, inner));

    if opaque {
        output.push_str(&format!(
            "\nimpl {py} {{\n    fn handle(&self) -> PyResult<&{path}> {{\n        self.inner.as_ref().ok_or_else(|| moved(\"{name}\"))\n    }}\n\n    fn handle_mut(&mut self) -> PyResult<&mut {path}> {{\n        self.inner.as_mut().ok_or_else(|| moved(\"{name}\"))\n    }}\n\n    fn take(&mut self) -> PyResult<{path}> {{\n        self.inner.take().ok_or_else(|| moved(\"{name}\"))\n    }}\n}}\n",
            py = py,
            path = path,
            name = class.name
        ));
    }

    let mut methods: Vec<String> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();

    let functions: Vec<&FnDecl> = ctx
        .decls
        .functions_of(class.id)
        .iter()
        .filter(|f| !f.kind.is_synthesized())
        .collect();
    let has_new = functions.iter().any(|f| f.kind == FnKind::Constructor && f.name == "new");
    for f in &functions {
        match method(names, class, f) {
            Ok(m) => methods.push(m),
            Err(reason) => skipped.push(format!("    // skipped: {}: {}\n", f.name, reason)),
        }
    }

    match decl {
        TypeDecl::Struct(s) if !opaque => {
            if !has_new {
                if let Some(ctor) = default_constructor(names, class, &s.fields) {
                    methods.insert(0, ctor);
                }
            }
            for f in &s.fields {
                if let Some(getter) = getter(names, &f.name, &f.ty) {
                    methods.push(getter);
                }
            }
        }
        TypeDecl::Union(u) => {
            for v in &u.variants {
                match variant_constructor(names, class, &v.name, v.payload.as_ref()) {
                    Ok(m) => methods.push(m),
                    Err(reason) => skipped.push(format!("    // skipped: {}: {}\n", v.name, reason)),
                }
            }
            let arms: Vec<String> = u
                .variants
                .iter()
                .map(|v| {
                    let pattern = if v.payload.is_some() { "(..)" } else { "" };
                    format!("            {}::{}{} => \"{}\",\n", path, v.name, pattern, v.name)
                })
                .collect();
            methods.push(format!(
                "    #[getter]\n    fn tag(&self) -> &'static str {{\n        match &self.inner {{\n{}        }}\n    }}\n",
                arms.concat()
            ));
            match match_method(names, class, &u.variants) {
                Ok(m) => methods.push(m),
                Err(reason) => skipped.push(format!("    // skipped: match: {}\n", reason)),
            }
        }
        _ => {}
    }

    if class.declared.contains(Capability::Debug) {
        let body = if opaque {
            format!(
                "match &self.inner {{\n    Some(value) => format!(\"{{:?}}\", value),\n    None => \"<moved {}>\".to_string(),\n}}",
                class.name
            )
        } else {
            "format!(\"{:?}\", self.inner)".to_string()
        };
        methods.push(format!("    fn __repr__(&self) -> String {{\n{}    }}\n", body_lines(&body, "        ")));
    }

    output.push_str(&format!("\n#[pymethods]\nimpl {} {{\n", py));
    output.push_str(&methods.join("\n"));
    if !skipped.is_empty() {
        if !methods.is_empty() {
            output.push('\n');
        }
        output.push_str(&skipped.concat());
    }
    output.push_str("}\n");
    output
}

fn method(names: &PyNames<'_>, class: &ResolvedClass, f: &FnDecl) -> std::result::Result<String, String> {
    let ctx = names.ctx;
    let opaque = class.is_opaque();
    let mut params = Vec::new();
    let mut args = Vec::new();
    for p in &f.params {
        let converted = names.param(&p.ty, &escape_rust(&p.name))?;
        params.push(converted.sig);
        args.push(converted.expr);
    }

    let receiver = match f.receiver.filter(|_| f.kind != FnKind::Constructor) {
        None => None,
        Some(Receiver::Ref) => Some(("&self", if opaque { "self.handle()?" } else { "self.inner" }.to_string())),
        Some(Receiver::RefMut) => Some(("&mut self", if opaque { "self.handle_mut()?" } else { "self.inner" }.to_string())),
        Some(_) if opaque => Some(("&mut self", "self.take()?".to_string())),
        Some(_) if names.clonable(class.id) => Some(("&self", "self.inner.clone()".to_string())),
        Some(_) => return Err("consumes a value that cannot be cloned".into()),
    };

    let (ret, conv) = match &f.ret {
        Some(ty) => names.ret(ty)?,
        None => ("()".to_string(), "()".to_string()),
    };

    let mut sig = Vec::new();
    let attr = match (&receiver, f.kind) {
        (None, FnKind::Constructor) if f.name == "new" => "    #[new]\n",
        (None, _) => "    #[staticmethod]\n",
        _ => "",
    };
    if let Some((recv, _)) = &receiver {
        sig.push(recv.to_string());
    }
    sig.extend(params);

    let call = match &receiver {
        Some((_, expr)) => format!("{}.{}({})", expr, escape_rust(&f.name), args.join(", ")),
        None => format!("{}::{}({})", names.path(class.id), escape_rust(&f.name), args.join(", ")),
    };
    let body = match ctx.patches.function(&class.module, &class.name, &f.name, Target::Python) {
        Some(patch) => patch.to_string(),
        None if f.ret.is_none() => format!("{};\nOk(())", call),
        None => format!("let value = {};\nOk({})", call, conv),
    };

    let mut output = rust_doc(f.doc.as_deref(), "    ");
    output.push_str(attr);
    output.push_str(&format!(
        "    fn {}({}) -> PyResult<{}> {{\n",
        escape_rust(&f.name),
        sig.join(", "),
        ret
    ));
    output.push_str(&body_lines(&body, "        "));
    output.push_str("    }\n");
    Ok(output)
}

/// `#[new]` taking every field, when each one has a Python spelling.
fn default_constructor(names: &PyNames<'_>, class: &ResolvedClass, fields: &[crate::model::ResolvedField]) -> Option<String> {
    let mut params = Vec::new();
    let mut inits = Vec::new();
    for f in fields {
        let name = escape_rust(&f.name);
        let p = names.param(&f.ty, &name).ok()?;
        let owned = f.ty.value_class().map_or(false, |id| names.class(id).needs_drop);
        let expr = if class.custom_destructor && owned {
            format!("core::mem::ManuallyDrop::new({})", p.expr)
        } else {
            p.expr
        };
        params.push(p.sig);
        inits.push(if expr == name { name } else { format!("{}: {}", name, expr) });
    }
    let init = if inits.is_empty() {
        format!("{} {{}}", names.path(class.id))
    } else {
        format!("{} {{ {} }}", names.path(class.id), inits.join(", "))
    };
    Some(format!(
        "    #[new]\n    fn new({}) -> PyResult<Self> {{\n        Ok({} {{ inner: {} }})\n    }}\n",
        params.join(", "),
        names.py(class.id),
        init
    ))
}

fn getter(names: &PyNames<'_>, field: &str, ty: &TyExpr) -> Option<String> {
    let name = escape_rust(field);
    let (ret, expr) = match ty {
        TyExpr::Prim(p) if supported(*p) => (p.rust_name().to_string(), format!("self.inner.{}", name)),
        TyExpr::Class(id) if names.ctx.model.is_text(*id) => {
            ("String".to_string(), format!("self.inner.{}.as_str().to_string()", name))
        }
        TyExpr::Class(id) if names.class(*id).is_plain_enum() && names.clonable(*id) => {
            (names.py(*id), format!("{}::from(self.inner.{}.clone())", names.py(*id), name))
        }
        _ => return None,
    };
    Some(format!("    #[getter]\n    fn {}(&self) -> {} {{\n        {}\n    }}\n", name, ret, expr))
}

fn variant_constructor(
    names: &PyNames<'_>,
    class: &ResolvedClass,
    variant: &str,
    payload: Option<&TyExpr>,
) -> std::result::Result<String, String> {
    let path = names.path(class.id);
    let (params, value) = match payload {
        Some(ty) => {
            let p = names.param(ty, "payload")?;
            (p.sig, format!("{}::{}({})", path, variant, p.expr))
        }
        None => (String::new(), format!("{}::{}", path, variant)),
    };
    Ok(format!(
        "    #[staticmethod]\n    #[pyo3(name = \"{}\")]\n    fn variant_{}({}) -> PyResult<Self> {{\n        Ok({} {{ inner: {} }})\n    }}\n",
        variant,
        crate::naming::to_snake_case(variant),
        params,
        names.py(class.id),
        value
    ))
}

/// `match()` returning the active variant name and its payload (`None` for unit variants).
fn match_method(
    names: &PyNames<'_>,
    class: &ResolvedClass,
    variants: &[crate::model::ResolvedVariant],
) -> std::result::Result<String, String> {
    let path = names.path(class.id);
    let mut arms = String::new();
    for v in variants {
        match &v.payload {
            None => arms.push_str(&format!("            {}::{} => (\"{}\", py.None()),\n", path, v.name, v.name)),
            Some(ty) => {
                let (_, conv) = names
                    .ret(&TyExpr::indirect(Ownership::Ref, ty.clone()))
                    .map_err(|reason| format!("payload of {}: {}", v.name, reason))?;
                let conv = if conv.starts_with('*') { format!("({})", conv) } else { conv };
                arms.push_str(&format!(
                    "            {}::{}(value) => (\"{}\", {}.into_py(py)),\n",
                    path, v.name, v.name, conv
                ));
            }
        }
    }
    Ok(format!(
        "    #[pyo3(name = \"match\")]\n    fn match_(&self, py: Python<'_>) -> PyResult<(&'static str, PyObject)> {{\n        Ok(match &self.inner {{\n{}        }})\n    }}\n",
        arms
    ))
}
