//! Function emitter.
//!
//! Turns schema constructors and functions into exported-function
//! declarations, picks each native body, and adds the lifecycle and
//! capability functions every data class gets.

use apigen_ir::{Capability, Ownership, PatchTable, Primitive, Receiver, Target};
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::decl::{Body, DeclTable, FnDecl, FnKind};
use crate::error::{BindgenError, Result};
use crate::model::{Model, Param, ResolvedClass, ResolvedFn, TyExpr};
use crate::naming::{escape_rust, to_snake_case};

/// Native parameter name of a schema method's receiver (`App` → `app`).
pub fn receiver_name(class: &ResolvedClass) -> String {
    escape_rust(&to_snake_case(&class.name))
}

pub fn class_functions(
    model: &Model,
    config: &GeneratorConfig,
    patches: &PatchTable,
    class: &ResolvedClass,
) -> Result<Vec<FnDecl>> {
    if !class.is_data() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for f in class.all_functions() {
        out.push(schema_function(config, patches, class, f)?);
    }
    for (kind, name) in synthesized_set(model, class) {
        if class.all_functions().any(|f| f.name == name) {
            continue;
        }
        out.extend(synthesized_function(model, config, patches, class, kind, name));
    }
    Ok(out)
}

/// Build the function section of `table` for every class.
pub fn emit_functions(
    model: &Model,
    config: &GeneratorConfig,
    patches: &PatchTable,
    table: &mut DeclTable,
) -> Result<()> {
    let mut count = 0;
    for class in model.classes() {
        let functions = class_functions(model, config, patches, class)?;
        count += functions.len();
        if !functions.is_empty() {
            table.functions.insert(class.id, functions);
        }
    }
    debug!("FuncGen: {} exported functions", count);
    Ok(())
}

fn schema_function(
    config: &GeneratorConfig,
    patches: &PatchTable,
    class: &ResolvedClass,
    f: &ResolvedFn,
) -> Result<FnDecl> {
    let body = if class.is_virtual(Target::Dll) {
        Body::Omitted
    } else if let Some(p) = patches.function(&class.module, &class.name, &f.name, Target::Dll) {
        Body::Patch(p.to_string())
    } else if let Some(b) = &f.fn_body {
        Body::Schema(b.clone())
    } else {
        match &class.external {
            Some(external) => Body::Synthesized(forward_call(class, f, external)),
            None => {
                return Err(BindgenError::MissingFunctionBody {
                    function: format!("{}.{}.{}", class.module, class.name, f.name),
                })
            }
        }
    };

    Ok(FnDecl {
        class: class.id,
        name: f.name.clone(),
        symbol: config.symbol(&class.name, &f.name),
        kind: if f.is_constructor {
            FnKind::Constructor
        } else {
            FnKind::Method
        },
        receiver: f.receiver,
        receiver_name: receiver_name(class),
        params: f.params.clone(),
        ret: f.ret.clone(),
        doc: f.doc.clone(),
        body,
    })
}

/// `External::f(args)` for constructors and static functions, `recv.f(args)` for methods.
fn forward_call(class: &ResolvedClass, f: &ResolvedFn, external: &str) -> String {
    let args = f
        .params
        .iter()
        .map(|p| escape_rust(&p.name))
        .collect::<Vec<_>>()
        .join(", ");
    match f.receiver {
        Some(_) if !f.is_constructor => format!("{}.{}({})", receiver_name(class), f.name, args),
        _ => format!("{}::{}({})", external, f.name, args),
    }
}

/// Which lifecycle and capability functions `class` gets, in emission order.
fn synthesized_set(model: &Model, class: &ResolvedClass) -> Vec<(FnKind, &'static str)> {
    let declared = &class.declared;
    let mut set = vec![(FnKind::Delete, "delete")];
    if class.is_opaque() {
        set.push((FnKind::ShallowCopy, "shallow_copy"));
    }
    if declared.contains(Capability::Clone) {
        set.push((FnKind::DeepCopy, "deep_copy"));
    }
    if declared.contains(Capability::PartialEq) {
        set.push((FnKind::PartialEq, "partial_eq"));
    }
    if declared.contains(Capability::PartialOrd) {
        set.push((FnKind::PartialCmp, "partial_cmp"));
    }
    if declared.contains(Capability::Ord) {
        set.push((FnKind::Cmp, "cmp"));
    }
    if declared.contains(Capability::Hash) {
        set.push((FnKind::Hash, "hash"));
    }
    if declared.contains(Capability::Debug) && model.text_class().is_some() {
        set.push((FnKind::DebugString, "to_dbg_string"));
    }
    set
}

fn synthesized_function(
    model: &Model,
    config: &GeneratorConfig,
    patches: &PatchTable,
    class: &ResolvedClass,
    kind: FnKind,
    name: &str,
) -> Option<FnDecl> {
    let this = TyExpr::Class(class.id);
    let other = Param {
        name: "b".into(),
        ty: TyExpr::indirect(Ownership::Ref, this.clone()),
    };

    let (receiver, receiver_name, params, ret, text) = match kind {
        FnKind::Delete => (
            Receiver::RefMut,
            "object",
            vec![],
            None,
            if class.needs_drop {
                "unsafe { core::ptr::drop_in_place(object) }".to_string()
            } else {
                String::new()
            },
        ),
        FnKind::ShallowCopy => (
            Receiver::Ref,
            "object",
            vec![],
            Some(this),
            "unsafe { core::ptr::read(object) }".to_string(),
        ),
        FnKind::DeepCopy => (Receiver::Ref, "object", vec![], Some(this), "object.clone()".to_string()),
        FnKind::PartialEq => (
            Receiver::Ref,
            "a",
            vec![other],
            Some(TyExpr::Prim(Primitive::Bool)),
            "core::cmp::PartialEq::eq(a, b)".to_string(),
        ),
        FnKind::PartialCmp => (
            Receiver::Ref,
            "a",
            vec![other],
            Some(TyExpr::Prim(Primitive::U8)),
            [
                "match core::cmp::PartialOrd::partial_cmp(a, b) {",
                "    Some(core::cmp::Ordering::Less) => 0,",
                "    Some(core::cmp::Ordering::Equal) => 1,",
                "    Some(core::cmp::Ordering::Greater) => 2,",
                "    None => 255,",
                "}",
            ]
            .join("\n"),
        ),
        FnKind::Cmp => (
            Receiver::Ref,
            "a",
            vec![other],
            Some(TyExpr::Prim(Primitive::U8)),
            [
                "match core::cmp::Ord::cmp(a, b) {",
                "    core::cmp::Ordering::Less => 0,",
                "    core::cmp::Ordering::Equal => 1,",
                "    core::cmp::Ordering::Greater => 2,",
                "}",
            ]
            .join("\n"),
        ),
        FnKind::Hash => (
            Receiver::Ref,
            "object",
            vec![],
            Some(TyExpr::Prim(Primitive::U64)),
            [
                "use core::hash::{Hash, Hasher};",
                "let mut hasher = std::collections::hash_map::DefaultHasher::new();",
                "object.hash(&mut hasher);",
                "hasher.finish()",
            ]
            .join("\n"),
        ),
        FnKind::DebugString => {
            let (text_id, text_name) = model
                .text_class()
                .map(|t| (t.id, t.name.clone()))
                .unwrap_or((class.id, class.name.clone()));
            (
                Receiver::Ref,
                "object",
                vec![],
                Some(TyExpr::Class(text_id)),
                format!("{}{}::from(format!(\"{{:?}}\", object))", config.prefix, text_name),
            )
        }
        FnKind::Constructor | FnKind::Method => return None,
    };

    let body = if class.is_virtual(Target::Dll) {
        Body::Omitted
    } else if let Some(p) = patches.function(&class.module, &class.name, name, Target::Dll) {
        Body::Patch(p.to_string())
    } else {
        Body::Synthesized(text)
    };

    Some(FnDecl {
        class: class.id,
        name: name.to_string(),
        symbol: config.symbol(&class.name, name),
        kind,
        receiver: Some(receiver),
        receiver_name: receiver_name.to_string(),
        params,
        ret,
        doc: None,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigen_ir::{ApiSchema, PatchKey, PatchScope};

    const SCHEMA: &str = r#"{ "1": { "app": { "classes": {
        "Size": { "struct_fields": [ { "w": { "type": "u32" } }, { "h": { "type": "u32" } } ] },
        "App": { "external": "backing::App", "is_boxed_object": true, "custom_destructor": true,
                 "derive": ["Clone", "PartialEq", "Debug"],
                 "constructors": { "new": { "fn_args": [ { "size": "Size" } ] } },
                 "functions": {
                     "run": { "fn_args": [ { "self": "value" }, { "window": "Window" } ] },
                     "size": { "fn_args": [ { "self": "ref" } ], "returns": { "type": "Size" } }
                 } },
        "Window": { "external": "backing::Window", "is_boxed_object": true },
        "Local": { "functions": { "reset": { "fn_args": [ { "self": "refmut" } ], "fn_body": "local.reset_all()" } } },
        "Str": { "struct_fields": [ { "len": { "type": "usize" } } ] }
    } } } }"#;

    fn model(config: &GeneratorConfig) -> Model {
        Model::build(&ApiSchema::from_json(SCHEMA).unwrap(), config).unwrap()
    }

    fn names(fs: &[FnDecl]) -> Vec<&str> {
        fs.iter().map(|f| f.symbol.as_str()).collect()
    }

    #[test]
    fn plain_struct_gets_empty_delete_only() {
        let config = GeneratorConfig::default();
        let m = model(&config);
        let fs = class_functions(&m, &config, &PatchTable::new(), m.find("Size").unwrap()).unwrap();
        assert_eq!(names(&fs), vec!["AzSize_delete"]);
        assert_eq!(fs[0].body, Body::Synthesized(String::new()));
    }

    #[test]
    fn opaque_class_gets_lifecycle_functions() {
        let config = GeneratorConfig::default();
        let m = model(&config);
        let fs = class_functions(&m, &config, &PatchTable::new(), m.find("App").unwrap()).unwrap();
        assert_eq!(
            names(&fs),
            vec![
                "AzApp_new",
                "AzApp_run",
                "AzApp_size",
                "AzApp_delete",
                "AzApp_shallowCopy",
                "AzApp_deepCopy",
                "AzApp_partialEq"
            ]
        );
        assert_eq!(fs[0].body.text(), Some("backing::App::new(size)"));
        assert_eq!(fs[1].body.text(), Some("app.run(window)"));
        assert_eq!(fs[3].body.text(), Some("unsafe { core::ptr::drop_in_place(object) }"));
        assert!(fs[4].returns_self());
    }

    #[test]
    fn debug_string_needs_text_class() {
        let config = GeneratorConfig {
            text_class: Some("Str".into()),
            ..Default::default()
        };
        let m = model(&config);
        let fs = class_functions(&m, &config, &PatchTable::new(), m.find("App").unwrap()).unwrap();
        let dbg = fs.iter().find(|f| f.kind == FnKind::DebugString).unwrap();
        assert_eq!(dbg.symbol, "AzApp_toDbgString");
        assert_eq!(dbg.body.text(), Some("AzStr::from(format!(\"{:?}\", object))"));
    }

    #[test]
    fn body_priority() {
        let config = GeneratorConfig::default();
        let m = model(&config);
        let mut patches = PatchTable::new();
        patches
            .insert(
                PatchKey::new(
                    PatchScope::Function {
                        module: "app".into(),
                        class: "App".into(),
                        function: "new".into(),
                    },
                    Target::Dll,
                ),
                "backing::App::with_size(size)",
            )
            .unwrap();
        let fs = class_functions(&m, &config, &patches, m.find("App").unwrap()).unwrap();
        assert_eq!(fs[0].body, Body::Patch("backing::App::with_size(size)".into()));

        let local = class_functions(&m, &config, &patches, m.find("Local").unwrap()).unwrap();
        assert_eq!(local[0].body, Body::Schema("local.reset_all()".into()));
    }

    #[test]
    fn missing_body_on_unbacked_class() {
        let schema = ApiSchema::from_json(
            r#"{ "1": { "m": { "classes": { "Loose": { "functions": { "go": { "fn_args": [] } } } } } } }"#,
        )
        .unwrap();
        let config = GeneratorConfig::default();
        let m = Model::build(&schema, &config).unwrap();
        match class_functions(&m, &config, &PatchTable::new(), m.find("Loose").unwrap()) {
            Err(BindgenError::MissingFunctionBody { function }) => assert_eq!(function, "m.Loose.go"),
            other => panic!("expected missing body, got {:?}", other),
        }
    }
}
