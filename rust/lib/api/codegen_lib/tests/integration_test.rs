/// Integration tests for the full generation pipeline

use apigen_codegen_lib::model::{Model, TyExpr};
use apigen_codegen_lib::*;
use apigen_ir::{ApiSchema, ClassId, PatchKey, PatchScope, PatchTable, Target};
use apigen_validate::ValidationErrorKind;

const FIXTURE: &str = include_str!("fixtures/api.json");

fn schema() -> ApiSchema {
    ApiSchema::from_json(FIXTURE).unwrap()
}

fn run(schema: &ApiSchema) -> OutputMap {
    generate(schema, &GeneratorConfig::default(), &PatchTable::new()).unwrap()
}

fn content<'a>(out: &'a OutputMap, id: ArtifactId) -> &'a str {
    &out[&id].content
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("`{}` not found", needle))
}

#[test]
fn emits_every_artifact() {
    let out = run(&schema());
    let paths: Vec<&str> = out.values().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "native/lib.rs",
            "wrapper/lib.rs",
            "wrapper/geom.rs",
            "wrapper/dom.rs",
            "wrapper/app.rs",
            "c/azul.h",
            "cpp/azul.hpp",
            "python/azul.rs",
        ]
    );
    for file in out.values() {
        assert!(
            file.content.contains("Auto-generated by apigen from API version 1.0.0"),
            "{} has no banner",
            file.path
        );
    }
}

#[test]
fn primitive_struct_has_trivial_drop_and_no_clone() {
    let out = run(&schema());
    let native = content(&out, ArtifactId::NativeExport);
    assert!(native.contains("pub extern \"C\" fn AzSize_delete(object: &mut AzSize) {}\n"));
    assert!(!native.contains("AzSize_deepCopy"));
    let wrapper = content(&out, ArtifactId::Wrapper("geom".into()));
    assert!(wrapper.contains("#[repr(C)]\npub struct Size {\n"));
    assert!(!wrapper.contains("impl Clone for Size"));
}

#[test]
fn opaque_handle_with_destructor() {
    let out = run(&schema());
    let native = content(&out, ArtifactId::NativeExport);
    assert!(native.contains("pub extern \"C\" fn AzApp_delete(object: &mut AzApp) {\n    unsafe { core::ptr::drop_in_place(object) }\n}\n"));
    assert!(native.contains("pub extern \"C\" fn AzApp_shallowCopy(object: &AzApp) -> AzApp {"));
    assert!(!native.contains("AzApp_deepCopy"));

    let wrapper = content(&out, ArtifactId::Wrapper("app".into()));
    assert!(wrapper.contains("impl Drop for App {"));
    assert!(!wrapper.contains("impl Clone for App"));
    assert!(wrapper.contains("impl Clone for Window {"));
}

#[test]
fn tagged_union_on_header_targets() {
    let out = run(&schema());
    let c = content(&out, ArtifactId::HeaderC);
    assert!(c.contains("} AzOptionU32_Tag;\n"));
    assert!(c.contains("struct AzOptionU32Variant_None { uint8_t tag; };\n"));
    assert!(c.contains("struct AzOptionU32Variant_Some { uint8_t tag; uint32_t payload; };\n"));
    assert!(c.contains("union AzOptionU32 {\n"));
    for accessor in ["matchRefNone", "matchMutNone", "matchRefSome", "matchMutSome"] {
        assert_eq!(c.matches(&format!("AzOptionU32_{}(", accessor)).count(), 1, "{}", accessor);
    }

    let cpp = content(&out, ArtifactId::HeaderCpp);
    assert!(cpp.contains("enum class OptionU32Tag : uint8_t { None, Some };\n"));
    assert!(cpp.contains("union OptionU32 {\n"));
}

#[test]
fn recursive_container_placement() {
    let out = run(&schema());
    let c = content(&out, ArtifactId::HeaderC);
    let forward = position(c, "struct AzDom;\n");
    let container = position(c, "struct AzDomVec {");
    let element = position(c, "struct AzDom {");
    assert!(forward < container && container < element);

    let cpp = content(&out, ArtifactId::HeaderCpp);
    assert!(position(cpp, "struct Dom;\n") < position(cpp, "struct DomVec {"));
    assert!(position(cpp, "struct DomVec {") < position(cpp, "struct Dom {"));

    let wrapper = content(&out, ArtifactId::Wrapper("dom".into()));
    assert!(position(wrapper, "pub struct Dom {") < position(wrapper, "pub struct DomVec {"));
}

#[test]
fn container_follows_element_whatever_the_schema_order() {
    let mut schema = schema();
    for version in schema.versions.values_mut() {
        if let Some(dom) = version.modules.get_mut("dom") {
            if let Some(element) = dom.classes.shift_remove("Dom") {
                dom.classes.insert("Dom".into(), element);
            }
            assert_eq!(dom.classes.get_index(0).map(|(name, _)| name.as_str()), Some("DomVec"));
        }
    }
    let out = run(&schema);

    let wrapper = content(&out, ArtifactId::Wrapper("dom".into()));
    assert!(position(wrapper, "pub struct Dom {") < position(wrapper, "pub struct DomVec {"));
    let native = content(&out, ArtifactId::NativeExport);
    assert!(position(native, "pub struct AzDom {") < position(native, "pub struct AzDomVec {"));
    let python = content(&out, ArtifactId::ExtensionModule);
    assert!(position(python, "pub struct PyDom {") < position(python, "pub struct PyDomVec {"));

    let c = content(&out, ArtifactId::HeaderC);
    assert!(position(c, "struct AzDom;\n") < position(c, "struct AzDomVec {"));
    assert!(position(c, "struct AzDomVec {") < position(c, "struct AzDom {"));
}

#[test]
fn extension_module_defines_every_helper_it_calls() {
    let out = run(&schema());
    let python = content(&out, ArtifactId::ExtensionModule);

    assert!(python.contains("moved(\"App\")"));
    assert_eq!(python.matches("\nfn moved(name: &str) -> PyErr {").count(), 1);
    assert!(position(python, "fn moved(") < position(python, "pub struct PyApp {"));
    assert!(python.contains("        self.inner.take().ok_or_else(|| moved(\"Window\"))\n"));
    assert!(python.contains("PyRuntimeError::new_err("));

    // Holders for opaque classes define the accessors their methods go through.
    for holder in ["PyApp", "PyWindow"] {
        let start = position(python, &format!("impl {} {{\n    fn handle(", holder));
        assert!(python[start..].contains("    fn take(&mut self)"), "{}", holder);
    }
}

#[test]
fn extension_module_matches_tagged_unions() {
    let out = run(&schema());
    let python = content(&out, ArtifactId::ExtensionModule);
    let start = position(python, "impl PyOptionU32 {");
    let methods = &python[start..];
    assert!(methods.contains("    #[pyo3(name = \"match\")]\n    fn match_(&self, py: Python<'_>) -> PyResult<(&'static str, PyObject)> {"));
    assert!(methods.contains("azul::geom::OptionU32::None => (\"None\", py.None()),"));
    assert!(methods.contains("azul::geom::OptionU32::Some(value) => (\"Some\", (*value).into_py(py)),"));
    assert!(methods.contains("    #[getter]\n    fn tag(&self) -> &'static str {"));
    // Plain enums are mirrored, not matched.
    assert!(!python[position(python, "pub enum PyAlign {")..start].contains("fn match_("));
}

#[test]
fn by_move_argument_invalidates_the_handle() {
    let out = run(&schema());
    let native = content(&out, ArtifactId::NativeExport);
    assert!(native.contains("pub extern \"C\" fn AzApp_run(app: AzApp, window: AzWindow) {\n    app.run(window)\n}\n"));

    let wrapper = content(&out, ArtifactId::Wrapper("app".into()));
    assert!(wrapper.contains("    pub fn run(self, window: Window) {\n        unsafe { AzApp_run(self.leak(), window.leak()) }\n    }\n"));
    assert!(wrapper.contains("        core::mem::forget(self);\n"));

    let cpp = content(&out, ArtifactId::HeaderCpp);
    assert!(cpp.contains("std::move(window).release()"));

    let python = content(&out, ArtifactId::ExtensionModule);
    assert!(python.contains("self.take()?.run(window.take()?);"));
}

#[test]
fn layout_assertions_cover_backed_classes() {
    let out = run(&schema());
    let native = content(&out, ArtifactId::NativeExport);
    for name in ["AzPoint", "AzAlign", "AzOptionU32", "AzApp", "AzWindow"] {
        assert!(
            native.contains(&format!("core::mem::size_of::<{0}>() == core::mem::size_of::<super::{0}>()", name)),
            "{}",
            name
        );
    }
    assert!(!native.contains("size_of::<AzSize>()"));
    assert!(native.contains("assert_eq!(super::super::AzAlign::End as isize, 2);"));
}

#[test]
fn regeneration_is_byte_identical() {
    let first = run(&schema());
    let second = run(&schema());
    assert_eq!(first, second);
}

/// Every value dependency precedes its user; pointer dependencies do too
/// unless forward-declared.
fn assert_header_order(model: &Model) {
    let order = model.declaration_order(Target::C);
    let at = |id: ClassId| order.iter().position(|o| *o == id);
    for (i, &id) in order.iter().enumerate() {
        let class = model.class(id);
        let mut types: Vec<&TyExpr> = class.fields().iter().map(|f| &f.ty).collect();
        types.extend(class.variants().iter().filter_map(|v| v.payload.as_ref()));
        for ty in types {
            let Some(dep) = ty.class() else { continue };
            let placed = at(dep).map_or(false, |p| p < i);
            if ty.is_indirect() {
                assert!(placed || model.is_forward_declared(dep), "{} before {}", class.name, model.class(dep).name);
            } else {
                assert!(placed, "{} uses {} before it is declared", class.name, model.class(dep).name);
            }
        }
    }
}

#[test]
fn permuted_modules_still_sort() {
    let base = schema();
    for rotation in 0..4 {
        let mut schema = base.clone();
        for version in schema.versions.values_mut() {
            for module in version.modules.values_mut() {
                let n = module.classes.len();
                for _ in 0..(rotation % n.max(1)) {
                    if let Some((name, class)) = module.classes.shift_remove_index(0) {
                        module.classes.insert(name, class);
                    }
                }
            }
            version.modules.reverse();
        }
        let model = Model::build(&schema, &GeneratorConfig::default()).unwrap();
        assert_header_order(&model);
        assert!(generate(&schema, &GeneratorConfig::default(), &PatchTable::new()).is_ok());
    }
}

#[test]
fn license_and_patches_reach_the_output() {
    let config = GeneratorConfig {
        license: vec!["Copyright (c) Example".into()],
        ..GeneratorConfig::default()
    };
    let mut patches = PatchTable::new();
    patches
        .insert(PatchKey::new(PatchScope::Header, Target::C), "#include <stdio.h>")
        .unwrap();
    patches
        .insert(
            PatchKey::new(
                PatchScope::Function {
                    module: "app".into(),
                    class: "App".into(),
                    function: "size".into(),
                },
                Target::Dll,
            ),
            "backing::app::default_size()",
        )
        .unwrap();
    let out = generate(&schema(), &config, &patches).unwrap();
    let c = content(&out, ArtifactId::HeaderC);
    assert!(c.starts_with("// Copyright (c) Example\n//\n// Auto-generated"));
    assert!(c.contains("#include <stdio.h>\n"));
    let native = content(&out, ArtifactId::NativeExport);
    assert!(native.contains("pub extern \"C\" fn AzApp_size(app: &AzApp) -> AzSize {\n    backing::app::default_size()\n}\n"));
}

#[test]
fn unresolved_type_fails_validation() {
    let schema = ApiSchema::from_json(
        r#"{ "1": { "m": { "classes": { "A": { "struct_fields": [ { "b": { "type": "Missing" } } ] } } } } }"#,
    )
    .unwrap();
    match generate(&schema, &GeneratorConfig::default(), &PatchTable::new()) {
        Err(BindgenError::Validation(report)) => assert!(report.has(ValidationErrorKind::UnresolvedType)),
        other => panic!("expected validation failure, got {:?}", other.map(|o| o.len())),
    }
}

#[test]
fn copy_on_an_opaque_class_is_a_conflict() {
    let schema = ApiSchema::from_json(
        r#"{ "1": { "m": { "classes": { "H": { "is_boxed_object": true, "derive": ["Clone", "Copy"] } } } } }"#,
    )
    .unwrap();
    match generate(&schema, &GeneratorConfig::default(), &PatchTable::new()) {
        Err(BindgenError::Validation(report)) => assert!(report.has(ValidationErrorKind::DeriveConflict)),
        other => panic!("expected derive conflict, got {:?}", other.map(|o| o.len())),
    }
}

#[test]
fn value_cycle_is_fatal() {
    let schema = ApiSchema::from_json(
        r#"{ "1": { "m": { "classes": {
            "A": { "struct_fields": [ { "b": { "type": "B" } } ] },
            "B": { "struct_fields": [ { "a": { "type": "A" } } ] }
        } } } }"#,
    )
    .unwrap();
    match generate(&schema, &GeneratorConfig::default(), &PatchTable::new()) {
        Err(BindgenError::CyclicDependency { remaining }) => {
            assert!(remaining.contains(&"A".to_string()) && remaining.contains(&"B".to_string()))
        }
        other => panic!("expected a cycle, got {:?}", other.map(|o| o.len())),
    }
}

#[test]
fn unbacked_function_without_body() {
    let schema = ApiSchema::from_json(
        r#"{ "1": { "m": { "classes": {
            "Plain": { "struct_fields": [ { "v": { "type": "u8" } } ],
                       "functions": { "get": { "fn_args": [ { "self": "ref" } ], "returns": { "type": "u8" } } } }
        } } } }"#,
    )
    .unwrap();
    match generate(&schema, &GeneratorConfig::default(), &PatchTable::new()) {
        Err(BindgenError::MissingFunctionBody { function }) => assert_eq!(function, "m.Plain.get"),
        other => panic!("expected missing body, got {:?}", other.map(|o| o.len())),
    }
}

#[test]
fn check_only_validates() {
    assert!(check(&schema(), &GeneratorConfig::default(), &PatchTable::new()).is_ok());
}
