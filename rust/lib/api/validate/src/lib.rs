//! apigen schema validator
//!
//! Consistency checks run over a whole API version before any code is
//! generated:
//! - class names must resolve to exactly one class
//! - every type string must be well formed and resolvable
//! - receivers must be the first argument of a function
//! - declared capabilities must be structurally possible (derive conflicts)
//! - virtual classes must have a class patch for every patched target
//! - patch bodies must be syntactically complete

use std::fmt;

use apigen_ir::*;

/// Which rule an error broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    DuplicateClass,
    UnresolvedType,
    MalformedType,
    DeriveConflict,
    PatchFormat,
    MissingPatch,
    ReceiverPosition,
    InvalidConst,
    InvalidCallback,
}

impl ValidationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationErrorKind::DuplicateClass => "duplicate-class",
            ValidationErrorKind::UnresolvedType => "unresolved-type",
            ValidationErrorKind::MalformedType => "malformed-type",
            ValidationErrorKind::DeriveConflict => "derive-conflict",
            ValidationErrorKind::PatchFormat => "patch-format",
            ValidationErrorKind::MissingPatch => "missing-patch",
            ValidationErrorKind::ReceiverPosition => "receiver",
            ValidationErrorKind::InvalidConst => "const",
            ValidationErrorKind::InvalidCallback => "callback",
        }
    }
}

/// A validation error with a descriptive message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    /// Which class (`module::Class`) or patch key the error is about.
    pub context: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.kind.as_str(), self.context, self.message)
    }
}

/// All errors found in one pass, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn has(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn of_kind(&self, kind: ValidationErrorKind) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// Validate an entire API version together with its patch table.
/// Returns all errors found (does not stop at first error).
pub fn validate_version(version: &ApiVersion, patches: &PatchTable) -> ValidationReport {
    let catalog = Catalog::new(version);
    let mut errors = Vec::new();

    // 1. Names must be unambiguous across modules.
    for (name, modules) in catalog.duplicates() {
        errors.push(ValidationError {
            kind: ValidationErrorKind::DuplicateClass,
            message: format!("class '{}' is defined in modules {}", name, modules.join(", ")),
            context: name.to_string(),
        });
    }

    for entry in catalog.entries() {
        let ctx = format!("{}::{}", entry.module, entry.name);

        // 2. Every type reference is well formed and resolves.
        for (label, ty) in entry.def.type_references() {
            errors.extend(check_type_reference(&catalog, &ctx, &label, ty));
        }

        // 3. Receivers.
        errors.extend(validate_receivers(entry.def, &ctx));

        // 4. Kind-specific rules.
        match &entry.def.kind {
            ClassKind::Const(c) => errors.extend(validate_const(c, &ctx)),
            ClassKind::Callback(cb) => errors.extend(validate_callback(cb, entry.def, &ctx)),
            ClassKind::Struct(_) | ClassKind::Enum(_) => {}
        }

        // 5. Declared capabilities.
        errors.extend(validate_derives(&catalog, entry, &ctx));

        // 6. Virtual classes need their class patch.
        for target in &entry.def.use_patches {
            if patches.class(entry.module, entry.name, *target).is_none() {
                errors.push(ValidationError {
                    kind: ValidationErrorKind::MissingPatch,
                    message: format!("class is virtual for target '{}' but has no class patch", target),
                    context: ctx.clone(),
                });
            }
        }
    }

    // 7. Patches point at real things and are complete.
    errors.extend(validate_patches(&catalog, patches));

    ValidationReport { errors }
}

fn check_type_reference(catalog: &Catalog<'_>, ctx: &str, label: &str, ty: &str) -> Option<ValidationError> {
    let analyzed = analyze(ty);
    if !is_identifier(&analyzed.base) {
        return Some(ValidationError {
            kind: ValidationErrorKind::MalformedType,
            message: format!("{}: cannot parse type '{}'", label, ty),
            context: ctx.to_string(),
        });
    }
    if Catalog::is_primitive(&analyzed.base) {
        return None;
    }
    match catalog.resolve(&analyzed.base) {
        Ok(id) => {
            if matches!(catalog.entry(id).def.kind, ClassKind::Const(_)) {
                Some(ValidationError {
                    kind: ValidationErrorKind::UnresolvedType,
                    message: format!("{}: '{}' is a constant, not a type", label, analyzed.base),
                    context: ctx.to_string(),
                })
            } else {
                None
            }
        }
        Err(e) => Some(ValidationError {
            kind: ValidationErrorKind::UnresolvedType,
            message: format!("{}: {}", label, e),
            context: ctx.to_string(),
        }),
    }
}

fn validate_receivers(def: &ClassDef, ctx: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (name, func, is_constructor) in def.all_functions() {
        for (i, arg) in func.fn_args.iter().enumerate() {
            if !arg.is_receiver() {
                continue;
            }
            let message = if is_constructor {
                Some(format!("constructor '{}' cannot take a receiver", name))
            } else if i > 0 {
                Some(format!("function '{}': receiver must be the first argument", name))
            } else if Receiver::parse(&arg.ty).is_none() {
                Some(format!(
                    "function '{}': unknown receiver convention '{}' (expected value, mut value, ref or refmut)",
                    name, arg.ty
                ))
            } else {
                None
            };
            if let Some(message) = message {
                errors.push(ValidationError {
                    kind: ValidationErrorKind::ReceiverPosition,
                    message,
                    context: ctx.to_string(),
                });
            }
        }
    }
    errors
}

fn validate_const(c: &ConstDef, ctx: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    match Primitive::from_name(c.ty.trim()) {
        Some(p) if p.is_sized_value() => {}
        _ => errors.push(ValidationError {
            kind: ValidationErrorKind::InvalidConst,
            message: format!("constant type must be a sized primitive, got '{}'", c.ty),
            context: ctx.to_string(),
        }),
    }
    if c.value.trim().is_empty() {
        errors.push(ValidationError {
            kind: ValidationErrorKind::InvalidConst,
            message: "constant has an empty value".into(),
            context: ctx.to_string(),
        });
    }
    errors
}

fn validate_callback(cb: &CallbackTypedefDef, def: &ClassDef, ctx: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (i, arg) in cb.fn_args.iter().enumerate() {
        // The passing convention lives in `ref`, not in the type string.
        if analyze(&arg.ty).ownership.is_indirect() {
            errors.push(ValidationError {
                kind: ValidationErrorKind::InvalidCallback,
                message: format!(
                    "argument {}: put the passing convention in \"ref\", not in the type '{}'",
                    i, arg.ty
                ),
                context: ctx.to_string(),
            });
        }
    }
    if !def.constructors.is_empty() || !def.functions.is_empty() {
        errors.push(ValidationError {
            kind: ValidationErrorKind::InvalidCallback,
            message: "callback typedefs cannot have constructors or functions".into(),
            context: ctx.to_string(),
        });
    }
    errors
}

/// By-value type references of a struct or enum, analyzed.
fn value_members(def: &ClassDef) -> Vec<(String, AnalyzedType)> {
    let mut out = Vec::new();
    match &def.kind {
        ClassKind::Struct(fields) => {
            for f in fields {
                out.push((format!("field '{}'", f.name), analyze(&f.ty)));
            }
        }
        ClassKind::Enum(variants) => {
            for v in variants {
                if let Some(ty) = &v.ty {
                    out.push((format!("variant '{}'", v.name), analyze(ty)));
                }
            }
        }
        _ => {}
    }
    out.retain(|(_, t)| t.ownership == Ownership::Value);
    out
}

fn validate_derives(catalog: &Catalog<'_>, entry: &ClassEntry<'_>, ctx: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let declared = &entry.def.derive;
    if declared.is_empty() {
        return errors;
    }
    let conflict = |message: String| ValidationError {
        kind: ValidationErrorKind::DeriveConflict,
        message,
        context: ctx.to_string(),
    };

    if matches!(entry.def.kind, ClassKind::Callback(_) | ClassKind::Const(_)) {
        errors.push(conflict("callback typedefs and constants cannot declare derives".into()));
        return errors;
    }

    for cap in declared.iter() {
        for req in cap.requires() {
            if !declared.contains(*req) {
                errors.push(conflict(format!("{} requires {} to be declared as well", cap, req)));
            }
        }
    }

    if declared.contains(Capability::Copy) && entry.needs_drop {
        let reason = match entry.representation {
            Representation::OpaqueHandle => "the class is an opaque handle",
            Representation::Inline if entry.def.custom_destructor => "the class has a custom destructor",
            Representation::Inline => "a field needs a destructor",
        };
        errors.push(conflict(format!("Copy is impossible: {}", reason)));
    }

    for (label, member) in value_members(entry.def) {
        if let Some(p) = Primitive::from_name(&member.base) {
            let supported = p.capabilities();
            for cap in declared.iter().filter(|c| !supported.contains(*c)) {
                errors.push(conflict(format!("{} is impossible: {} has type {}", cap, label, member.base)));
            }
            continue;
        }
        let field_class = match catalog.resolve(&member.base) {
            Ok(id) => catalog.entry(id),
            // Reported by the type-reference check.
            Err(_) => continue,
        };
        if matches!(field_class.def.kind, ClassKind::Callback(_)) {
            continue;
        }
        for cap in declared.iter().filter(|c| !field_class.def.derive.contains(*c)) {
            errors.push(conflict(format!(
                "{} is impossible: {} of type {} does not declare it",
                cap, label, field_class.name
            )));
        }
    }

    errors
}

fn validate_patches(catalog: &Catalog<'_>, patches: &PatchTable) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (key, body) in patches.iter() {
        let ctx = key.to_string();
        if let Err(reason) = check_body(body) {
            errors.push(ValidationError {
                kind: ValidationErrorKind::PatchFormat,
                message: reason,
                context: ctx.clone(),
            });
        }
        let missing = match &key.scope {
            PatchScope::Header => None,
            PatchScope::Module { module } => {
                let known = catalog.entries().iter().any(|e| e.module == module);
                (!known).then(|| format!("module '{}' does not exist", module))
            }
            PatchScope::Class { module, class } => catalog
                .find_in_module(module, class)
                .is_none()
                .then(|| format!("class '{}::{}' does not exist", module, class)),
            PatchScope::Function {
                module,
                class,
                function,
            } => match catalog.find_in_module(module, class) {
                None => Some(format!("class '{}::{}' does not exist", module, class)),
                Some(id) => {
                    let def = catalog.entry(id).def;
                    let known = def.constructors.contains_key(function) || def.functions.contains_key(function);
                    (!known).then(|| format!("function '{}::{}::{}' does not exist", module, class, function))
                }
            },
        };
        if let Some(message) = missing {
            errors.push(ValidationError {
                kind: ValidationErrorKind::UnresolvedType,
                message: format!("patch target: {}", message),
                context: ctx,
            });
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ApiVersion {
        let schema = ApiSchema::from_json(json).unwrap();
        schema.latest().unwrap().1.clone()
    }

    fn minimal_version() -> ApiVersion {
        parse(
            r#"{ "1": {
            "geom": { "classes": {
                "Point": {
                    "external": "backing::Point",
                    "derive": ["Debug", "Clone", "Copy", "PartialEq"],
                    "struct_fields": [ { "x": { "type": "f32" } }, { "y": { "type": "f32" } } ],
                    "functions": { "length": { "fn_args": [ { "self": "ref" } ], "returns": { "type": "f32" } } }
                },
                "Rect": {
                    "derive": ["Clone", "Copy"],
                    "struct_fields": [ { "origin": { "type": "Point" } }, { "corners": { "type": "[Point; 4]" } } ]
                }
            } }
        } }"#,
        )
    }

    #[test]
    fn valid_version_passes() {
        let errors = validate_version(&minimal_version(), &PatchTable::new());
        assert!(errors.is_empty(), "expected no errors, got: {}", errors);
    }

    #[test]
    fn unresolved_and_malformed_types() {
        let v = parse(
            r#"{ "1": { "m": { "classes": {
                "A": { "struct_fields": [ { "b": { "type": "Missing" } }, { "c": { "type": "Box<u8>" } } ] }
            } } } }"#,
        );
        let report = validate_version(&v, &PatchTable::new());
        assert!(report.has(ValidationErrorKind::UnresolvedType));
        assert!(report.has(ValidationErrorKind::MalformedType));
        let msg = report.of_kind(ValidationErrorKind::UnresolvedType).next().unwrap().to_string();
        assert!(msg.contains("Missing"), "got: {}", msg);
        assert!(msg.starts_with("[unresolved-type:m::A]"), "got: {}", msg);
    }

    #[test]
    fn duplicate_class_across_modules() {
        let v = parse(r#"{ "1": { "a": { "classes": { "X": {} } }, "b": { "classes": { "X": {} } } } }"#);
        let report = validate_version(&v, &PatchTable::new());
        assert!(report.has(ValidationErrorKind::DuplicateClass));
    }

    #[test]
    fn copy_on_opaque_field_is_a_conflict() {
        let v = parse(
            r#"{ "1": { "app": { "classes": {
                "App": { "external": "backing::App", "is_boxed_object": true },
                "Holder": { "derive": ["Clone", "Copy"], "struct_fields": [ { "app": { "type": "App" } } ] }
            } } } }"#,
        );
        let report = validate_version(&v, &PatchTable::new());
        let conflicts: Vec<String> = report
            .of_kind(ValidationErrorKind::DeriveConflict)
            .map(|e| e.to_string())
            .collect();
        assert!(conflicts.iter().any(|m| m.contains("Copy is impossible: a field needs a destructor")), "got: {:?}", conflicts);
        assert!(conflicts.iter().any(|m| m.contains("of type App does not declare it")), "got: {:?}", conflicts);
    }

    #[test]
    fn copy_with_custom_destructor_is_a_conflict() {
        let v = parse(
            r#"{ "1": { "m": { "classes": {
                "Buf": { "external": "backing::Buf", "custom_destructor": true, "derive": ["Clone", "Copy"] }
            } } } }"#,
        );
        let report = validate_version(&v, &PatchTable::new());
        assert_eq!(report.len(), 1, "got: {}", report);
        assert!(report.errors[0].message.contains("custom destructor"));
    }

    #[test]
    fn capability_must_propagate_from_fields() {
        let v = parse(
            r#"{ "1": { "m": { "classes": {
                "Inner": { "derive": ["Clone"], "struct_fields": [ { "v": { "type": "u32" } } ] },
                "Outer": { "derive": ["Clone", "Debug", "Hash"], "struct_fields": [
                    { "inner": { "type": "Inner" } },
                    { "weak": { "type": "*const Inner" } },
                    { "ratio": { "type": "f64" } }
                ] }
            } } } }"#,
        );
        let report = validate_version(&v, &PatchTable::new());
        let msgs: Vec<&str> = report.errors.iter().map(|e| e.message.as_str()).collect();
        assert!(msgs.iter().any(|m| m.starts_with("Debug is impossible: field 'inner'")), "got: {:?}", msgs);
        assert!(msgs.iter().any(|m| m.starts_with("Hash is impossible: field 'inner'")), "got: {:?}", msgs);
        assert!(msgs.iter().any(|m| m.starts_with("Hash is impossible: field 'ratio' has type f64")), "got: {:?}", msgs);
        // Pointer fields never restrict capabilities.
        assert!(!msgs.iter().any(|m| m.contains("'weak'")), "got: {:?}", msgs);
    }

    #[test]
    fn callback_fields_do_not_block_declared_capabilities() {
        let v = parse(
            r#"{ "1": { "m": { "classes": {
                "Cb": { "callback_typedef": { "fn_args": [ { "type": "u32" } ] } },
                "Holder": { "derive": ["Debug", "Clone", "Copy", "PartialEq"], "struct_fields": [ { "cb": { "type": "Cb" } } ] }
            } } } }"#,
        );
        let report = validate_version(&v, &PatchTable::new());
        assert!(report.is_empty(), "got: {}", report);
    }

    #[test]
    fn missing_requirement_is_a_conflict() {
        let v = parse(r#"{ "1": { "m": { "classes": { "E": { "derive": ["Ord"], "enum_fields": [ { "A": {} } ] } } } } }"#);
        let report = validate_version(&v, &PatchTable::new());
        assert!(report.errors.iter().any(|e| e.message == "Ord requires Eq to be declared as well"));
        assert!(report.errors.iter().any(|e| e.message == "Ord requires PartialOrd to be declared as well"));
    }

    #[test]
    fn receiver_rules() {
        let v = parse(
            r#"{ "1": { "m": { "classes": { "A": {
                "constructors": { "new": { "fn_args": [ { "self": "ref" } ] } },
                "functions": {
                    "late": { "fn_args": [ { "x": "u8" }, { "self": "ref" } ] },
                    "odd": { "fn_args": [ { "self": "borrowed" } ] }
                }
            } } } } }"#,
        );
        let report = validate_version(&v, &PatchTable::new());
        let msgs: Vec<&str> = report
            .of_kind(ValidationErrorKind::ReceiverPosition)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(msgs.len(), 3, "got: {:?}", msgs);
        assert!(msgs[0].contains("constructor 'new'"));
        assert!(msgs[1].contains("must be the first argument"));
        assert!(msgs[2].contains("unknown receiver convention 'borrowed'"));
    }

    #[test]
    fn virtual_class_needs_class_patch() {
        let v = parse(r#"{ "1": { "m": { "classes": { "Str": { "use_patches": ["rust", "c"] } } } } }"#);
        let mut patches = PatchTable::new();
        patches
            .insert(
                PatchKey::new(
                    PatchScope::Class {
                        module: "m".into(),
                        class: "Str".into(),
                    },
                    Target::Rust,
                ),
                "pub struct Str;",
            )
            .unwrap();
        let report = validate_version(&v, &patches);
        let missing: Vec<&ValidationError> = report.of_kind(ValidationErrorKind::MissingPatch).collect();
        assert_eq!(missing.len(), 1, "got: {}", report);
        assert!(missing[0].message.contains("'c'"));
    }

    #[test]
    fn patch_for_unknown_function() {
        let mut patches = PatchTable::new();
        patches
            .insert(
                PatchKey::new(
                    PatchScope::Function {
                        module: "geom".into(),
                        class: "Point".into(),
                        function: "area".into(),
                    },
                    Target::Dll,
                ),
                "0.0",
            )
            .unwrap();
        let report = validate_version(&minimal_version(), &patches);
        assert_eq!(report.len(), 1, "got: {}", report);
        assert!(report.errors[0].message.contains("geom::Point::area"));
        assert_eq!(report.errors[0].context, "dll:geom.Point.area");
    }

    #[test]
    fn const_and_callback_rules() {
        let v = parse(
            r#"{ "1": { "m": { "classes": {
                "Limit": { "const": { "type": "String", "value": "" } },
                "Cb": { "derive": ["Debug"], "callback_typedef": { "fn_args": [ { "type": "&u8" } ] } }
            } } } }"#,
        );
        let report = validate_version(&v, &PatchTable::new());
        assert_eq!(report.of_kind(ValidationErrorKind::InvalidConst).count(), 2, "got: {}", report);
        assert!(report.has(ValidationErrorKind::InvalidCallback));
        assert!(report.has(ValidationErrorKind::DeriveConflict));
    }
}
