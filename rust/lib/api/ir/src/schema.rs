//! Versioned API schema: modules, classes and their members.
//!
//! The JSON layout keeps every ordered collection as either an object
//! (class and function maps) or a list of single-entry objects (fields,
//! variants, arguments), so insertion order survives deserialization.

use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

use crate::types::{CapabilitySet, Ownership, Receiver, Target};

/// Complete schema: version string → API surface of that version.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ApiSchema {
    pub versions: IndexMap<String, ApiVersion>,
}

impl<'de> Deserialize<'de> for ApiSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        unique_map(deserializer).map(|versions| ApiSchema { versions })
    }
}

impl ApiSchema {
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// The most recently declared version.
    pub fn latest(&self) -> Option<(&str, &ApiVersion)> {
        self.versions.last().map(|(k, v)| (k.as_str(), v))
    }

    pub fn version(&self, name: &str) -> Option<&ApiVersion> {
        self.versions.get(name)
    }
}

/// Ordered set of modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ApiVersion {
    pub modules: IndexMap<String, ModuleDef>,
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        unique_map(deserializer).map(|modules| ApiVersion { modules })
    }
}

impl ApiVersion {
    pub fn module(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.get(name)
    }

    /// Every class as `(module, class, definition)`, in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = (&str, &str, &ClassDef)> {
        self.modules.iter().flat_map(|(module, def)| {
            def.classes
                .iter()
                .map(move |(class, cdef)| (module.as_str(), class.as_str(), cdef))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(default, deserialize_with = "unique_map")]
    pub classes: IndexMap<String, ClassDef>,
}

/// A class: one of struct, enum, callback typedef or constant, plus its
/// constructors and functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawClassDef", into = "RawClassDef")]
pub struct ClassDef {
    pub doc: Option<String>,
    /// Path of the hand-written backing implementation, if any.
    pub external: Option<String>,
    /// Heap-allocated behind a handle in the native layer.
    pub is_boxed_object: bool,
    pub custom_destructor: bool,
    /// Declared derivable capabilities.
    pub derive: CapabilitySet,
    /// Targets for which this class is supplied entirely by a patch.
    pub use_patches: Vec<Target>,
    pub constructors: IndexMap<String, FunctionDef>,
    pub functions: IndexMap<String, FunctionDef>,
    pub kind: ClassKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassKind {
    Struct(Vec<FieldDef>),
    Enum(Vec<VariantDef>),
    Callback(CallbackTypedefDef),
    Const(ConstDef),
}

impl ClassDef {
    pub fn is_backed(&self) -> bool {
        self.external.is_some()
    }

    pub fn fields(&self) -> &[FieldDef] {
        match &self.kind {
            ClassKind::Struct(fields) => fields,
            _ => &[],
        }
    }

    pub fn variants(&self) -> &[VariantDef] {
        match &self.kind {
            ClassKind::Enum(variants) => variants,
            _ => &[],
        }
    }

    /// Constructors followed by functions, tagged with which list they came from.
    pub fn all_functions(&self) -> impl Iterator<Item = (&str, &FunctionDef, bool)> {
        self.constructors
            .iter()
            .map(|(n, f)| (n.as_str(), f, true))
            .chain(self.functions.iter().map(|(n, f)| (n.as_str(), f, false)))
    }

    /// Every raw type string the class references, with a short label for error context.
    pub fn type_references(&self) -> Vec<(String, &str)> {
        let mut refs: Vec<(String, &str)> = Vec::new();
        match &self.kind {
            ClassKind::Struct(fields) => {
                for f in fields {
                    refs.push((format!("field {}", f.name), f.ty.as_str()));
                }
            }
            ClassKind::Enum(variants) => {
                for v in variants {
                    if let Some(ty) = &v.ty {
                        refs.push((format!("variant {}", v.name), ty.as_str()));
                    }
                }
            }
            ClassKind::Callback(cb) => {
                for (i, arg) in cb.fn_args.iter().enumerate() {
                    refs.push((format!("callback argument {}", i), arg.ty.as_str()));
                }
                if let Some(ret) = &cb.returns {
                    refs.push(("callback return".to_string(), ret.ty.as_str()));
                }
            }
            ClassKind::Const(c) => refs.push(("const".to_string(), c.ty.as_str())),
        }
        for (name, func, _) in self.all_functions() {
            for arg in func.params().iter().filter(|a| !a.is_receiver()) {
                refs.push((format!("{}({})", name, arg.name), arg.ty.as_str()));
            }
            if let Some(ret) = &func.returns {
                refs.push((format!("{} return", name), ret.ty.as_str()));
            }
        }
        refs
    }
}

/// Struct field, deserialized from `{ "name": { "type": "...", "doc": "..." } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, FieldBody>", into = "IndexMap<String, FieldBody>")]
pub struct FieldDef {
    pub name: String,
    pub ty: String,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBody {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// Enum variant; `ty` is `None` for unit variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, VariantBody>", into = "IndexMap<String, VariantBody>")]
pub struct VariantDef {
    pub name: String,
    pub ty: Option<String>,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantBody {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// A named argument; `{ "self": "ref" }` marks the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, String>", into = "IndexMap<String, String>")]
pub struct ArgDef {
    pub name: String,
    pub ty: String,
}

impl ArgDef {
    pub fn is_receiver(&self) -> bool {
        self.name == "self"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnDef {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(default)]
    pub fn_args: Vec<ArgDef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<ReturnDef>,

    /// Native-export body. Other targets take bodies from the patch table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fn_body: Option<String>,
}

impl FunctionDef {
    /// Receiver convention, if the first argument is `self` with a known convention.
    pub fn receiver(&self) -> Option<Receiver> {
        self.fn_args
            .first()
            .filter(|a| a.is_receiver())
            .and_then(|a| Receiver::parse(&a.ty))
    }

    /// Arguments after the receiver.
    pub fn params(&self) -> &[ArgDef] {
        match self.fn_args.first() {
            Some(first) if first.is_receiver() => &self.fn_args[1..],
            _ => &self.fn_args,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackTypedefDef {
    #[serde(default)]
    pub fn_args: Vec<CallbackArgDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<ReturnDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackArgDef {
    #[serde(rename = "type")]
    pub ty: String,
    /// Passing convention.
    #[serde(default, rename = "ref")]
    pub ownership: Ownership,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstDef {
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
}

// ============================================================================
// Wire forms
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClassDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    external: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_boxed_object: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    custom_destructor: bool,
    #[serde(default, skip_serializing_if = "CapabilitySet::is_empty")]
    derive: CapabilitySet,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    use_patches: Vec<Target>,
    #[serde(default, deserialize_with = "unique_map", skip_serializing_if = "IndexMap::is_empty")]
    constructors: IndexMap<String, FunctionDef>,
    #[serde(default, deserialize_with = "unique_map", skip_serializing_if = "IndexMap::is_empty")]
    functions: IndexMap<String, FunctionDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    struct_fields: Option<Vec<FieldDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enum_fields: Option<Vec<VariantDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_typedef: Option<CallbackTypedefDef>,
    #[serde(default, rename = "const", skip_serializing_if = "Option::is_none")]
    constant: Option<ConstDef>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TryFrom<RawClassDef> for ClassDef {
    type Error = String;

    fn try_from(raw: RawClassDef) -> Result<Self, Self::Error> {
        let bodies = [
            raw.struct_fields.is_some(),
            raw.enum_fields.is_some(),
            raw.callback_typedef.is_some(),
            raw.constant.is_some(),
        ];
        if bodies.iter().filter(|b| **b).count() > 1 {
            return Err(
                "class must declare at most one of struct_fields, enum_fields, callback_typedef, const"
                    .to_string(),
            );
        }
        let kind = if let Some(variants) = raw.enum_fields {
            ClassKind::Enum(variants)
        } else if let Some(cb) = raw.callback_typedef {
            ClassKind::Callback(cb)
        } else if let Some(c) = raw.constant {
            ClassKind::Const(c)
        } else {
            ClassKind::Struct(raw.struct_fields.unwrap_or_default())
        };
        Ok(ClassDef {
            doc: raw.doc,
            external: raw.external,
            is_boxed_object: raw.is_boxed_object,
            custom_destructor: raw.custom_destructor,
            derive: raw.derive,
            use_patches: raw.use_patches,
            constructors: raw.constructors,
            functions: raw.functions,
            kind,
        })
    }
}

impl From<ClassDef> for RawClassDef {
    fn from(def: ClassDef) -> Self {
        let mut raw = RawClassDef {
            doc: def.doc,
            external: def.external,
            is_boxed_object: def.is_boxed_object,
            custom_destructor: def.custom_destructor,
            derive: def.derive,
            use_patches: def.use_patches,
            constructors: def.constructors,
            functions: def.functions,
            ..Default::default()
        };
        match def.kind {
            ClassKind::Struct(fields) => raw.struct_fields = Some(fields),
            ClassKind::Enum(variants) => raw.enum_fields = Some(variants),
            ClassKind::Callback(cb) => raw.callback_typedef = Some(cb),
            ClassKind::Const(c) => raw.constant = Some(c),
        }
        raw
    }
}

fn single_entry<V>(map: IndexMap<String, V>, what: &str) -> Result<(String, V), String> {
    if map.len() != 1 {
        return Err(format!("{} must be an object with exactly one key, got {}", what, map.len()));
    }
    map.into_iter()
        .next()
        .ok_or_else(|| format!("{} is empty", what))
}

impl TryFrom<IndexMap<String, FieldBody>> for FieldDef {
    type Error = String;

    fn try_from(map: IndexMap<String, FieldBody>) -> Result<Self, Self::Error> {
        let (name, body) = single_entry(map, "struct field")?;
        Ok(FieldDef {
            name,
            ty: body.ty,
            doc: body.doc,
        })
    }
}

impl From<FieldDef> for IndexMap<String, FieldBody> {
    fn from(f: FieldDef) -> Self {
        let mut map = IndexMap::new();
        map.insert(f.name, FieldBody { ty: f.ty, doc: f.doc });
        map
    }
}

impl TryFrom<IndexMap<String, VariantBody>> for VariantDef {
    type Error = String;

    fn try_from(map: IndexMap<String, VariantBody>) -> Result<Self, Self::Error> {
        let (name, body) = single_entry(map, "enum variant")?;
        Ok(VariantDef {
            name,
            ty: body.ty,
            doc: body.doc,
        })
    }
}

impl From<VariantDef> for IndexMap<String, VariantBody> {
    fn from(v: VariantDef) -> Self {
        let mut map = IndexMap::new();
        map.insert(v.name, VariantBody { ty: v.ty, doc: v.doc });
        map
    }
}

impl TryFrom<IndexMap<String, String>> for ArgDef {
    type Error = String;

    fn try_from(map: IndexMap<String, String>) -> Result<Self, Self::Error> {
        let (name, ty) = single_entry(map, "function argument")?;
        Ok(ArgDef { name, ty })
    }
}

impl From<ArgDef> for IndexMap<String, String> {
    fn from(a: ArgDef) -> Self {
        let mut map = IndexMap::new();
        map.insert(a.name, a.ty);
        map
    }
}

/// Deserialize an ordered map, rejecting duplicate keys instead of keeping the last one.
fn unique_map<'de, D, V>(deserializer: D) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct UniqueMapVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueMapVisitor<V> {
        type Value = IndexMap<String, V>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map with unique keys")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                if map.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate key `{}`", key)));
                }
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueMapVisitor(PhantomData))
}
