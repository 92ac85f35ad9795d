//! Type-string analysis and the closed vocabularies shared by every layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Scalar / FFI-safe names that never resolve to a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    Bool,
    Char,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    I128,
    Isize,
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
    CVoid,
    Unit,
}

impl Primitive {
    pub const ALL: [Primitive; 18] = [
        Primitive::Bool,
        Primitive::Char,
        Primitive::F32,
        Primitive::F64,
        Primitive::I8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::I128,
        Primitive::Isize,
        Primitive::U8,
        Primitive::U16,
        Primitive::U32,
        Primitive::U64,
        Primitive::U128,
        Primitive::Usize,
        Primitive::CVoid,
        Primitive::Unit,
    ];

    /// Look up a primitive by its schema spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.rust_name() == name)
    }

    /// Spelling in Rust source (and in the schema).
    pub fn rust_name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::I128 => "i128",
            Primitive::Isize => "isize",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::U128 => "u128",
            Primitive::Usize => "usize",
            Primitive::CVoid => "c_void",
            Primitive::Unit => "()",
        }
    }

    /// Spelling in C and C++ headers.
    pub fn c_name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Char => "uint32_t",
            Primitive::F32 => "float",
            Primitive::F64 => "double",
            Primitive::I8 => "int8_t",
            Primitive::I16 => "int16_t",
            Primitive::I32 => "int32_t",
            Primitive::I64 => "int64_t",
            Primitive::I128 => "__int128",
            Primitive::Isize => "intptr_t",
            Primitive::U8 => "uint8_t",
            Primitive::U16 => "uint16_t",
            Primitive::U32 => "uint32_t",
            Primitive::U64 => "uint64_t",
            Primitive::U128 => "unsigned __int128",
            Primitive::Usize => "size_t",
            Primitive::CVoid | Primitive::Unit => "void",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// `c_void` and `()` only make sense behind a pointer or as a return type.
    pub fn is_sized_value(self) -> bool {
        !matches!(self, Primitive::CVoid | Primitive::Unit)
    }

    /// Capabilities the primitive itself implements.
    pub fn capabilities(self) -> CapabilitySet {
        let mut caps = CapabilitySet::all();
        if self.is_float() {
            caps.remove(Capability::Eq);
            caps.remove(Capability::Ord);
            caps.remove(Capability::Hash);
        }
        caps
    }
}

/// Ownership qualifier in front of a type reference.
///
/// The serde spelling doubles as the callback-argument passing convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    #[default]
    Value,
    Ref,
    RefMut,
    ConstPtr,
    MutPtr,
}

impl Ownership {
    pub fn is_indirect(self) -> bool {
        self != Ownership::Value
    }

    pub fn is_pointer(self) -> bool {
        matches!(self, Ownership::ConstPtr | Ownership::MutPtr)
    }
}

/// Result of [`analyze`]: ownership qualifier, base name and array length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedType {
    pub ownership: Ownership,
    pub base: String,
    pub array_len: Option<usize>,
}

const PREFIXES: [(&str, Ownership); 4] = [
    ("&mut ", Ownership::RefMut),
    ("*const ", Ownership::ConstPtr),
    ("*mut ", Ownership::MutPtr),
    ("&", Ownership::Ref),
];

/// Split a raw schema type string such as `*const [u8; 4]` into its parts.
///
/// Exactly one prefix layer is recognized. Anything else is left in the
/// base name untouched; [`is_identifier`] is how callers reject it.
pub fn analyze(type_str: &str) -> AnalyzedType {
    let trimmed = type_str.trim();
    let (ownership, rest) = PREFIXES
        .iter()
        .find_map(|(prefix, own)| trimmed.strip_prefix(*prefix).map(|rest| (*own, rest.trim_start())))
        .unwrap_or((Ownership::Value, trimmed));

    let (base, array_len) = split_array(rest);
    AnalyzedType {
        ownership,
        base: base.to_string(),
        array_len,
    }
}

fn split_array(s: &str) -> (&str, Option<usize>) {
    let inner = match s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        Some(inner) => inner,
        None => return (s, None),
    };
    match inner.rsplit_once(';') {
        Some((elem, len)) => match len.trim().parse::<usize>() {
            Ok(len) => (elem.trim(), Some(len)),
            Err(_) => (s, None),
        },
        None => (s, None),
    }
}

/// True for names that can name a class or primitive: `[A-Za-z_][A-Za-z0-9_]*`, or `()`.
pub fn is_identifier(name: &str) -> bool {
    if name == "()" {
        return true;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A derivable structural capability.
///
/// Declaration order is the order derives are printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Debug,
    Clone,
    Copy,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Hash,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Debug,
        Capability::Clone,
        Capability::Copy,
        Capability::PartialEq,
        Capability::PartialOrd,
        Capability::Eq,
        Capability::Ord,
        Capability::Hash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Debug => "Debug",
            Capability::Clone => "Clone",
            Capability::Copy => "Copy",
            Capability::PartialEq => "PartialEq",
            Capability::PartialOrd => "PartialOrd",
            Capability::Eq => "Eq",
            Capability::Ord => "Ord",
            Capability::Hash => "Hash",
        }
    }

    /// Capabilities that must also be present for this one to be derivable.
    pub fn requires(self) -> &'static [Capability] {
        match self {
            Capability::Copy => &[Capability::Clone],
            Capability::PartialOrd => &[Capability::PartialEq],
            Capability::Eq => &[Capability::PartialEq],
            Capability::Ord => &[Capability::Eq, Capability::PartialOrd],
            _ => &[],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of capabilities, serialized as a list of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Capability::ALL.iter().copied().collect()
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0.insert(cap);
    }

    pub fn remove(&mut self, cap: Capability) {
        self.0.remove(&cap);
    }

    pub fn retain(&mut self, f: impl FnMut(&Capability) -> bool) {
        self.0.retain(f);
    }

    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        self.0.intersection(&other.0).copied().collect()
    }

    pub fn difference(&self, other: &CapabilitySet) -> CapabilitySet {
        self.0.difference(&other.0).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Drop every capability whose prerequisites are missing, until stable.
    pub fn close_over_requirements(&mut self) {
        loop {
            let missing: Vec<Capability> = self
                .iter()
                .filter(|c| c.requires().iter().any(|r| !self.contains(*r)))
                .collect();
            if missing.is_empty() {
                break;
            }
            for cap in missing {
                self.remove(cap);
            }
        }
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Output target. Serde names match the `use_patches` spelling in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Native export layer (`extern "C"` functions over the backing implementation).
    Dll,
    /// Ergonomic safe Rust wrapper.
    Rust,
    /// C header.
    C,
    /// C++ header.
    Cpp,
    /// Python extension module.
    Python,
}

impl Target {
    pub const ALL: [Target; 5] = [Target::Dll, Target::Rust, Target::C, Target::Cpp, Target::Python];

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Dll => "dll",
            Target::Rust => "rust",
            Target::C => "c",
            Target::Cpp => "cpp",
            Target::Python => "python",
        }
    }

    /// Header targets must see a type before any by-value use.
    pub fn requires_forward_declarations(self) -> bool {
        matches!(self, Target::C | Target::Cpp)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown target '{}'", s))
    }
}

/// Receiver convention of a method's implicit first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Receiver {
    Value,
    MutValue,
    Ref,
    RefMut,
}

impl Receiver {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "value" => Some(Receiver::Value),
            "mut value" => Some(Receiver::MutValue),
            "ref" => Some(Receiver::Ref),
            "refmut" => Some(Receiver::RefMut),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Receiver::Value => "value",
            Receiver::MutValue => "mut value",
            Receiver::Ref => "ref",
            Receiver::RefMut => "refmut",
        }
    }

    /// Whether the receiver is consumed by the call.
    pub fn is_move(self) -> bool {
        matches!(self, Receiver::Value | Receiver::MutValue)
    }
}
