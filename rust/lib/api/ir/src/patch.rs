//! Hand-written override bodies keyed by scope and target.

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

use crate::types::Target;

/// What a patch replaces or extends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatchScope {
    /// Emitted at the top of the artifact (`*` in the key).
    Header,
    /// Appended after the module's declarations.
    Module { module: String },
    /// Whole-class text: replaces a virtual class, or follows a normal one.
    Class { module: String, class: String },
    /// Replaces one function body.
    Function {
        module: String,
        class: String,
        function: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchKey {
    pub scope: PatchScope,
    pub target: Target,
}

impl PatchKey {
    pub fn new(scope: PatchScope, target: Target) -> Self {
        Self { scope, target }
    }
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            PatchScope::Header => write!(f, "{}:*", self.target),
            PatchScope::Module { module } => write!(f, "{}:{}", self.target, module),
            PatchScope::Class { module, class } => write!(f, "{}:{}.{}.*", self.target, module, class),
            PatchScope::Function {
                module,
                class,
                function,
            } => write!(f, "{}:{}.{}.{}", self.target, module, class, function),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("patch {key}: {reason}")]
pub struct PatchFormatError {
    pub key: String,
    pub reason: String,
}

/// Immutable after construction; every body was format-checked on insert.
#[derive(Debug, Clone, Default)]
pub struct PatchTable {
    entries: IndexMap<PatchKey, String>,
}

impl PatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a body after checking it is syntactically complete.
    pub fn insert(&mut self, key: PatchKey, body: impl Into<String>) -> Result<(), PatchFormatError> {
        let body = body.into();
        if let Err(reason) = check_body(&body) {
            return Err(PatchFormatError {
                key: key.to_string(),
                reason,
            });
        }
        if self.entries.contains_key(&key) {
            return Err(PatchFormatError {
                key: key.to_string(),
                reason: "defined more than once".into(),
            });
        }
        self.entries.insert(key, body);
        Ok(())
    }

    pub fn get(&self, key: &PatchKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn header(&self, target: Target) -> Option<&str> {
        self.get(&PatchKey::new(PatchScope::Header, target))
    }

    pub fn module(&self, module: &str, target: Target) -> Option<&str> {
        self.get(&PatchKey::new(
            PatchScope::Module {
                module: module.to_string(),
            },
            target,
        ))
    }

    pub fn class(&self, module: &str, class: &str, target: Target) -> Option<&str> {
        self.get(&PatchKey::new(
            PatchScope::Class {
                module: module.to_string(),
                class: class.to_string(),
            },
            target,
        ))
    }

    pub fn function(&self, module: &str, class: &str, function: &str, target: Target) -> Option<&str> {
        self.get(&PatchKey::new(
            PatchScope::Function {
                module: module.to_string(),
                class: class.to_string(),
                function: function.to_string(),
            },
            target,
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PatchKey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check that a body is non-empty, has balanced `()[]{}` and closes every
/// string, char literal and block comment. Comments and literals are skipped
/// while counting delimiters.
pub fn check_body(body: &str) -> Result<(), String> {
    if body.trim().is_empty() {
        return Err("body is empty".into());
    }

    let chars: Vec<char> = body.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => line += 1,
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                let start = line;
                let mut depth = 1;
                i += 2;
                while i < chars.len() && depth > 0 {
                    match (chars[i], chars.get(i + 1).copied()) {
                        ('/', Some('*')) => {
                            depth += 1;
                            i += 1;
                        }
                        ('*', Some('/')) => {
                            depth -= 1;
                            i += 1;
                        }
                        ('\n', _) => line += 1,
                        _ => {}
                    }
                    i += 1;
                }
                if depth > 0 {
                    return Err(format!("unterminated block comment starting on line {}", start));
                }
                continue;
            }
            '"' => {
                let start = line;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(format!("unterminated string starting on line {}", start)),
                        Some('\\') => i += 1,
                        Some('"') => break,
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '\'' => {
                // Char literal ('x', '\n', '\''); anything else is a lifetime.
                if next == Some('\\') {
                    let mut j = i + 3;
                    while j < chars.len() && chars[j] != '\'' && chars[j] != '\n' {
                        j += 1;
                    }
                    if chars.get(j) != Some(&'\'') {
                        return Err(format!("unterminated char literal on line {}", line));
                    }
                    i = j;
                } else if chars.get(i + 2) == Some(&'\'') {
                    i += 2;
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((o, _)) if o == open => {}
                    Some((o, l)) => {
                        return Err(format!(
                            "'{}' on line {} does not close '{}' opened on line {}",
                            c, line, o, l
                        ))
                    }
                    None => return Err(format!("unexpected '{}' on line {}", c, line)),
                }
            }
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        Some((o, l)) => Err(format!("'{}' opened on line {} is never closed", o, l)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PatchKey {
        PatchKey::new(
            PatchScope::Function {
                module: "app".into(),
                class: "App".into(),
                function: "new".into(),
            },
            Target::Rust,
        )
    }

    #[test]
    fn balanced_bodies_pass() {
        assert!(check_body("let x = vec![1, 2, 3]; x.len()").is_ok());
        assert!(check_body("fn f<'a>(s: &'a str) -> char { '}' }").is_ok());
        assert!(check_body("// closing } in a comment\nx").is_ok());
        assert!(check_body("/* nested /* ) */ */ foo()").is_ok());
        assert!(check_body(r#"println!("{}", "\" ) ");"#).is_ok());
        assert!(check_body("let nl = '\\n';").is_ok());
    }

    #[test]
    fn incomplete_bodies_fail() {
        assert!(check_body("   ").unwrap_err().contains("empty"));
        assert!(check_body("if x { y()").unwrap_err().contains("never closed"));
        assert!(check_body("foo(]").unwrap_err().contains("does not close"));
        assert!(check_body("a)").unwrap_err().contains("unexpected"));
        assert!(check_body("\"abc").unwrap_err().contains("unterminated string"));
        assert!(check_body("/* open").unwrap_err().contains("block comment"));
    }

    #[test]
    fn table_rejects_bad_and_duplicate_patches() {
        let mut table = PatchTable::new();
        let err = table.insert(key(), "Self { ").unwrap_err();
        assert_eq!(err.key, "rust:app.App.new");
        assert!(table.is_empty());

        table.insert(key(), "Self { inner: 1 }").unwrap();
        assert!(table.insert(key(), "Self { inner: 2 }").is_err());
        assert_eq!(table.function("app", "App", "new", Target::Rust), Some("Self { inner: 1 }"));
        assert_eq!(table.function("app", "App", "new", Target::Dll), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn scope_lookups() {
        let mut table = PatchTable::new();
        table.insert(PatchKey::new(PatchScope::Header, Target::C), "#include <math.h>").unwrap();
        table
            .insert(
                PatchKey::new(
                    PatchScope::Class {
                        module: "str".into(),
                        class: "String".into(),
                    },
                    Target::Rust,
                ),
                "impl String { pub fn as_str(&self) -> &str { \"\" } }",
            )
            .unwrap();
        assert_eq!(table.header(Target::C), Some("#include <math.h>"));
        assert!(table.class("str", "String", Target::Rust).is_some());
        assert!(table.module("str", Target::Rust).is_none());
    }
}
