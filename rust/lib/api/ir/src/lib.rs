//! apigen schema IR
//!
//! Data structures shared between:
//! - validator (invariant checks over a whole version)
//! - codegen library (resolved model + per-target backends)
//! - codegen binary (schema loading, patch loading)
//!
//! Layers:
//! 1. Types: type-string analysis, primitives, capabilities, targets
//! 2. Schema: versions, modules, classes, functions (serde)
//! 3. Catalog: name index and representation queries over one version
//! 4. Patch: hand-written override bodies keyed by scope and target

pub mod types;
pub mod schema;
pub mod catalog;
pub mod patch;

pub use types::*;
pub use schema::*;
pub use catalog::*;
pub use patch::*;
