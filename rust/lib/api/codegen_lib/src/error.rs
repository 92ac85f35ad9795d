use apigen_ir::{Capability, PatchFormatError, Target};
use apigen_validate::ValidationReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BindgenError {
    #[error("unresolved type '{reference}' in {context}: {reason}")]
    SchemaResolution {
        reference: String,
        context: String,
        reason: String,
    },

    #[error("cyclic dependency between: {}", .remaining.join(", "))]
    CyclicDependency { remaining: Vec<String> },

    #[error("derive conflict on {class}: {capability} {reason}")]
    DeriveConflict {
        class: String,
        capability: Capability,
        reason: String,
    },

    #[error(transparent)]
    PatchFormat(#[from] PatchFormatError),

    #[error("class {class} is virtual for target {target} but has no class patch")]
    MissingPatch { class: String, target: Target },

    #[error("no body for {function}: class has no backing implementation and no patch or fn_body")]
    MissingFunctionBody { function: String },

    #[error("schema has no version '{0}'")]
    UnknownVersion(String),

    #[error("schema validation failed with {n} error(s):\n{report}", n = .0.len(), report = .0)]
    Validation(ValidationReport),
}

pub type Result<T> = std::result::Result<T, BindgenError>;
