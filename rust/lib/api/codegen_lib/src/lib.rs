//! apigen code generation library.
//!
//! One resolved [`Model`] of a schema version is rendered by a printer per
//! target: the native export layer, the ergonomic Rust wrapper, a C header,
//! a C++ header and a Python extension module. The library performs no
//! file I/O; [`generate`] returns an [`OutputMap`] for the caller to write.

pub mod backend;
pub mod config;
pub mod decl;
pub mod error;
pub mod func_gen;
pub mod layout;
pub mod model;
pub mod naming;
pub mod sort;
pub mod struct_gen;

use std::fmt;

use apigen_ir::{ApiSchema, PatchTable, Target};
use indexmap::IndexMap;
use tracing::{debug, info};

pub use config::GeneratorConfig;
pub use decl::DeclTable;
pub use error::{BindgenError, Result};
pub use model::Model;

/// Everything a printer reads. Shared by reference, never mutated.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub model: &'a Model,
    pub decls: &'a DeclTable,
    pub config: &'a GeneratorConfig,
    pub patches: &'a PatchTable,
}

/// Codegen trait - implemented once per target
pub trait Codegen {
    fn generate(&self, ctx: &Context<'_>) -> Result<GeneratedCode>;
    fn target(&self) -> Target;
}

pub struct GeneratedCode {
    pub files: Vec<GeneratedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub id: ArtifactId,
    pub path: String,
    pub content: String,
}

/// Identity of one generated artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactId {
    NativeExport,
    WrapperRoot,
    /// One file of the wrapper, by module.
    Wrapper(String),
    HeaderC,
    HeaderCpp,
    ExtensionModule,
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactId::NativeExport => f.write_str("native-export"),
            ArtifactId::WrapperRoot => f.write_str("ergonomic-wrapper"),
            ArtifactId::Wrapper(module) => write!(f, "ergonomic-wrapper/{}", module),
            ArtifactId::HeaderC => f.write_str("header-style-A"),
            ArtifactId::HeaderCpp => f.write_str("header-style-B"),
            ArtifactId::ExtensionModule => f.write_str("extension-module"),
        }
    }
}

/// Generated files in emission order.
pub type OutputMap = IndexMap<ArtifactId, GeneratedFile>;

/// Every printer, in emission order.
pub fn generators() -> Vec<Box<dyn Codegen>> {
    vec![
        Box::new(backend::NativeExportGenerator),
        Box::new(backend::RustWrapperGenerator),
        Box::new(backend::CHeaderGenerator),
        Box::new(backend::CppHeaderGenerator),
        Box::new(backend::PythonModuleGenerator),
    ]
}

/// Generate every target.
pub fn generate(schema: &ApiSchema, config: &GeneratorConfig, patches: &PatchTable) -> Result<OutputMap> {
    generate_targets(schema, config, patches, &Target::ALL)
}

/// Validate the selected version, without generating anything.
pub fn check(schema: &ApiSchema, config: &GeneratorConfig, patches: &PatchTable) -> Result<()> {
    let (name, version) = model::select_version(schema, config)?;
    let report = apigen_validate::validate_version(version, patches);
    if !report.is_empty() {
        return Err(BindgenError::Validation(report));
    }
    debug!("Validate: version {} is clean", name);
    Ok(())
}

/// Generate the listed targets. Any failure aborts the run with no output.
pub fn generate_targets(
    schema: &ApiSchema,
    config: &GeneratorConfig,
    patches: &PatchTable,
    targets: &[Target],
) -> Result<OutputMap> {
    check(schema, config, patches)?;
    let (name, version) = model::select_version(schema, config)?;

    let model = Model::from_version(name, version, config)?;
    info!("Model: {} classes in {} modules", model.classes().len(), model.modules().len());

    let mut decls = DeclTable::default();
    struct_gen::emit_types(&model, &mut decls);
    func_gen::emit_functions(&model, config, patches, &mut decls)?;
    debug!(
        "Decl: {} types, {} functions",
        decls.types.len(),
        decls.all_functions().count()
    );

    let ctx = Context {
        model: &model,
        decls: &decls,
        config,
        patches,
    };

    let mut output = OutputMap::new();
    for generator in generators().into_iter().filter(|g| targets.contains(&g.target())) {
        let code = generator.generate(&ctx)?;
        for file in code.files {
            debug!("Emit: {} -> {}", file.id, file.path);
            output.insert(file.id.clone(), file);
        }
    }
    info!("Generate: {} artifacts for version {}", output.len(), name);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::SCHEMA;

    fn schema() -> ApiSchema {
        ApiSchema::from_json(SCHEMA).unwrap()
    }

    #[test]
    fn artifact_ids_display() {
        assert_eq!(ArtifactId::NativeExport.to_string(), "native-export");
        assert_eq!(ArtifactId::Wrapper("geom".into()).to_string(), "ergonomic-wrapper/geom");
        assert_eq!(ArtifactId::HeaderC.to_string(), "header-style-A");
        assert_eq!(ArtifactId::HeaderCpp.to_string(), "header-style-B");
    }

    #[test]
    fn all_targets_in_order() {
        let out = generate(&schema(), &GeneratorConfig::default(), &PatchTable::new()).unwrap();
        let ids: Vec<String> = out.keys().map(ToString::to_string).collect();
        assert_eq!(
            ids,
            vec![
                "native-export",
                "ergonomic-wrapper",
                "ergonomic-wrapper/geom",
                "ergonomic-wrapper/app",
                "header-style-A",
                "header-style-B",
                "extension-module",
            ]
        );
        assert_eq!(out[&ArtifactId::HeaderC].path, "c/azul.h");
        assert_eq!(out[&ArtifactId::ExtensionModule].path, "python/azul.rs");
    }

    #[test]
    fn target_filter() {
        let out = generate_targets(&schema(), &GeneratorConfig::default(), &PatchTable::new(), &[Target::C]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.contains_key(&ArtifactId::HeaderC));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let config = GeneratorConfig {
            version: Some("9.9".into()),
            ..GeneratorConfig::default()
        };
        match generate(&schema(), &config, &PatchTable::new()) {
            Err(BindgenError::UnknownVersion(v)) => assert_eq!(v, "9.9"),
            other => panic!("expected unknown version, got {:?}", other.map(|m| m.len())),
        }
    }
}
