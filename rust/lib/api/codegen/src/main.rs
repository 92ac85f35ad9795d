//! `apigen`: generate native bindings from a JSON API schema.
//!
//! Usage:
//!   apigen --input api.json [--config apigen.toml] [--output dir] [--target c ...] [--check]

mod config;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use apigen_codegen_lib::OutputMap;
use apigen_ir::{ApiSchema, PatchTable, Target};
use clap::Parser;
use tracing::info;

use config::CliConfig;

/// apigen binding generator.
#[derive(Parser, Debug)]
#[command(name = "apigen", about = "Generate native bindings from an API schema")]
struct Cli {
    /// Input JSON schema.
    #[arg(short, long)]
    input: PathBuf,

    /// Generator config (apigen.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory.
    #[arg(short, long, default_value = "generated")]
    output: PathBuf,

    /// Targets to generate (dll, rust, c, cpp, python); all when omitted.
    #[arg(short, long = "target")]
    targets: Vec<Target>,

    /// Validate the schema and patches without writing anything.
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    info!("Reading schema from {}", cli.input.display());
    let input = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read schema {}", cli.input.display()))?;
    let schema = ApiSchema::from_json(&input).with_context(|| format!("failed to parse {}", cli.input.display()))?;

    let (config, patches) = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            let config = CliConfig::load(path)?;
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            let patches = config.patch_table(base)?;
            (config, patches)
        }
        None => (CliConfig::default(), PatchTable::new()),
    };
    info!("Loaded {} patches", patches.len());

    if cli.check {
        apigen_codegen_lib::check(&schema, &config.generator, &patches)?;
        info!("Schema is valid");
        return Ok(());
    }

    let targets = if cli.targets.is_empty() {
        Target::ALL.to_vec()
    } else {
        cli.targets.clone()
    };
    let output = apigen_codegen_lib::generate_targets(&schema, &config.generator, &patches, &targets)?;
    write_output(&output, &cli.output)?;
    info!("Done: {} files under {}", output.len(), cli.output.display());
    Ok(())
}

/// Write every generated file below `dir`, creating directories as needed.
fn write_output(output: &OutputMap, dir: &Path) -> anyhow::Result<()> {
    for file in output.values() {
        let path = dir.join(&file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &file.content).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote {} ({})", path.display(), file.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigen_codegen_lib::GeneratorConfig;

    #[test]
    fn cli_parses_repeated_targets() {
        let cli = Cli::parse_from(["apigen", "-i", "api.json", "--target", "c", "--target", "cpp", "--check"]);
        assert_eq!(cli.targets, vec![Target::C, Target::Cpp]);
        assert!(cli.check);
        assert_eq!(cli.output, PathBuf::from("generated"));
    }

    #[test]
    fn writes_the_output_tree() {
        let schema = ApiSchema::from_json(
            r#"{ "1": { "geom": { "classes": {
                "Size": { "struct_fields": [ { "w": { "type": "u32" } }, { "h": { "type": "u32" } } ] }
            } } } }"#,
        )
        .unwrap();
        let output =
            apigen_codegen_lib::generate(&schema, &GeneratorConfig::default(), &PatchTable::new()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        write_output(&output, dir.path()).unwrap();
        for rel in ["native/lib.rs", "wrapper/lib.rs", "wrapper/geom.rs", "c/azul.h", "cpp/azul.hpp", "python/azul.rs"] {
            assert!(dir.path().join(rel).is_file(), "{} missing", rel);
        }
        let header = std::fs::read_to_string(dir.path().join("c/azul.h")).unwrap();
        assert!(header.contains("struct AzSize {"));
    }
}
