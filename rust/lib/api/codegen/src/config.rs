//! `apigen.toml`: generator settings plus patch entries.
//!
//! ```toml
//! prefix = "Az"
//! library_name = "azul"
//! text_class = "String"
//!
//! [[patch]]
//! target = "dll"
//! module = "app"
//! class = "App"
//! file = "patches/app.rs"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use apigen_codegen_lib::GeneratorConfig;
use apigen_ir::{PatchKey, PatchScope, PatchTable, Target};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub generator: GeneratorConfig,

    #[serde(default, rename = "patch")]
    pub patches: Vec<PatchEntry>,
}

/// One `[[patch]]` table. Scope follows from which names are set.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchEntry {
    pub target: Target,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    /// Patch source, relative to the config file.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Inline patch source.
    #[serde(default)]
    pub body: Option<String>,
}

impl PatchEntry {
    fn scope(&self) -> anyhow::Result<PatchScope> {
        let scope = match (&self.module, &self.class, &self.function) {
            (None, None, None) => PatchScope::Header,
            (Some(module), None, None) => PatchScope::Module { module: module.clone() },
            (Some(module), Some(class), None) => PatchScope::Class {
                module: module.clone(),
                class: class.clone(),
            },
            (Some(module), Some(class), Some(function)) => PatchScope::Function {
                module: module.clone(),
                class: class.clone(),
                function: function.clone(),
            },
            _ => bail!("patch for {} needs module before class and class before function", self.target),
        };
        Ok(scope)
    }

    fn source(&self, base: &Path) -> anyhow::Result<String> {
        match (&self.file, &self.body) {
            (Some(file), None) => {
                let path = base.join(file);
                std::fs::read_to_string(&path).with_context(|| format!("failed to read patch {}", path.display()))
            }
            (None, Some(body)) => Ok(body.clone()),
            _ => bail!("patch for {} needs exactly one of `file` or `body`", self.target),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        let config: CliConfig =
            toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Build the patch table; `base` is the directory of the config file.
    pub fn patch_table(&self, base: &Path) -> anyhow::Result<PatchTable> {
        let mut table = PatchTable::new();
        for entry in &self.patches {
            let key = PatchKey::new(entry.scope()?, entry.target);
            table.insert(key, entry.source(base)?)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_settings_and_patches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("patches")).unwrap();
        std::fs::write(dir.path().join("patches/app.rs"), "impl AzApp { pub fn ok(&self) -> bool { true } }").unwrap();
        let path = dir.path().join("apigen.toml");
        std::fs::write(
            &path,
            r##"
            prefix = "Gx"
            library_name = "gx"

            [[patch]]
            target = "dll"
            module = "app"
            class = "App"
            file = "patches/app.rs"

            [[patch]]
            target = "c"
            body = "#include <stdio.h>"
            "##,
        )
        .unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.generator.prefix, "Gx");
        assert_eq!(config.generator.ptr_suffix, "Ptr");

        let table = config.patch_table(dir.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.header(Target::C), Some("#include <stdio.h>"));
        assert!(table.class("app", "App", Target::Dll).unwrap().contains("pub fn ok"));
    }

    #[test]
    fn rejects_incomplete_patch_entries() {
        let config: CliConfig = toml::from_str(
            r#"
            [[patch]]
            target = "rust"
            class = "App"
            body = "{}"
            "#,
        )
        .unwrap();
        assert!(config.patch_table(Path::new(".")).is_err());

        let config: CliConfig = toml::from_str(
            r#"
            [[patch]]
            target = "rust"
            "#,
        )
        .unwrap();
        assert!(config.patch_table(Path::new(".")).is_err());
    }

    #[test]
    fn unbalanced_patch_body_is_rejected() {
        let config: CliConfig = toml::from_str(
            r#"
            [[patch]]
            target = "cpp"
            body = "struct X {"
            "#,
        )
        .unwrap();
        assert!(config.patch_table(Path::new(".")).is_err());
    }
}
