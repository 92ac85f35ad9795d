//! Generator configuration.
//!
//! Built once before the pipeline runs and passed by reference to every
//! stage; nothing in the generator reads ambient state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Prefix of every exported type and function (`Az` → `AzApp_new`).
    pub prefix: String,

    /// Suffix marking opaque-handle types in the C header.
    pub ptr_suffix: String,

    /// Library name: header file names, C++ namespace, header guard.
    pub library_name: String,

    /// Name passed to `#[link(name = ...)]`; defaults to `library_name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_name: Option<String>,

    /// Crate name of the ergonomic wrapper, as seen by the extension module.
    pub wrapper_crate: String,

    /// Python module name registered by `#[pymodule]`.
    pub python_module: String,

    /// Class used for text at the Python boundary and by debug-format functions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_class: Option<String>,

    /// Schema version to generate; the last declared version when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// License text, one entry per line, emitted as a comment on every artifact.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub license: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            prefix: "Az".into(),
            ptr_suffix: "Ptr".into(),
            library_name: "azul".into(),
            link_name: None,
            wrapper_crate: "azul".into(),
            python_module: "azul".into(),
            text_class: None,
            version: None,
            license: Vec::new(),
        }
    }
}

impl GeneratorConfig {
    pub fn link_name(&self) -> &str {
        self.link_name.as_deref().unwrap_or(&self.library_name)
    }

    /// License lines rendered with a line-comment marker (`//`, `#`).
    pub fn license_comment(&self, marker: &str) -> String {
        let mut out = String::new();
        for line in &self.license {
            if line.is_empty() {
                out.push_str(&format!("{}\n", marker));
            } else {
                out.push_str(&format!("{} {}\n", marker, line));
            }
        }
        out
    }

    /// Exported symbol of a function: `AzApp_shallowCopy`.
    pub fn symbol(&self, class: &str, function: &str) -> String {
        format!("{}{}_{}", self.prefix, class, crate::naming::to_lower_camel_case(function))
    }
}
