//! ABI layout verifier.
//!
//! Emits the `layout` submodule of the native export layer: a mirror of
//! every hand-backed data class built from the schema fields, a pair of
//! compile-time size/alignment assertions against the backing type, and a
//! test comparing plain-enum discriminants.

use apigen_ir::{ClassId, Target};

use crate::backend::rust_type;
use crate::config::GeneratorConfig;
use crate::model::{Model, ResolvedClass, ResolvedKind};
use crate::naming::{escape_rust, to_snake_case};

/// Classes whose backing layout is checked.
pub fn mirrored_classes(model: &Model) -> Vec<&ResolvedClass> {
    model
        .classes()
        .iter()
        .filter(|c| c.is_data() && c.is_backed() && !c.is_virtual(Target::Dll))
        .collect()
}

pub fn layout_module(model: &Model, config: &GeneratorConfig) -> String {
    let mirrored = mirrored_classes(model);
    let mut output = String::new();

    output.push_str("/// Schema-side mirrors of every backed type, checked against the real layout.\n");
    output.push_str("#[allow(dead_code)]\n");
    output.push_str("pub mod layout {\n");
    output.push_str("    use core::ffi::c_void;\n");

    let backing = |id: ClassId| format!("super::{}{}", config.prefix, model.class(id).name);

    for class in &mirrored {
        let name = format!("{}{}", config.prefix, class.name);
        output.push('\n');
        match &class.kind {
            ResolvedKind::Struct(fields) => {
                output.push_str("    #[repr(C)]\n");
                output.push_str(&format!("    pub struct {} {{\n", name));
                for f in fields {
                    output.push_str(&format!(
                        "        pub {}: {},\n",
                        escape_rust(&f.name),
                        rust_type(&f.ty, &backing)
                    ));
                }
                output.push_str("    }\n");
            }
            ResolvedKind::Enum(variants) => {
                let repr = if class.is_tagged_union() { "u8" } else { "C" };
                output.push_str(&format!("    #[repr({})]\n", repr));
                output.push_str(&format!("    pub enum {} {{\n", name));
                for v in variants {
                    match &v.payload {
                        Some(ty) => output.push_str(&format!("        {}({}),\n", v.name, rust_type(ty, &backing))),
                        None => output.push_str(&format!("        {},\n", v.name)),
                    }
                }
                output.push_str("    }\n");
            }
            _ => {}
        }
        for (what, func) in [("size", "size_of"), ("alignment", "align_of")] {
            output.push_str(&format!(
                "    const _: () = assert!(\n        core::mem::{f}::<{n}>() == core::mem::{f}::<super::{n}>(),\n        \"{n}: {w} of the schema mirror differs from the backing type\"\n    );\n",
                f = func,
                n = name,
                w = what
            ));
        }
    }

    let plain_enums: Vec<&&ResolvedClass> = mirrored.iter().filter(|c| c.is_plain_enum()).collect();
    if !plain_enums.is_empty() {
        output.push_str("\n    #[cfg(test)]\n    mod tests {\n");
        for (i, class) in plain_enums.iter().enumerate() {
            if i > 0 {
                output.push('\n');
            }
            output.push_str("        #[test]\n");
            output.push_str(&format!(
                "        fn {}_discriminants() {{\n",
                to_snake_case(&class.name)
            ));
            for (n, v) in class.variants().iter().enumerate() {
                output.push_str(&format!(
                    "            assert_eq!(super::super::{}{}::{} as isize, {});\n",
                    config.prefix, class.name, v.name, n
                ));
            }
            output.push_str("        }\n");
        }
        output.push_str("    }\n");
    }

    output.push_str("}\n");
    output
}
