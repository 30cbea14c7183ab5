//! WASM module validation: bridge ABI compatibility checks.
//!
//! Validates that a compiled WASM module meets the bridge ABI before it can
//! be instantiated. Checks:
//!
//! 1. `memory` and a function table are exported
//! 2. The allocator and exception exports are present with i32 signatures
//! 3. All imports are functions from the `bridge_host` module
//! 4. No WASI imports
//!
//! Typed wrapper exports are optional and resolved on first use.

use wasmtime::{ExternType, Module, ValType};

use crate::error::BridgeError;

/// Check if a ValType is i32.
fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Expected export: (name, param_count_of_i32, result_count_of_i32).
pub(crate) const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[
    ("bridge_malloc", 2, 1),
    ("bridge_realloc", 4, 1),
    ("bridge_free", 3, 0),
    ("bridge_exn_store", 1, 0),
];

/// Accepted names for the exported function table. `wasm-ld --export-table`
/// only knows the second one.
pub(crate) const TABLE_EXPORTS: &[&str] = &["bridge_fn_table", "__indirect_function_table"];

/// Allowed import module name.
pub const HOST_MODULE: &str = "bridge_host";

/// Validate that a WASM module meets the bridge ABI.
pub fn validate_module(module: &Module) -> Result<(), BridgeError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), BridgeError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(BridgeError::ValidationError(
            "module must export 'memory'".into(),
        ));
    }

    let has_table = module
        .exports()
        .any(|e| TABLE_EXPORTS.contains(&e.name()) && matches!(e.ty(), ExternType::Table(_)));
    if !has_table {
        return Err(BridgeError::ValidationError(format!(
            "module must export a function table as '{}'",
            TABLE_EXPORTS[0]
        )));
    }

    for &(name, expected_param_count, expected_result_count) in REQUIRED_EXPORTS {
        let export = module
            .exports()
            .find(|e| e.name() == name)
            .ok_or_else(|| {
                BridgeError::ValidationError(format!("missing required export: {}", name))
            })?;

        let func_ty = match export.ty() {
            ExternType::Func(ft) => ft,
            _ => {
                return Err(BridgeError::ValidationError(format!(
                    "export '{}' must be a function",
                    name
                )));
            }
        };

        let params: Vec<ValType> = func_ty.params().collect();
        let results: Vec<ValType> = func_ty.results().collect();

        if params.len() != expected_param_count || !params.iter().all(is_i32) {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' has wrong param signature: expected {} i32 params, got {} params",
                name,
                expected_param_count,
                params.len()
            )));
        }

        if results.len() != expected_result_count || !results.iter().all(is_i32) {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' has wrong result signature: expected {} i32 results, got {} results",
                name,
                expected_result_count,
                results.len()
            )));
        }
    }

    Ok(())
}

/// Check that all imports are functions from `bridge_host` and none are WASI.
fn validate_imports(module: &Module) -> Result<(), BridgeError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name.starts_with("wasi") {
            return Err(BridgeError::ValidationError(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if module_name != HOST_MODULE {
            return Err(BridgeError::ValidationError(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                HOST_MODULE,
                import.name()
            )));
        }

        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(BridgeError::ValidationError(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}
