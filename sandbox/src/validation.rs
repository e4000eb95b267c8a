//! Contract module compilation checks.
//!
//! A module is accepted when it compiles and meets the contract ABI:
//!
//! 1. `memory` is exported
//! 2. `main` is exported with the entry signature
//! 3. `query`, when exported, has the entry signature too
//! 4. Every import is a function from the `ledger` module named in the
//!    host-API catalog, with the host call signature, or a function
//!    exported by a registered library under the library's name
//!
//! Anything else, WASI included, is rejected as a `SyntaxError`.
//!
//! Libraries are self-contained modules: they import nothing, so library
//! code never reaches contract memory or the host API.

use wasmtime::{ExternType, FuncType, Module, ValType};

use ledgerbox_primitives::types::{MAIN_ENTRY, QUERY_ENTRY};
use ledgerbox_primitives::ContractError;

use crate::host_impl;
use crate::linker::HOST_MODULE;

/// Entry points and host calls share one shape:
/// `(ptr, len, out_ptr_ptr, out_len_ptr) -> status`.
const ABI_PARAMS: usize = 4;

fn has_abi_shape(ty: &FuncType) -> bool {
    let params: Vec<ValType> = ty.params().collect();
    let results: Vec<ValType> = ty.results().collect();
    params.len() == ABI_PARAMS
        && params.iter().all(|p| matches!(p, ValType::I32))
        && results.len() == 1
        && matches!(results[0], ValType::I32)
}

/// Check a compiled module against the contract ABI. `library` resolves a
/// registered library name to its module.
pub fn validate_module(
    module: &Module,
    library: impl Fn(&str) -> Option<Module>,
) -> Result<(), ContractError> {
    validate_exports(module)?;
    validate_imports(module, library)?;
    Ok(())
}

/// Names a library may not be registered under.
pub fn validate_library_name(name: &str) -> Result<(), ContractError> {
    if name.is_empty() || name == HOST_MODULE || name.starts_with("wasi") {
        return Err(ContractError::invalid_argument(format!(
            "'{}' cannot name a library",
            name
        )));
    }
    Ok(())
}

/// Check a compiled library module.
pub fn validate_library(module: &Module) -> Result<(), ContractError> {
    if let Some(import) = module.imports().next() {
        return Err(ContractError::syntax(
            format!(
                "library may not import anything, found {}::{}",
                import.module(),
                import.name()
            ),
            None,
        ));
    }
    if module.exports().next().is_none() {
        return Err(ContractError::syntax("library exports nothing", None));
    }
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), ContractError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(ContractError::syntax("module must export 'memory'", None));
    }

    for (name, required) in [(MAIN_ENTRY, true), (QUERY_ENTRY, false)] {
        let export = match module.exports().find(|e| e.name() == name) {
            Some(export) => export,
            None if required => {
                return Err(ContractError::syntax(
                    format!("missing required export '{}'", name),
                    None,
                ))
            }
            None => continue,
        };
        match export.ty() {
            ExternType::Func(ty) if has_abi_shape(&ty) => {}
            _ => {
                return Err(ContractError::syntax(
                    format!("export '{}' must be a function (i32, i32, i32, i32) -> i32", name),
                    None,
                ))
            }
        }
    }
    Ok(())
}

fn validate_imports(
    module: &Module,
    library: impl Fn(&str) -> Option<Module>,
) -> Result<(), ContractError> {
    for import in module.imports() {
        let module_name = import.module();
        let qualified = format!("{}::{}", module_name, import.name());

        if module_name.starts_with("wasi") {
            return Err(ContractError::syntax(
                format!("WASI import not allowed: {}", qualified),
                None,
            ));
        }
        if module_name != HOST_MODULE {
            let Some(lib) = library(module_name) else {
                return Err(ContractError::syntax(
                    format!(
                        "import from unknown module '{}' (only '{}' or a registered library): {}",
                        module_name, HOST_MODULE, qualified
                    ),
                    None,
                ));
            };
            check_library_import(import.ty(), &lib, import.name(), &qualified)?;
            continue;
        }
        if host_impl::find(import.name()).is_none() {
            return Err(ContractError::syntax(
                format!("unknown host function: {}", qualified),
                None,
            ));
        }
        match import.ty() {
            ExternType::Func(ty) if has_abi_shape(&ty) => {}
            ExternType::Func(_) => {
                return Err(ContractError::syntax(
                    format!("host function {} imported with the wrong signature", qualified),
                    None,
                ))
            }
            _ => {
                return Err(ContractError::syntax(
                    format!("non-function import not allowed: {}", qualified),
                    None,
                ))
            }
        }
    }
    Ok(())
}

fn check_library_import(
    wanted: ExternType,
    library: &Module,
    name: &str,
    qualified: &str,
) -> Result<(), ContractError> {
    let ExternType::Func(wanted) = wanted else {
        return Err(ContractError::syntax(
            format!("only functions can be imported from a library: {}", qualified),
            None,
        ));
    };
    match library.get_export(name) {
        Some(ExternType::Func(offered)) if offered.matches(&wanted) => Ok(()),
        Some(_) => Err(ContractError::syntax(
            format!("{} does not match the library export", qualified),
            None,
        )),
        None => Err(ContractError::syntax(
            format!("library does not export {}", qualified),
            None,
        )),
    }
}

/// Turn a compile failure into a `SyntaxError`, keeping the position the
/// compiler reported: `line:col` for text, the byte offset for binaries.
pub fn syntax_error(err: &anyhow::Error) -> ContractError {
    let full = format!("{:#}", err);
    let message = full.lines().next().unwrap_or("invalid module").trim().to_string();
    ContractError::syntax(message, error_location(&full))
}

fn error_location(text: &str) -> Option<String> {
    if let Some(idx) = text.find("-->") {
        // "--> <anon>:3:7"
        let spot = text[idx + 3..].split_whitespace().next()?;
        let mut parts = spot.rsplitn(3, ':');
        let col = parts.next()?;
        let line = parts.next()?;
        if line.parse::<u32>().is_ok() && col.parse::<u32>().is_ok() {
            return Some(format!("{}:{}", line, col));
        }
    }
    if let Some(idx) = text.find("at offset 0x") {
        let digits: String = text[idx + "at offset 0x".len()..]
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .collect();
        if let Ok(offset) = usize::from_str_radix(&digits, 16) {
            return Some(format!("offset {}", offset));
        }
    }
    None
}
