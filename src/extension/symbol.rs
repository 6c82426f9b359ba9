//! Symbol resolution
//!
//! Binds named exports of a loaded module to a caller-declared native
//! signature. Signatures are not discovered; a wrong declaration is
//! undefined behaviour at call time.

use thiserror::Error;
use tracing::debug;

use crate::extension::callback::OutputCallback;
use crate::extension::loader::LoadedModule;

/// Initializer: no arguments, no return value
pub type InitializerFn = unsafe extern "C" fn();

/// Export: `(args_ptr, args_len, output_callback) -> status`
pub type ExportFn =
    unsafe extern "C" fn(args: *const u8, args_len: u64, callback: OutputCallback) -> u32;

/// Symbol lookup errors
#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("invalid symbol name {0:?}")]
    InvalidName(String),

    #[error("symbol {name} not found: {reason}")]
    NotFound { name: String, reason: String },
}

/// Look up `name` in `module` and bind it to the function type `F`
///
/// # Safety
///
/// `F` must be a function pointer type matching the export's real ABI.
pub unsafe fn resolve<F: Copy>(module: &LoadedModule, name: &str) -> Result<F, SymbolError> {
    if name.is_empty() || name.contains('\0') {
        return Err(SymbolError::InvalidName(name.to_string()));
    }

    let symbol = module
        .library()
        .get::<F>(name.as_bytes())
        .map_err(|e| SymbolError::NotFound {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    debug!("Resolved symbol {} in {:?}", name, module.source());
    Ok(*symbol)
}
