//! memload - memory-resident loading of native extension modules
//!
//! Takes a shared-library image held in a byte buffer, maps it through the
//! platform dynamic loader without writing it to persistent storage, and calls
//! its exports. Exports report output through a `(ptr, len)` callback; every
//! payload is copied into host memory before the handler sees it.
//!
//! ```rust,no_run
//! use memload::{new_extension, Extension};
//!
//! # fn main() -> Result<(), memload::ExtensionError> {
//! let image = std::fs::read("libhello.so").expect("image");
//! let mut ext = new_extension("hello", image, "x86_64", "");
//! ext.load()?;
//! let status = ext.invoke("Run", b"world", &mut |out| println!("{}", String::from_utf8_lossy(&out)))?;
//! status.check("Run")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod extension;
pub mod utils;

pub use config::{BackingConfig, InvokeConfig, LoaderConfig, LoggingConfig, SealPolicy};
pub use extension::{
    invoke_with_timeout, new_extension, new_extension_with_backing, ExportStatus, Extension,
    ExtensionError, ExtensionManifest, ExtensionState,
};
#[cfg(target_os = "linux")]
pub use extension::LinuxExtension;
