//! Extension system for memload
//!
//! Loads native extension modules from in-process byte buffers and calls
//! their exports.
//!
//! ## Architecture
//!
//! - **Memory Backing**: the image is staged in an anonymous, optionally sealed memory object
//! - **Loader Bridge**: the dynamic loader opens it through `/proc/self/fd/<n>`
//! - **Symbol Resolution**: initializer and exports are bound to declared native signatures
//! - **Callback Bridge**: each call binds its own output handler; payloads are copied before forwarding
//! - **Platform Variants**: one [`Extension`] implementation per OS, chosen at construction time

#[cfg(target_os = "linux")]
pub mod backing;
pub mod callback;
#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub mod loader;
pub mod manifest;
pub mod runner;
#[cfg(target_os = "linux")]
pub mod symbol;
pub mod traits;
pub mod unsupported;

pub use callback::{CallbackBinding, OutputCallback};
#[cfg(target_os = "linux")]
pub use linux::LinuxExtension;
pub use manifest::{ExtensionFile, ExtensionManifest};
pub use runner::invoke_with_timeout;
pub use traits::{ExportStatus, Extension, ExtensionError, ExtensionState};
pub use unsupported::UnsupportedExtension;

use crate::config::BackingConfig;

/// Create the extension variant for the current platform
pub fn new_extension(
    id: impl Into<String>,
    image: Vec<u8>,
    architecture: impl Into<String>,
    initializer: impl Into<String>,
) -> Box<dyn Extension> {
    new_extension_with_backing(id, image, architecture, initializer, BackingConfig::default())
}

/// Create the platform variant with explicit memory backing options
pub fn new_extension_with_backing(
    id: impl Into<String>,
    image: Vec<u8>,
    architecture: impl Into<String>,
    initializer: impl Into<String>,
    backing: BackingConfig,
) -> Box<dyn Extension> {
    #[cfg(target_os = "linux")]
    {
        Box::new(LinuxExtension::with_backing(
            id,
            image,
            architecture,
            initializer,
            backing,
        ))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (image, initializer, backing);
        Box::new(UnsupportedExtension::new(id, architecture))
    }
}
