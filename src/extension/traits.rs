//! Extension traits and shared types
//!
//! Defines the capability set every platform variant implements, along with
//! the lifecycle state and error types surfaced to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Extension lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtensionState {
    /// Constructed from an image, not yet loaded
    Unloaded,
    /// Load sequence in progress
    Loading,
    /// Module is mapped and exports can be invoked
    Loaded,
    /// Load failed; the instance can never be invoked
    Failed(String),
}

impl ExtensionState {
    /// Whether exports may be invoked in this state
    pub fn is_invokable(&self) -> bool {
        matches!(self, ExtensionState::Loaded)
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            ExtensionState::Unloaded => "unloaded",
            ExtensionState::Loading => "loading",
            ExtensionState::Loaded => "loaded",
            ExtensionState::Failed(_) => "failed",
        }
    }
}

/// Result of a single export call
///
/// `code` is whatever the export returned. It is not interpreted here;
/// use [`ExportStatus::check`] to treat non-zero as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStatus {
    /// Raw status code returned by the export
    pub code: u32,
    /// Number of payloads delivered to the handler during the call
    pub deliveries: usize,
}

impl ExportStatus {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Map a non-zero status code to [`ExtensionError::ExportInvocationFailed`]
    pub fn check(self, export: &str) -> Result<Self, ExtensionError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ExtensionError::ExportInvocationFailed {
                export: export.to_string(),
                status: self.code,
            })
        }
    }
}

/// Extension trait implemented by each platform variant
///
/// `load` runs once per instance. `invoke` blocks the calling thread for the
/// whole native call; any output callback fires before it returns.
pub trait Extension: Send + Sync {
    /// Stable identifier assigned by the owner of this instance
    fn id(&self) -> &str;

    /// Target CPU/ABI tag the image was built for (informational)
    fn architecture(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> ExtensionState;

    /// Map the image into the process and run the initializer, if any
    ///
    /// Valid only from [`ExtensionState::Unloaded`].
    fn load(&mut self) -> Result<(), ExtensionError>;

    /// Call `export` with `args`, forwarding every output payload to `on_result`
    ///
    /// Valid only from [`ExtensionState::Loaded`]. Payloads are host-owned
    /// copies of the module's output buffer.
    fn invoke(
        &self,
        export: &str,
        args: &[u8],
        on_result: &mut dyn FnMut(Vec<u8>),
    ) -> Result<ExportStatus, ExtensionError>;
}

/// Extension system errors
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Failed to create anonymous memory backing: {0}")]
    BackingCreationFailed(String),

    #[error("Failed to write image to memory backing: {0}")]
    BackingWriteFailed(String),

    #[error("Memory backing cannot be sealed: {0}")]
    SealingUnsupported(String),

    #[error("Dynamic loader rejected image: {0}")]
    LoaderOpenFailed(String),

    #[error("Initializer failed: {0}")]
    InitializerFailed(String),

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    #[error("Export {export} returned status {status}")]
    ExportInvocationFailed { export: String, status: u32 },

    #[error("Operation {operation} not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("In-memory loading is not supported on {0}")]
    UnsupportedPlatform(&'static str),

    #[error("Timeout waiting for export {0}")]
    Timeout(String),

    #[error("Invocation worker failed: {0}")]
    WorkerFailed(String),

    #[error("Invalid extension manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ExtensionError {
    fn from(e: serde_json::Error) -> Self {
        ExtensionError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for ExtensionError {
    fn from(e: toml::de::Error) -> Self {
        ExtensionError::Config(e.to_string())
    }
}
