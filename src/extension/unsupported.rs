//! Fallback variant for platforms without in-memory loading
//!
//! Keeps identity accessors working so callers can still register and
//! report on the extension; loading always fails.

use crate::extension::traits::{Extension, ExportStatus, ExtensionError, ExtensionState};

/// Extension on a platform with no memory-backed loader
pub struct UnsupportedExtension {
    id: String,
    architecture: String,
    state: ExtensionState,
}

impl UnsupportedExtension {
    pub fn new(id: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            architecture: architecture.into(),
            state: ExtensionState::Unloaded,
        }
    }
}

impl Extension for UnsupportedExtension {
    fn id(&self) -> &str {
        &self.id
    }

    fn architecture(&self) -> &str {
        &self.architecture
    }

    fn state(&self) -> ExtensionState {
        self.state.clone()
    }

    fn load(&mut self) -> Result<(), ExtensionError> {
        let err = ExtensionError::UnsupportedPlatform(std::env::consts::OS);
        self.state = ExtensionState::Failed(err.to_string());
        Err(err)
    }

    fn invoke(
        &self,
        _export: &str,
        _args: &[u8],
        _on_result: &mut dyn FnMut(Vec<u8>),
    ) -> Result<ExportStatus, ExtensionError> {
        Err(ExtensionError::InvalidState {
            operation: "invoke",
            state: self.state.label(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_always_fails() {
        let mut ext = UnsupportedExtension::new("ext", "x86_64");
        assert_eq!(ext.id(), "ext");
        assert_eq!(ext.architecture(), "x86_64");

        assert!(matches!(ext.load(), Err(ExtensionError::UnsupportedPlatform(_))));
        assert!(matches!(ext.state(), ExtensionState::Failed(_)));
        assert!(ext.invoke("run", b"", &mut |_| {}).is_err());
    }
}
