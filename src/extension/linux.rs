//! Linux extension instance
//!
//! Loads an extension image from memory via `memfd` + `dlopen` and calls its
//! exports with a per-call output callback.

use std::path::Path;

use tracing::{debug, error, info};

use crate::config::BackingConfig;
use crate::extension::backing::MemoryBacking;
use crate::extension::callback::CallbackBinding;
use crate::extension::loader::LoadedModule;
use crate::extension::symbol::{self, ExportFn, InitializerFn, SymbolError};
use crate::extension::traits::{Extension, ExportStatus, ExtensionError, ExtensionState};

/// Extension loaded from an in-memory image on Linux
pub struct LinuxExtension {
    id: String,
    image: Vec<u8>,
    architecture: String,
    initializer: Option<String>,
    backing: BackingConfig,
    state: ExtensionState,
    module: Option<LoadedModule>,
}

impl LinuxExtension {
    /// Create an unloaded extension; no I/O happens here
    ///
    /// An empty `initializer` means the module has none.
    pub fn new(
        id: impl Into<String>,
        image: Vec<u8>,
        architecture: impl Into<String>,
        initializer: impl Into<String>,
    ) -> Self {
        Self::with_backing(id, image, architecture, initializer, BackingConfig::default())
    }

    /// Create an unloaded extension with explicit backing options
    pub fn with_backing(
        id: impl Into<String>,
        image: Vec<u8>,
        architecture: impl Into<String>,
        initializer: impl Into<String>,
        backing: BackingConfig,
    ) -> Self {
        let initializer = initializer.into();
        Self {
            id: id.into(),
            image,
            architecture: architecture.into(),
            initializer: (!initializer.is_empty()).then_some(initializer),
            backing,
            state: ExtensionState::Unloaded,
            module: None,
        }
    }

    /// Initializer symbol run after load, if any
    pub fn initializer(&self) -> Option<&str> {
        self.initializer.as_deref()
    }

    /// Path the loaded module was opened from
    pub fn source(&self) -> Option<&Path> {
        self.module.as_ref().map(LoadedModule::source)
    }

    fn open_image(&self) -> Result<LoadedModule, ExtensionError> {
        let backing = MemoryBacking::create_and_populate(&self.backing, &self.image)?;
        debug!(
            "Extension {} staged in memory backing ({} bytes, sealed: {})",
            self.id,
            backing.len(),
            backing.is_sealed()
        );

        let module = LoadedModule::open(backing)?;

        if let Some(name) = &self.initializer {
            // SAFETY: initializers take no arguments and return nothing.
            let init = unsafe { symbol::resolve::<InitializerFn>(&module, name) }
                .map_err(|e| ExtensionError::InitializerFailed(e.to_string()))?;
            debug!("Running initializer {} for extension {}", name, self.id);
            unsafe { init() };
        }

        Ok(module)
    }
}

impl Extension for LinuxExtension {
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
        if self.state != ExtensionState::Unloaded {
            return Err(ExtensionError::InvalidState {
                operation: "load",
                state: self.state.label(),
            });
        }

        info!("Loading extension {} ({})", self.id, self.architecture);
        self.state = ExtensionState::Loading;

        match self.open_image() {
            Ok(module) => {
                self.module = Some(module);
                self.image = Vec::new();
                self.state = ExtensionState::Loaded;
                info!("Extension {} loaded", self.id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to load extension {}: {}", self.id, e);
                self.state = ExtensionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn invoke(
        &self,
        export: &str,
        args: &[u8],
        on_result: &mut dyn FnMut(Vec<u8>),
    ) -> Result<ExportStatus, ExtensionError> {
        let module = match (&self.state, &self.module) {
            (ExtensionState::Loaded, Some(module)) => module,
            _ => {
                return Err(ExtensionError::InvalidState {
                    operation: "invoke",
                    state: self.state.label(),
                })
            }
        };

        // SAFETY: every export follows the (ptr, len, callback) -> u32 ABI.
        let export_fn = unsafe { symbol::resolve::<ExportFn>(module, export) }.map_err(|e| match e {
            SymbolError::InvalidName(name) | SymbolError::NotFound { name, .. } => {
                ExtensionError::ExportNotFound(name)
            }
        })?;

        debug!(
            "Calling {}::{} with {} byte argument",
            self.id,
            export,
            args.len()
        );
        let binding = CallbackBinding::bind(on_result);
        let code = unsafe { export_fn(args.as_ptr(), args.len() as u64, binding.callback()) };
        let deliveries = binding.finish();

        debug!(
            "{}::{} returned status {} after {} deliveries",
            self.id, export, code, deliveries
        );
        Ok(ExportStatus { code, deliveries })
    }
}

impl Drop for LinuxExtension {
    fn drop(&mut self) {
        // Module code may still be referenced (threads, atexit handlers), so
        // handles and their backings live for the rest of the process.
        if let Some(module) = self.module.take() {
            module.persist();
        }
    }
}
