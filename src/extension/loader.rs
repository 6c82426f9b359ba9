//! Dynamic loader bridge
//!
//! Opens a shared-library image through the platform `dlopen`, using the
//! memory backing's `/proc/self/fd` path in place of an on-disk file.

use std::path::{Path, PathBuf};

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use tracing::{debug, info};

use crate::extension::backing::MemoryBacking;
use crate::extension::traits::ExtensionError;

/// Resolve every symbol at open time and make them visible to later loads
pub const LOAD_FLAGS: libc::c_int = RTLD_NOW | RTLD_GLOBAL;

/// Handle to a module mapped by the dynamic loader
///
/// A module opened from a [`MemoryBacking`] owns it: the loader knows the
/// module by its `/proc/self/fd/<n>` name, and that name has to stay unique
/// while the module is mapped. Dropping the handle calls `dlclose` and then
/// closes the backing. Use [`LoadedModule::persist`] to keep both for the rest
/// of the process.
#[derive(Debug)]
pub struct LoadedModule {
    // Declared before `backing` so `dlclose` runs before the fd is released.
    library: Library,
    backing: Option<MemoryBacking>,
    source: PathBuf,
}

impl LoadedModule {
    /// Open the image staged in `backing`
    ///
    /// On failure the backing is closed before returning.
    pub fn open(backing: MemoryBacking) -> Result<Self, ExtensionError> {
        let module = Self::open_path(&backing.proc_path())?;
        Ok(Self {
            backing: Some(backing),
            ..module
        })
    }

    /// Open a library by path with [`LOAD_FLAGS`]
    pub fn open_path(path: &Path) -> Result<Self, ExtensionError> {
        debug!("dlopen {:?} (flags {:#x})", path, LOAD_FLAGS);

        // SAFETY: running the image's constructors is the point of loading it;
        // the caller vouches for the image.
        let library = unsafe { Library::open(Some(path), LOAD_FLAGS) }
            .map_err(|e| ExtensionError::LoaderOpenFailed(e.to_string()))?;

        info!("Mapped extension image from {:?}", path);
        Ok(Self {
            library,
            backing: None,
            source: path.to_path_buf(),
        })
    }

    pub(crate) fn library(&self) -> &Library {
        &self.library
    }

    /// Path the module was opened from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Memory backing the module was opened from, if any
    pub fn backing(&self) -> Option<&MemoryBacking> {
        self.backing.as_ref()
    }

    /// Keep the module mapped, and its backing open, until the process exits
    pub fn persist(self) {
        let Self {
            library,
            backing,
            source,
        } = self;
        let handle = library.into_raw();
        let fd = backing.map(MemoryBacking::persist);
        debug!(
            "Keeping module {:?} mapped at handle {:p} (backing fd {:?})",
            source, handle, fd
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackingConfig, SealPolicy};

    #[test]
    fn test_garbage_image_is_rejected() {
        let backing = MemoryBacking::create_and_populate(
            &BackingConfig {
                name: "loader-test".to_string(),
                sealing: SealPolicy::Disabled,
            },
            b"definitely not a shared object",
        )
        .unwrap();

        let err = LoadedModule::open(backing).unwrap_err();
        assert!(matches!(err, ExtensionError::LoaderOpenFailed(_)));
    }

    #[test]
    fn test_missing_path_is_rejected() {
        let err = LoadedModule::open_path(Path::new("/nonexistent/memload/libnothing.so")).unwrap_err();
        assert!(matches!(err, ExtensionError::LoaderOpenFailed(_)));
    }
}
