//! Anonymous memory backing
//!
//! Stages an extension image in a `memfd` so the dynamic loader can open it
//! through `/proc/self/fd/<n>` without the image ever touching disk.
//!
//! Once written, the object is resized to exactly the image length and, where
//! the kernel allows it, sealed against writes, resizing and further sealing.

use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::path::PathBuf;
use std::sync::OnceLock;

use nix::fcntl::{fcntl, FcntlArg, SealFlag};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use tracing::{debug, warn};

use crate::config::{BackingConfig, SealPolicy};
use crate::extension::traits::ExtensionError;

/// Seals applied after population
fn image_seals() -> SealFlag {
    SealFlag::F_SEAL_SEAL | SealFlag::F_SEAL_SHRINK | SealFlag::F_SEAL_GROW | SealFlag::F_SEAL_WRITE
}

/// Whether this kernel supports sealing memfd objects
///
/// Probed once per process with a throwaway memfd.
pub fn sealing_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(probe_sealing)
}

fn probe_sealing() -> bool {
    let name = c"memload-seal-probe";
    let flags = MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING;
    match memfd_create(name, flags) {
        Ok(fd) => {
            let supported = fcntl(fd.as_raw_fd(), FcntlArg::F_ADD_SEALS(SealFlag::F_SEAL_SEAL)).is_ok();
            debug!("memfd sealing supported: {}", supported);
            supported
        }
        Err(e) => {
            debug!("memfd_create unavailable while probing seals: {}", e);
            false
        }
    }
}

/// A populated anonymous memory object
///
/// Dropping it closes the descriptor. The dynamic loader records a module
/// under the `/proc/self/fd/<n>` name it was opened with, so the descriptor
/// must stay open while that module is mapped; otherwise a later backing that
/// reuses the number is taken for the old module.
#[derive(Debug)]
pub struct MemoryBacking {
    file: File,
    len: usize,
    sealed: bool,
}

impl MemoryBacking {
    /// Create a memfd, write `image` into it and apply the sealing policy
    ///
    /// On any failure the partially written object is closed before returning.
    pub fn create_and_populate(
        config: &BackingConfig,
        image: &[u8],
    ) -> Result<Self, ExtensionError> {
        if config.sealing == SealPolicy::Required && !sealing_supported() {
            return Err(ExtensionError::SealingUnsupported(
                "kernel does not support F_ADD_SEALS on memfd".to_string(),
            ));
        }

        let name = CString::new(config.name.as_str()).map_err(|_| {
            ExtensionError::BackingCreationFailed(format!(
                "backing name {:?} contains a NUL byte",
                config.name
            ))
        })?;

        let mut flags = MemFdCreateFlag::MFD_CLOEXEC;
        if config.sealing != SealPolicy::Disabled {
            flags |= MemFdCreateFlag::MFD_ALLOW_SEALING;
        }

        let fd = memfd_create(&name, flags).map_err(|e| {
            ExtensionError::BackingCreationFailed(format!("memfd_create failed: {}", e))
        })?;
        let mut file = File::from(fd);
        debug!(
            "Created memory backing {:?} (fd {}) for {} byte image",
            config.name,
            file.as_raw_fd(),
            image.len()
        );

        file.set_len(image.len() as u64).map_err(|e| {
            ExtensionError::BackingWriteFailed(format!("failed to size backing: {}", e))
        })?;
        file.write_all(image).map_err(|e| {
            ExtensionError::BackingWriteFailed(format!("failed to write image: {}", e))
        })?;
        file.flush().map_err(|e| {
            ExtensionError::BackingWriteFailed(format!("failed to flush image: {}", e))
        })?;

        let written = file
            .metadata()
            .map_err(|e| ExtensionError::BackingWriteFailed(format!("failed to stat backing: {}", e)))?
            .len();
        if written != image.len() as u64 {
            return Err(ExtensionError::BackingWriteFailed(format!(
                "backing holds {} bytes, expected {}",
                written,
                image.len()
            )));
        }

        let sealed = match config.sealing {
            SealPolicy::Disabled => false,
            policy => match fcntl(file.as_raw_fd(), FcntlArg::F_ADD_SEALS(image_seals())) {
                Ok(_) => true,
                Err(e) if policy == SealPolicy::Required => {
                    return Err(ExtensionError::SealingUnsupported(format!(
                        "F_ADD_SEALS failed: {}",
                        e
                    )));
                }
                Err(e) => {
                    warn!("Continuing with unsealed memory backing: {}", e);
                    false
                }
            },
        };

        Ok(Self {
            file,
            len: image.len(),
            sealed,
        })
    }

    /// Raw descriptor of the memory object
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Self-referential path the dynamic loader can open
    pub fn proc_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/self/fd/{}", self.fd()))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Give up ownership of the descriptor; it stays open until exit
    pub fn persist(self) -> RawFd {
        let fd = self.file.into_raw_fd();
        debug!("Keeping memory backing fd {} open", fd);
        fd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    fn config(sealing: SealPolicy) -> BackingConfig {
        BackingConfig {
            name: "backing-test".to_string(),
            sealing,
        }
    }

    #[test]
    fn test_backing_holds_exact_image() {
        let image = b"\x7fELF not really an elf".to_vec();
        let backing = MemoryBacking::create_and_populate(&config(SealPolicy::Disabled), &image).unwrap();

        assert_eq!(backing.len(), image.len());
        assert!(!backing.is_sealed());

        let contents = std::fs::read(backing.proc_path()).unwrap();
        assert_eq!(contents, image);
    }

    #[test]
    fn test_proc_path_names_descriptor() {
        let backing = MemoryBacking::create_and_populate(&config(SealPolicy::Disabled), b"abc").unwrap();
        assert_eq!(
            backing.proc_path(),
            PathBuf::from(format!("/proc/self/fd/{}", backing.fd()))
        );
    }

    #[test]
    fn test_sealed_backing_rejects_writes_and_resizing() {
        if !sealing_supported() {
            return;
        }
        let backing = MemoryBacking::create_and_populate(&config(SealPolicy::Required), b"sealed image").unwrap();
        assert!(backing.is_sealed());

        let mut file = backing.file.try_clone().unwrap();
        assert!(file.write_all(b"tamper").is_err());
        assert!(file.set_len(1).is_err());
        assert!(file.set_len(4096).is_err());

        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"sealed image");
    }

    #[test]
    fn test_best_effort_matches_platform_support() {
        let backing = MemoryBacking::create_and_populate(&config(SealPolicy::BestEffort), b"image").unwrap();
        assert_eq!(backing.is_sealed(), sealing_supported());
    }

    #[test]
    fn test_name_with_nul_fails_creation() {
        let bad = BackingConfig {
            name: "bad\0name".to_string(),
            sealing: SealPolicy::Disabled,
        };
        let err = MemoryBacking::create_and_populate(&bad, b"image").unwrap_err();
        assert!(matches!(err, ExtensionError::BackingCreationFailed(_)));
    }

    #[test]
    fn test_persisted_descriptor_stays_open() {
        let backing = MemoryBacking::create_and_populate(&config(SealPolicy::Disabled), b"kept").unwrap();
        let path = backing.proc_path();

        let fd = backing.persist();
        assert_eq!(std::fs::read(&path).unwrap(), b"kept");

        // SAFETY: `persist` handed ownership of `fd` to us.
        drop(unsafe { <File as std::os::fd::FromRawFd>::from_raw_fd(fd) });
    }

    #[test]
    fn test_empty_image_is_allowed() {
        let backing = MemoryBacking::create_and_populate(&config(SealPolicy::Disabled), &[]).unwrap();
        assert!(backing.is_empty());
        assert!(std::fs::read(backing.proc_path()).unwrap().is_empty());
    }
}
