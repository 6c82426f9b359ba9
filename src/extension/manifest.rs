//! Extension manifest parsing
//!
//! An extension ships one image per OS/architecture pair, described by a
//! TOML manifest:
//!
//! ```toml
//! name = "credentials"
//! init = "ExtensionInit"
//!
//! [[files]]
//! os = "linux"
//! arch = "amd64"
//! path = "credentials.x86_64.so"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::BackingConfig;
use crate::extension::new_extension_with_backing;
use crate::extension::traits::{Extension, ExtensionError};

/// One image entry in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionFile {
    /// Target operating system (e.g. "linux")
    pub os: String,
    /// Target architecture; Go and Rust spellings are both accepted
    pub arch: String,
    /// Image path, relative to the manifest's directory
    pub path: PathBuf,
}

/// Extension manifest (extension.toml structure)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Extension name, used as the instance id
    pub name: String,
    /// Extension version
    #[serde(default)]
    pub version: Option<String>,
    /// Initializer symbol run after load
    #[serde(default)]
    pub init: Option<String>,
    /// Available images
    #[serde(default)]
    pub files: Vec<ExtensionFile>,
}

/// Canonical spelling of an architecture tag
pub fn normalize_arch(arch: &str) -> String {
    let lower = arch.to_ascii_lowercase();
    match lower.as_str() {
        "amd64" | "x86_64" | "x64" => "x86_64".to_string(),
        "386" | "x86" | "i386" | "i686" => "x86".to_string(),
        "arm64" | "aarch64" => "aarch64".to_string(),
        _ => lower,
    }
}

impl ExtensionManifest {
    /// Parse a manifest from TOML text
    pub fn parse(contents: &str) -> Result<Self, ExtensionError> {
        let manifest: ExtensionManifest = toml::from_str(contents).map_err(|e| {
            ExtensionError::InvalidManifest(format!("Failed to parse manifest TOML: {}", e))
        })?;

        if manifest.name.is_empty() {
            return Err(ExtensionError::InvalidManifest(
                "Extension name cannot be empty".to_string(),
            ));
        }
        if manifest.files.is_empty() {
            return Err(ExtensionError::InvalidManifest(format!(
                "Extension {} lists no files",
                manifest.name
            )));
        }
        if let Some(file) = manifest.files.iter().find(|f| f.path.as_os_str().is_empty()) {
            return Err(ExtensionError::InvalidManifest(format!(
                "Empty path for {}/{}",
                file.os, file.arch
            )));
        }

        Ok(manifest)
    }

    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ExtensionError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ExtensionError::InvalidManifest(format!("Failed to read manifest file: {}", e))
        })?;
        Self::parse(&contents)
    }

    /// Find the image built for `os`/`arch`
    pub fn select_file(&self, os: &str, arch: &str) -> Option<&ExtensionFile> {
        let arch = normalize_arch(arch);
        self.files
            .iter()
            .find(|f| f.os.eq_ignore_ascii_case(os) && normalize_arch(&f.arch) == arch)
    }

    /// Read the image for the current platform and build an unloaded extension
    pub fn instantiate(
        &self,
        base_dir: &Path,
        backing: BackingConfig,
    ) -> Result<Box<dyn Extension>, ExtensionError> {
        self.instantiate_for(base_dir, std::env::consts::OS, std::env::consts::ARCH, backing)
    }

    /// Read the image built for `os`/`arch` and build an unloaded extension
    pub fn instantiate_for(
        &self,
        base_dir: &Path,
        os: &str,
        arch: &str,
        backing: BackingConfig,
    ) -> Result<Box<dyn Extension>, ExtensionError> {
        let file = self.select_file(os, arch).ok_or_else(|| {
            ExtensionError::InvalidManifest(format!(
                "Extension {} has no image for {}/{}",
                self.name, os, arch
            ))
        })?;

        let image_path = base_dir.join(&file.path);
        let image = std::fs::read(&image_path).map_err(|e| {
            ExtensionError::InvalidManifest(format!("Failed to read image {:?}: {}", image_path, e))
        })?;

        Ok(new_extension_with_backing(
            self.name.clone(),
            image,
            normalize_arch(&file.arch),
            self.init.clone().unwrap_or_default(),
            backing,
        ))
    }
}
