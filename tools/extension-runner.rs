//! Load an extension image from memory and call one of its exports
//!
//! The image is read into a buffer and loaded through an anonymous memory
//! object; the file itself is never handed to the dynamic loader.
//!
//! ```text
//! extension-runner --image libhello.so --export Run --arg world
//! extension-runner --manifest hello/extension.toml --export Run --arg-hex 00ff
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use memload::config::LoaderConfig;
use memload::extension::{invoke_with_timeout, new_extension_with_backing, Extension, ExtensionManifest};
use memload::utils::init_logging_from_config;

#[derive(Debug, Parser)]
#[command(name = "extension-runner", about = "Load a native extension from memory and invoke an export")]
struct Args {
    /// Shared-library image to load
    #[arg(long, conflicts_with = "manifest", required_unless_present = "manifest")]
    image: Option<PathBuf>,

    /// Extension manifest (TOML) selecting the image for this platform
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Instance id (defaults to the image file stem or manifest name)
    #[arg(long)]
    id: Option<String>,

    /// Architecture tag recorded on the instance
    #[arg(long, default_value = std::env::consts::ARCH)]
    arch: String,

    /// Initializer symbol to run after load (overrides the manifest)
    #[arg(long)]
    init: Option<String>,

    /// Export to call
    #[arg(long)]
    export: String,

    /// Argument passed as UTF-8 bytes
    #[arg(long, conflicts_with = "arg_hex")]
    arg: Option<String>,

    /// Argument passed as hex-decoded bytes
    #[arg(long)]
    arg_hex: Option<String>,

    /// Loader configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Abandon the call after this many seconds (overrides the config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Print payloads as hex instead of text
    #[arg(long)]
    hex_output: bool,

    /// Exit non-zero when the export returns a non-zero status
    #[arg(long)]
    check_status: bool,
}

fn build_extension(args: &Args, config: &LoaderConfig) -> Result<Box<dyn Extension>> {
    if let Some(manifest_path) = &args.manifest {
        let manifest = ExtensionManifest::from_file(manifest_path)?;
        let base_dir = manifest_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        if args.init.is_none() && args.id.is_none() {
            return Ok(manifest.instantiate_for(
                &base_dir,
                std::env::consts::OS,
                &args.arch,
                config.backing.clone(),
            )?);
        }

        let file = manifest
            .select_file(std::env::consts::OS, &args.arch)
            .with_context(|| format!("{} has no image for {}", manifest.name, args.arch))?;
        let image = std::fs::read(base_dir.join(&file.path))
            .with_context(|| format!("reading {:?}", file.path))?;
        return Ok(new_extension_with_backing(
            args.id.clone().unwrap_or(manifest.name.clone()),
            image,
            args.arch.clone(),
            args.init.clone().or(manifest.init.clone()).unwrap_or_default(),
            config.backing.clone(),
        ));
    }

    let Some(image_path) = &args.image else {
        bail!("either --image or --manifest is required");
    };
    let image = std::fs::read(image_path).with_context(|| format!("reading {:?}", image_path))?;
    let id = args.id.clone().unwrap_or_else(|| {
        image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "extension".to_string())
    });

    Ok(new_extension_with_backing(
        id,
        image,
        args.arch.clone(),
        args.init.clone().unwrap_or_default(),
        config.backing.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_toml_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(seconds) = args.timeout {
        config.invoke.timeout_seconds = Some(seconds);
    }
    config.validate()?;
    init_logging_from_config(config.logging.as_ref());

    let argument = match (&args.arg, &args.arg_hex) {
        (Some(text), _) => text.as_bytes().to_vec(),
        (None, Some(encoded)) => hex::decode(encoded).context("decoding --arg-hex")?,
        (None, None) => Vec::new(),
    };

    let mut extension = build_extension(&args, &config)?;
    extension.load()?;
    info!("Loaded extension {} ({})", extension.id(), extension.architecture());

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    let hex_output = args.hex_output;
    let handler = Box::new(move |bytes: Vec<u8>| {
        if hex_output {
            println!("{}", hex::encode(&bytes));
        } else {
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        if let Ok(mut seen) = sink.lock() {
            seen.push(bytes.len());
        }
    });

    let timeout = config.invoke.timeout_seconds.map(Duration::from_secs);
    let status = invoke_with_timeout(
        Arc::from(extension),
        args.export.clone(),
        argument,
        handler,
        timeout,
    )
    .await?;

    let delivered = payloads.lock().map(|p| p.len()).unwrap_or(status.deliveries);
    eprintln!("status={} deliveries={}", status.code, delivered);

    if args.check_status {
        status.check(&args.export)?;
    }
    Ok(())
}
