//! `hackpoint.toml` settings.
//!
//! ```toml
//! image = "game.text.bin"
//! breakpoints = "breakpoints.json"
//! image_base = "0x401000"
//! module_base = "0x400000"
//! allocation_base = "0x20000000"
//! dispatch_address = "0x10000000"
//! ```
//!
//! Addresses are hex strings. Command line flags take precedence.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::TargetArgs;
use crate::commands::hex_utils::parse_hex_address;

/// Load address used when neither flag nor file names one
pub const DEFAULT_IMAGE_BASE: u32 = 0x0040_1000;

/// Placeholder the stubs call in offline renders
pub const DEFAULT_DISPATCH_ADDRESS: u32 = 0x1000_0000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub image: Option<PathBuf>,
    pub breakpoints: Option<PathBuf>,
    pub image_base: Option<String>,
    pub module_base: Option<String>,
    pub allocation_base: Option<String>,
    pub dispatch_address: Option<String>,
}

/// Settings after parsing and applying defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub image: PathBuf,
    pub breakpoints: PathBuf,
    pub image_base: u32,
    pub module_base: u32,
    pub allocation_base: Option<u32>,
    pub dispatch_address: u32,
}

impl CliConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Merge with the command line, which wins where both say something.
    pub fn resolve(&self, args: &TargetArgs) -> Result<Resolved> {
        let image = args
            .image
            .clone()
            .or_else(|| self.image.clone())
            .context("No image given (--image or `image` in the settings file)")?;
        let breakpoints = args
            .breakpoints
            .clone()
            .or_else(|| self.breakpoints.clone())
            .context("No breakpoint file given (--breakpoints or `breakpoints` in the settings file)")?;

        let image_base = match args.image_base {
            Some(base) => base,
            None => parse_field("image_base", &self.image_base)?.unwrap_or(DEFAULT_IMAGE_BASE),
        };
        let module_base = match args.module_base {
            Some(base) => base,
            None => parse_field("module_base", &self.module_base)?.unwrap_or(image_base),
        };
        Ok(Resolved {
            image,
            breakpoints,
            image_base,
            module_base,
            allocation_base: parse_field("allocation_base", &self.allocation_base)?,
            dispatch_address: parse_field("dispatch_address", &self.dispatch_address)?
                .unwrap_or(DEFAULT_DISPATCH_ADDRESS),
        })
    }
}

fn parse_field(name: &str, value: &Option<String>) -> Result<Option<u32>> {
    value
        .as_deref()
        .map(|s| parse_hex_address(s).with_context(|| format!("Invalid {}", name)))
        .transpose()
}
