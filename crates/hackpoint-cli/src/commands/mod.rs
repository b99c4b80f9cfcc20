//! CLI command implementations.
//!
//! Both commands work on a raw code image loaded into a simulated address
//! space. No handler code exists offline, so every description is bound to
//! a handler that logs the hit and honours `cave_exec`.

pub mod hex_utils;
pub mod hexdump;
pub mod plan;
pub mod render;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use hackpoint::{
    Engine, EngineConfig, HandlerRegistry, ImageMemory, ModuleResolver, cave_exec_flag,
    handler_key,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::TargetArgs;
use crate::config::{CliConfig, Resolved};

/// Everything a command operates on
pub struct Target {
    pub settings: Resolved,
    pub breakpoints: Value,
    pub memory: ImageMemory,
    pub image_len: usize,
}

impl Target {
    pub fn load(args: &TargetArgs) -> Result<Self> {
        let settings = CliConfig::load(&args.config)?.resolve(args)?;
        let breakpoints = load_breakpoints(&settings.breakpoints)?;

        let image = fs::read(&settings.image)
            .with_context(|| format!("Failed to read image {}", settings.image.display()))?;
        let image_len = image.len();

        let mut memory = match settings.allocation_base {
            Some(base) => ImageMemory::with_allocation_base(base),
            None => ImageMemory::new(),
        };
        memory.load_image(settings.image_base, image)?;
        info!(
            "Loaded {} bytes at {:#x} (module base {:#x})",
            image_len, settings.image_base, settings.module_base
        );

        Ok(Self {
            settings,
            breakpoints,
            memory,
            image_len,
        })
    }

    pub fn resolver(&self) -> ModuleResolver {
        ModuleResolver::new(self.settings.module_base)
    }

    pub fn engine(&self) -> Engine {
        let config = EngineConfig::builder()
            .dispatch_address(self.settings.dispatch_address)
            .build();
        Engine::with_config(offline_handlers(&self.breakpoints), config)
    }
}

/// Read a breakpoint file.
pub fn load_breakpoints(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read breakpoints {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse breakpoints {}", path.display()))?;
    extract_breakpoints(value)
}

/// Accept either `{"breakpoints": {...}}` or the name → record map itself.
pub fn extract_breakpoints(value: Value) -> Result<Value> {
    let Value::Object(mut object) = value else {
        bail!("Breakpoint file must contain a JSON object");
    };
    match object.remove("breakpoints") {
        Some(list @ Value::Object(_)) => Ok(list),
        Some(_) => bail!("\"breakpoints\" must be an object"),
        None => Ok(Value::Object(object)),
    }
}

/// Bind every handler key the list can derive to a logging handler.
pub fn offline_handlers(list: &Value) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    let Some(object) = list.as_object() else {
        return handlers;
    };
    for name in object.keys() {
        let key = handler_key(name);
        if handlers.contains(&key) {
            continue;
        }
        let label = key.clone();
        handlers.register(key, move |regs, config| {
            debug!("{} hit (return address {:#x})", label, regs.retaddr);
            cave_exec_flag(config)
        });
    }
    handlers
}
