//! Handler registration table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::regs::X86Regs;

/// Native breakpoint callback.
///
/// Receives the captured registers and the breakpoint's configuration record.
/// Returning `true` resumes execution through the relocated original code.
pub type HandlerFn = dyn Fn(&mut X86Regs, &Value) -> bool + Send + Sync;

pub type Handler = Arc<HandlerFn>;

/// Prefix of keys that belong to named breakpoint functions
pub const BREAKPOINT_PREFIX: &str = "BP_";

/// Prefix of names that refer to raw code caves and are looked up verbatim
pub const CODECAVE_PREFIX: &str = "codecave:";

/// Separator between a base name and its slot suffix (`name#slot`)
pub const SLOT_SEPARATOR: char = '#';

/// Derive the registry key a breakpoint name binds to.
///
/// Any `#slot` suffix is dropped so several declarations can share one
/// handler. `codecave:` names are kept as is; everything else gets `BP_`.
pub fn handler_key(name: &str) -> String {
    let base = name
        .split_once(SLOT_SEPARATOR)
        .map_or(name, |(base, _slot)| base);
    if base.starts_with(CODECAVE_PREFIX) {
        base.to_string()
    } else {
        format!("{BREAKPOINT_PREFIX}{base}")
    }
}

/// Explicit mapping from handler key to callback, populated before setup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a raw key. Returns the callback it replaced.
    pub fn register<F>(&mut self, key: impl Into<String>, handler: F) -> Option<Handler>
    where
        F: Fn(&mut X86Regs, &Value) -> bool + Send + Sync + 'static,
    {
        self.handlers.insert(key.into(), Arc::new(handler))
    }

    /// Register the handler for breakpoints named `name` (stored as `BP_name`).
    pub fn register_breakpoint<F>(&mut self, name: &str, handler: F) -> Option<Handler>
    where
        F: Fn(&mut X86Regs, &Value) -> bool + Send + Sync + 'static,
    {
        self.register(format!("{BREAKPOINT_PREFIX}{name}"), handler)
    }

    /// Register the handler for a `codecave:` entry.
    pub fn register_codecave<F>(&mut self, name: &str, handler: F) -> Option<Handler>
    where
        F: Fn(&mut X86Regs, &Value) -> bool + Send + Sync + 'static,
    {
        self.register(format!("{CODECAVE_PREFIX}{name}"), handler)
    }

    pub fn lookup(&self, key: &str) -> Option<Handler> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerRegistry").field("keys", &keys).finish()
    }
}
