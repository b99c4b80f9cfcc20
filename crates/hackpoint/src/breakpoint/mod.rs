//! Breakpoint descriptions.
//!
//! A [`Breakpoint`] is built once from its configuration record and never
//! changes afterwards. It carries:
//!
//! - **name**: the declaration name, possibly with a `#slot` suffix
//! - **cave size**: how many bytes of original code the patch overwrites
//! - **handler**: the callback, looked up once through [`HandlerRegistry`]
//! - **configuration**: the record itself, handed to the handler on every hit
//! - **addresses**: every candidate address in declaration order
//!
//! ## Record format
//!
//! ```json
//! {
//!     "file_load": {
//!         "addr": ["Rx1234", "0x405678"],
//!         "cavesize": 6,
//!         "cave_exec": true
//!     }
//! }
//! ```

mod registry;
mod resolver;

use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::regs::X86Regs;
use crate::x86::{Addr, CALL_LEN, MAX_CAVE_SIZE};

pub use registry::*;
pub use resolver::*;

/// One entry of a breakpoint's `addr` list.
///
/// Entries are tagged rather than dropped so that diagnostics can keep
/// referring to them by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAddress {
    Resolved(Addr),
    /// The resolver says the entry does not apply to this build
    Null,
    /// The entry could not be resolved; holds its source text
    Unresolved(String),
}

impl CandidateAddress {
    pub fn resolved(&self) -> Option<Addr> {
        match self {
            CandidateAddress::Resolved(addr) => Some(*addr),
            _ => None,
        }
    }
}

pub struct Breakpoint {
    name: String,
    cave_size: usize,
    handler_key: String,
    handler: Handler,
    config: Value,
    addresses: Vec<CandidateAddress>,
}

impl Breakpoint {
    /// Build a breakpoint from its configuration record.
    pub fn from_json(
        name: &str,
        record: &Value,
        handlers: &HandlerRegistry,
        resolver: &dyn AddressResolver,
    ) -> Result<Self> {
        let Some(object) = record.as_object() else {
            return Err(Error::NotAnObject {
                name: name.to_string(),
            });
        };

        if object.get("ignore").and_then(Value::as_bool).unwrap_or(false) {
            return Err(Error::Ignored {
                name: name.to_string(),
            });
        }

        let cave_size = parse_cave_size(name, object.get("cavesize"))?;

        let addresses = candidate_addresses(object.get("addr"), resolver);
        if !addresses.iter().any(|a| a.resolved().is_some()) {
            // Usually means the breakpoint does not apply to this build.
            return Err(Error::NoAddresses {
                name: name.to_string(),
            });
        }

        let key = handler_key(name);
        let handler = handlers.lookup(&key).ok_or_else(|| Error::HandlerNotFound {
            name: name.to_string(),
            key: key.clone(),
        })?;

        Ok(Self {
            name: name.to_string(),
            cave_size,
            handler_key: key,
            handler,
            config: record.clone(),
            addresses,
        })
    }

    /// Build a breakpoint from already resolved parts.
    pub fn new(
        name: impl Into<String>,
        cave_size: usize,
        handler: Handler,
        config: Value,
        addresses: Vec<CandidateAddress>,
    ) -> Result<Self> {
        let name = name.into();
        check_cave_size(&name, cave_size)?;
        if !addresses.iter().any(|a| a.resolved().is_some()) {
            return Err(Error::NoAddresses { name });
        }
        Ok(Self {
            handler_key: handler_key(&name),
            name,
            cave_size,
            handler,
            config,
            addresses,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cave_size(&self) -> usize {
        self.cave_size
    }

    pub fn handler_key(&self) -> &str {
        &self.handler_key
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn addresses(&self) -> &[CandidateAddress] {
        &self.addresses
    }

    /// Run the handler against a register snapshot.
    pub fn invoke(&self, regs: &mut X86Regs) -> bool {
        (self.handler)(regs, &self.config)
    }
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("name", &self.name)
            .field("cave_size", &self.cave_size)
            .field("handler_key", &self.handler_key)
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

/// Whether a simple handler should let the original code run.
///
/// True unless the record says `"cave_exec": false`.
pub fn cave_exec_flag(config: &Value) -> bool {
    !matches!(config.get("cave_exec"), Some(Value::Bool(false)))
}

fn parse_cave_size(name: &str, value: Option<&Value>) -> Result<usize> {
    let invalid = |reason: &str| Error::InvalidCaveSize {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let size = match value {
        None | Some(Value::Null) => {
            return Err(Error::MissingCaveSize {
                name: name.to_string(),
            });
        }
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| invalid("must be a non-negative integer"))?,
        Some(Value::String(s)) => parse_integer(s)
            .map(u64::from)
            .ok_or_else(|| invalid("unparsable integer string"))?,
        Some(_) => return Err(invalid("must be integer or string")),
    };

    let size = usize::try_from(size).map_err(|_| invalid("out of range"))?;
    check_cave_size(name, size)
}

fn check_cave_size(name: &str, size: usize) -> Result<usize> {
    if size < CALL_LEN {
        return Err(Error::CaveSizeTooSmall {
            name: name.to_string(),
            size,
        });
    }
    if size > MAX_CAVE_SIZE {
        return Err(Error::InvalidCaveSize {
            name: name.to_string(),
            reason: format!("{size} exceeds the maximum of {MAX_CAVE_SIZE}"),
        });
    }
    Ok(size)
}

fn candidate_addresses(value: Option<&Value>, resolver: &dyn AddressResolver) -> Vec<CandidateAddress> {
    let entries: Vec<&Value> = match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    };

    entries
        .into_iter()
        .map(|entry| match resolver.resolve(entry) {
            Ok(Some(addr)) => CandidateAddress::Resolved(addr),
            Ok(None) => {
                debug!("address {} not applicable, skipping", entry);
                CandidateAddress::Null
            }
            Err(e) => {
                warn!("{}", e);
                CandidateAddress::Unresolved(entry.to_string())
            }
        })
        .collect()
}
