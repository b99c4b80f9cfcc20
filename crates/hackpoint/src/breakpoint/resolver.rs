//! Candidate address resolution.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::x86::Addr;

/// Prefix of addresses given relative to the module base
pub const RELATIVE_PREFIX: &str = "Rx";

/// Turns one `addr` entry of a breakpoint record into a concrete address.
///
/// `Ok(None)` means the entry does not apply to the running build and must be
/// skipped quietly. `Err` means the entry could not be understood at all.
pub trait AddressResolver {
    fn resolve(&self, entry: &Value) -> Result<Option<Addr>>;
}

/// Resolver for plain and module-relative addresses.
///
/// - integers are absolute
/// - `"0x401000"` / `"4198400"` are absolute
/// - `"Rx1000"` is hex relative to `base`
/// - `0` and `null` mean "not applicable"
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleResolver {
    pub base: Addr,
}

impl ModuleResolver {
    pub fn new(base: Addr) -> Self {
        Self { base }
    }
}

impl AddressResolver for ModuleResolver {
    fn resolve(&self, entry: &Value) -> Result<Option<Addr>> {
        let addr = match entry {
            Value::Null => return Ok(None),
            Value::Number(n) => n
                .as_u64()
                .and_then(|v| Addr::try_from(v).ok())
                .ok_or_else(|| Error::UnresolvedAddress(entry.to_string()))?,
            Value::String(s) => {
                let s = s.trim();
                if let Some(rel) = s.strip_prefix(RELATIVE_PREFIX) {
                    let offset = parse_hex(rel)
                        .ok_or_else(|| Error::UnresolvedAddress(entry.to_string()))?;
                    self.base.wrapping_add(offset)
                } else {
                    parse_integer(s).ok_or_else(|| Error::UnresolvedAddress(entry.to_string()))?
                }
            }
            _ => return Err(Error::UnresolvedAddress(entry.to_string())),
        };

        Ok((addr != 0).then_some(addr))
    }
}

fn parse_hex(s: &str) -> Option<u32> {
    u32::from_str_radix(s, 16).ok()
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_integer(s: &str) -> Option<u32> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => parse_hex(hex),
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("0x401000"), Some(0x401000));
        assert_eq!(parse_integer("0X10"), Some(16));
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-1"), None);
        assert_eq!(parse_integer("0xZZ"), None);
    }

    #[test]
    fn test_resolve_absolute() {
        let resolver = ModuleResolver::new(0x400000);
        assert_eq!(resolver.resolve(&json!(0x401000)).unwrap(), Some(0x401000));
        assert_eq!(resolver.resolve(&json!("0x401000")).unwrap(), Some(0x401000));
    }

    #[test]
    fn test_resolve_relative() {
        let resolver = ModuleResolver::new(0x400000);
        assert_eq!(resolver.resolve(&json!("Rx1234")).unwrap(), Some(0x401234));
    }

    #[test]
    fn test_resolve_not_applicable() {
        let resolver = ModuleResolver::new(0x400000);
        assert_eq!(resolver.resolve(&json!(0)).unwrap(), None);
        assert_eq!(resolver.resolve(&json!("0x0")).unwrap(), None);
        assert_eq!(resolver.resolve(&Value::Null).unwrap(), None);
    }

    #[test]
    fn test_resolve_garbage() {
        let resolver = ModuleResolver::new(0x400000);
        assert!(resolver.resolve(&json!("[ebp-8]")).is_err());
        assert!(resolver.resolve(&json!(true)).is_err());
        assert!(resolver.resolve(&json!(-5)).is_err());
        assert!(resolver.resolve(&json!(0x1_0000_0000u64)).is_err());
    }
}
