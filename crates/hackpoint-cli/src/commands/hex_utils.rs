//! Hex address parsing and formatting utilities.

use anyhow::Result;

/// Parse a 32-bit hex address (with or without 0x prefix).
pub fn parse_hex_address(s: &str) -> Result<u32> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| anyhow::anyhow!("Invalid hex address: {}", e))
}

/// Format an address as a hex string with 0x prefix.
pub fn format_hex_address(addr: u32) -> String {
    format!("0x{:08X}", addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_address_with_prefix() {
        assert_eq!(parse_hex_address("0x401000").unwrap(), 0x401000);
        assert_eq!(parse_hex_address("0X401000").unwrap(), 0x401000);
    }

    #[test]
    fn test_parse_hex_address_without_prefix() {
        assert_eq!(parse_hex_address("1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_address("DEADBEEF").unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn test_parse_hex_address_out_of_range() {
        assert!(parse_hex_address("0x1431B08A0").is_err());
    }

    #[test]
    fn test_parse_hex_address_invalid() {
        assert!(parse_hex_address("GHIJK").is_err());
        assert!(parse_hex_address("0xZZZ").is_err());
        assert!(parse_hex_address("").is_err());
    }

    #[test]
    fn test_format_hex_address() {
        assert_eq!(format_hex_address(0x401000), "0x00401000");
        assert_eq!(format_hex_address(0xDEADBEEF), "0xDEADBEEF");
    }
}
