//! Hexdump rendering for patched code.
//!
//! ```text
//! 0x00401010: E8 EB EF BF 1F 90 16 17  18 19 1A 1B 1C 1D 1E 1F  |................|
//! ```

use std::fmt::Write;

/// Format `bytes` as hexdump lines labelled with their address.
pub fn format(address: u32, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let mut line = format!("0x{:08X}: ", address.wrapping_add((i * 16) as u32));

            for j in 0..16 {
                if j == 8 {
                    line.push(' ');
                }
                match chunk.get(j) {
                    Some(byte) => {
                        let _ = write!(line, "{:02X} ", byte);
                    }
                    None => line.push_str("   "),
                }
            }

            line.push_str(" |");
            for byte in chunk {
                if (0x20..0x7F).contains(byte) {
                    line.push(*byte as char);
                } else {
                    line.push('.');
                }
            }
            for _ in chunk.len()..16 {
                line.push(' ');
            }
            line.push('|');
            line
        })
        .collect()
}

pub fn print(title: &str, address: u32, bytes: &[u8]) {
    println!("{} at 0x{:08X} ({} bytes):", title, address, bytes.len());
    for line in format(address, bytes) {
        println!("  {}", line);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_line() {
        let lines = format(0x401000, b"Hello World\0\0\0\0\0");
        assert_eq!(
            lines,
            vec![
                "0x00401000: 48 65 6C 6C 6F 20 57 6F  72 6C 64 00 00 00 00 00  |Hello World.....|"
            ]
        );
    }

    #[test]
    fn test_partial_line_is_padded() {
        let lines = format(0x2000_0010, &[0xE8, 0x90]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("0x20000010: E8 90 "));
        assert!(lines[0].ends_with(&format!("|..{}|", " ".repeat(14))));
    }

    #[test]
    fn test_line_addresses() {
        let lines = format(0x401000, &[0; 40]);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("0x00401010:"));
        assert!(lines[2].starts_with("0x00401020:"));
    }
}
