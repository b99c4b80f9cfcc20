//! Source cave and call-site byte builders.

use tracing::debug;

use crate::x86::{
    Addr, CALL_LEN, CALL_NEAR_REL32, JMP_NEAR_REL32, NOP, encode_rel, read_u32, write_u32,
};

/// Fix a relative branch copied from `original` to `cave`.
///
/// Only a `CALL rel32` / `JMP rel32` in the very first byte is handled. Any
/// other position-dependent encoding is copied unchanged. Returns the old and
/// new displacement when a fix-up happened.
pub fn fix_relative(code: &mut [u8], original: Addr, cave: Addr) -> Option<(u32, u32)> {
    if code.len() < CALL_LEN {
        return None;
    }
    if code[0] != CALL_NEAR_REL32 && code[0] != JMP_NEAR_REL32 {
        return None;
    }

    let old = read_u32(code, 1);
    let new = old.wrapping_add(original).wrapping_sub(cave);
    write_u32(code, 1, new);
    debug!("fixing rel.addr. {:#x} to {:#x}", old, new);
    Some((old, new))
}

/// Source cave contents: the relocated original bytes followed by a jump
/// back to the first instruction after the patched window.
pub fn source_cave(original_bytes: &[u8], original: Addr, cave: Addr) -> Vec<u8> {
    let cave_size = original_bytes.len();
    let mut code = Vec::with_capacity(cave_size + CALL_LEN);
    code.extend_from_slice(original_bytes);
    fix_relative(&mut code, original, cave);

    let resume = original.wrapping_add(cave_size as u32);
    let jmp_at = cave.wrapping_add(cave_size as u32);
    code.extend_from_slice(&encode_rel(JMP_NEAR_REL32, jmp_at, resume));
    code
}

/// Bytes written over the patched window: `CALL stub` padded with `NOP`s.
pub fn call_site(address: Addr, stub: Addr, cave_size: usize) -> Vec<u8> {
    let mut code = vec![NOP; cave_size.max(CALL_LEN)];
    code[..CALL_LEN].copy_from_slice(&encode_rel(CALL_NEAR_REL32, address, stub));
    code
}
