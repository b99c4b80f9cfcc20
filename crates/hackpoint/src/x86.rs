//! Instruction encoding for the one architecture the engine targets.
//!
//! Everything here is 32-bit x86. Addresses are `u32` and all displacement
//! arithmetic wraps at 32 bits, exactly as the CPU does when it adds a
//! `rel32` to the address of the next instruction.

/// Address in the patched (32-bit) address space
pub type Addr = u32;

/// Size of a pointer / `rel32` displacement
pub const PTR_SIZE: usize = 4;

/// Length of a near relative call or jump (opcode + rel32)
pub const CALL_LEN: usize = PTR_SIZE + 1;

pub const CALL_NEAR_REL32: u8 = 0xE8;
pub const JMP_NEAR_REL32: u8 = 0xE9;
pub const NOP: u8 = 0x90;
pub const INT3: u8 = 0xCC;

/// Alignment of every source cave slot
pub const CAVE_ALIGN: usize = 16;

/// Largest cave size whose source slot still fits the 32-bit address space
pub const MAX_CAVE_SIZE: usize = u32::MAX as usize - CALL_LEN - CAVE_ALIGN;

/// Round `value` up to a multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Size of the source cave slot needed for a breakpoint overwriting `cave_size` bytes.
///
/// `cave_size` must not exceed [`MAX_CAVE_SIZE`].
pub const fn source_slot_size(cave_size: usize) -> usize {
    align_up(cave_size + CALL_LEN, CAVE_ALIGN)
}

/// Displacement that reaches `to` from an instruction ending at `from_end`.
pub const fn rel32(from_end: Addr, to: Addr) -> u32 {
    to.wrapping_sub(from_end)
}

/// Encode `opcode rel32` placed at `at` and branching to `target`.
pub fn encode_rel(opcode: u8, at: Addr, target: Addr) -> [u8; CALL_LEN] {
    let mut bytes = [0u8; CALL_LEN];
    bytes[0] = opcode;
    let disp = rel32(at.wrapping_add(CALL_LEN as u32), target);
    bytes[1..].copy_from_slice(&disp.to_le_bytes());
    bytes
}

/// Absolute target of a `rel32` branch located at `at`.
pub fn branch_target(at: Addr, disp: u32) -> Addr {
    at.wrapping_add(CALL_LEN as u32).wrapping_add(disp)
}

/// Read a little-endian u32 at `offset`.
///
/// Panics if the buffer is too short; callers size their buffers from the
/// same constants.
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; PTR_SIZE];
    raw.copy_from_slice(&buf[offset..offset + PTR_SIZE]);
    u32::from_le_bytes(raw)
}

/// Write a little-endian u32 at `offset`.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + PTR_SIZE].copy_from_slice(&value.to_le_bytes());
}
