//! Memory primitives the engine needs from its host.
//!
//! [`CodeMemory`] is implemented twice: [`ProcessMemory`] patches the running
//! process (Windows only), [`ImageMemory`] is a simulated 32-bit address space
//! used for offline rendering and tests.

mod image;
#[cfg(target_os = "windows")]
mod process;

pub use image::{ImageMemory, Protection};
#[cfg(target_os = "windows")]
pub use process::ProcessMemory;

use crate::error::Result;
use crate::x86::Addr;

pub trait CodeMemory {
    /// Allocate `size` bytes of private read-write memory.
    fn allocate(&mut self, size: usize) -> Result<Addr>;

    /// Switch an allocated region to execute-only.
    fn protect_execute(&mut self, base: Addr, size: usize) -> Result<()>;

    /// Whether `len` bytes of existing code at `address` can be read and patched.
    fn check_region(&self, address: Addr, len: usize) -> bool;

    fn read(&self, address: Addr, len: usize) -> Result<Vec<u8>>;

    /// Write into engine-owned memory that is still writable.
    fn write(&mut self, address: Addr, bytes: &[u8]) -> Result<()>;

    /// Overwrite host code regardless of its current protection.
    fn patch(&mut self, address: Addr, bytes: &[u8]) -> Result<()>;

    /// Address under which a host object is referenced from generated code.
    fn export_pointer(&mut self, host: usize) -> Result<Addr>;
}

/// One past the last byte of `len` bytes at `address`, if that fits in the
/// host address space.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn range_end(address: usize, len: usize) -> Option<usize> {
    address.checked_add(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_end() {
        assert_eq!(range_end(0x401000, 0x10), Some(0x401010));
        assert_eq!(range_end(0x401000, 0), Some(0x401000));
        assert_eq!(range_end(usize::MAX - 0xF, 0x10), None);
        assert_eq!(range_end(usize::MAX - 0xF, 0x20), None);
        assert_eq!(range_end(usize::MAX - 0x10, 0x10), Some(usize::MAX));
    }
}
