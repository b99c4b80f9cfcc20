//! Simulated address space.

use strum::Display;
use tracing::debug;

use super::CodeMemory;
use crate::error::{Error, Result};
use crate::x86::{Addr, align_up};

const PAGE_SIZE: usize = 0x1000;

/// Default base for allocations
pub const DEFAULT_ALLOCATION_BASE: Addr = 0x2000_0000;

/// Base of the window used for exported host pointers
pub const EXPORT_BASE: Addr = 0x7FF0_0000;

/// Granularity of exported pointer slots
const EXPORT_STRIDE: u32 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Protection {
    ReadWrite,
    ReadExecute,
    Execute,
}

impl Protection {
    pub fn is_readable(self) -> bool {
        matches!(self, Protection::ReadWrite | Protection::ReadExecute)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Protection::ReadWrite)
    }
}

#[derive(Debug, Clone)]
struct Segment {
    base: Addr,
    bytes: Vec<u8>,
    protection: Protection,
}

impl Segment {
    fn end(&self) -> u64 {
        self.base as u64 + self.bytes.len() as u64
    }

    fn contains(&self, address: Addr, len: usize) -> bool {
        address >= self.base && address as u64 + len as u64 <= self.end()
    }

    fn range(&self, address: Addr, len: usize) -> std::ops::Range<usize> {
        let start = (address - self.base) as usize;
        start..start + len
    }
}

/// A 32-bit address space made of mapped segments.
///
/// Loaded images are mapped read-execute; allocations are page aligned,
/// separated by one unmapped guard page, and start out read-write.
///
/// Every access must lie inside a single mapping. A range that runs from one
/// mapping into an adjacent one is treated as unmapped, even when both sides
/// are readable.
#[derive(Debug, Clone)]
pub struct ImageMemory {
    segments: Vec<Segment>,
    next_allocation: u64,
    allocation_limit: Option<usize>,
    allocated: usize,
    exported: Vec<usize>,
}

impl Default for ImageMemory {
    fn default() -> Self {
        Self::with_allocation_base(DEFAULT_ALLOCATION_BASE)
    }
}

impl ImageMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocation_base(base: Addr) -> Self {
        Self {
            segments: Vec::new(),
            next_allocation: base as u64,
            allocation_limit: None,
            allocated: 0,
            exported: Vec::new(),
        }
    }

    /// Cap the total number of bytes [`CodeMemory::allocate`] may hand out.
    pub fn set_allocation_limit(&mut self, limit: Option<usize>) {
        self.allocation_limit = limit;
    }

    /// Map `bytes` at `base` with the given protection.
    pub fn map(&mut self, base: Addr, bytes: Vec<u8>, protection: Protection) -> Result<()> {
        let size = bytes.len();
        let end = base as u64 + size as u64;
        if size == 0 || end > u32::MAX as u64 + 1 {
            return Err(Error::MemoryAccess {
                address: base,
                size,
                message: "segment does not fit the address space".to_string(),
            });
        }
        if self
            .segments
            .iter()
            .any(|s| (base as u64) < s.end() && end > s.base as u64)
        {
            return Err(Error::MemoryAccess {
                address: base,
                size,
                message: "segment overlaps an existing mapping".to_string(),
            });
        }

        self.segments.push(Segment {
            base,
            bytes,
            protection,
        });
        self.segments.sort_by_key(|s| s.base);
        Ok(())
    }

    /// Map a code image read-execute at `base`.
    pub fn load_image(&mut self, base: Addr, bytes: Vec<u8>) -> Result<()> {
        self.map(base, bytes, Protection::ReadExecute)
    }

    pub fn protection_at(&self, address: Addr) -> Option<Protection> {
        self.segment(address, 1).map(|s| s.protection)
    }

    /// Raw view of mapped bytes, ignoring protection.
    pub fn bytes_at(&self, address: Addr, len: usize) -> Option<&[u8]> {
        let segment = self.segment(address, len)?;
        Some(&segment.bytes[segment.range(address, len)])
    }

    /// Host pointer behind an address produced by [`CodeMemory::export_pointer`].
    pub fn resolve_pointer(&self, address: Addr) -> Option<usize> {
        let offset = address.checked_sub(EXPORT_BASE)?;
        if offset % EXPORT_STRIDE != 0 {
            return None;
        }
        self.exported.get((offset / EXPORT_STRIDE) as usize).copied()
    }

    /// The mapping holding all of `address..address + len`.
    fn segment(&self, address: Addr, len: usize) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(address, len))
    }

    fn segment_mut(&mut self, address: Addr, len: usize) -> Result<&mut Segment> {
        self.segments
            .iter_mut()
            .find(|s| s.contains(address, len))
            .ok_or_else(|| Error::MemoryAccess {
                address,
                size: len,
                message: "not mapped".to_string(),
            })
    }
}

impl CodeMemory for ImageMemory {
    fn allocate(&mut self, size: usize) -> Result<Addr> {
        let fail = |message: &str| Error::AllocationFailed {
            size,
            message: message.to_string(),
        };

        if size == 0 {
            return Err(fail("zero-sized allocation"));
        }
        if let Some(limit) = self.allocation_limit {
            if self.allocated.saturating_add(size) > limit {
                return Err(fail("allocation limit reached"));
            }
        }

        let base = self.next_allocation;
        let reserved = align_up(size, PAGE_SIZE) as u64;
        if base + reserved > u32::MAX as u64 {
            return Err(fail("address space exhausted"));
        }
        let base = base as Addr;
        self.map(base, vec![0; size], Protection::ReadWrite)
            .map_err(|e| fail(&e.to_string()))?;

        self.next_allocation += reserved + PAGE_SIZE as u64;
        self.allocated += size;
        debug!("allocated {} bytes at {:#x}", size, base);
        Ok(base)
    }

    fn protect_execute(&mut self, base: Addr, size: usize) -> Result<()> {
        let segment = self.segment_mut(base, size).map_err(|e| Error::ProtectFailed {
            address: base,
            message: e.to_string(),
        })?;
        if segment.base != base || segment.bytes.len() != size {
            return Err(Error::ProtectFailed {
                address: base,
                message: "range does not match an allocation".to_string(),
            });
        }
        segment.protection = Protection::Execute;
        Ok(())
    }

    /// True only when one readable mapping covers the whole range.
    fn check_region(&self, address: Addr, len: usize) -> bool {
        address != 0
            && self
                .segment(address, len)
                .is_some_and(|s| s.protection.is_readable())
    }

    fn read(&self, address: Addr, len: usize) -> Result<Vec<u8>> {
        match self.segment(address, len) {
            Some(s) if s.protection.is_readable() => Ok(s.bytes[s.range(address, len)].to_vec()),
            Some(s) => Err(Error::MemoryAccess {
                address,
                size: len,
                message: format!("not readable ({})", s.protection),
            }),
            None => Err(Error::MemoryAccess {
                address,
                size: len,
                message: "not mapped".to_string(),
            }),
        }
    }

    fn write(&mut self, address: Addr, bytes: &[u8]) -> Result<()> {
        let segment = self.segment_mut(address, bytes.len())?;
        if !segment.protection.is_writable() {
            return Err(Error::MemoryAccess {
                address,
                size: bytes.len(),
                message: format!("not writable ({})", segment.protection),
            });
        }
        let range = segment.range(address, bytes.len());
        segment.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    fn patch(&mut self, address: Addr, bytes: &[u8]) -> Result<()> {
        let segment = self.segment_mut(address, bytes.len())?;
        let range = segment.range(address, bytes.len());
        segment.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    fn export_pointer(&mut self, host: usize) -> Result<Addr> {
        let index = match self.exported.iter().position(|&p| p == host) {
            Some(index) => index,
            None => {
                self.exported.push(host);
                self.exported.len() - 1
            }
        };
        u32::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(EXPORT_STRIDE))
            .and_then(|off| EXPORT_BASE.checked_add(off))
            .ok_or(Error::PointerOutOfRange(host))
    }
}
