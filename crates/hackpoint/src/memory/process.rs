//! Patching the current process.

use std::ffi::c_void;

use tracing::debug;
use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RESERVE, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READWRITE,
    PAGE_GUARD, PAGE_NOACCESS, PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualAlloc,
    VirtualProtect, VirtualQuery,
};
use windows::Win32::System::Threading::GetCurrentProcess;

use super::{CodeMemory, range_end};
use crate::error::{Error, Result};
use crate::x86::Addr;

/// Memory of the running process.
pub struct ProcessMemory {
    _private: (),
}

impl ProcessMemory {
    /// # Safety
    ///
    /// Everything rendered through this value patches live code. Addresses
    /// handed to the engine must point at instructions that no thread is
    /// executing during setup, and the resulting `PatchSet` must stay alive
    /// for as long as the patched code can run.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

fn to_addr(ptr: *const c_void, size: usize) -> Result<Addr> {
    Addr::try_from(ptr as usize).map_err(|_| Error::AllocationFailed {
        size,
        message: format!("allocation at {:p} is outside the 32-bit address space", ptr),
    })
}

fn is_accessible(protect: PAGE_PROTECTION_FLAGS) -> bool {
    protect != PAGE_NOACCESS && protect != PAGE_EXECUTE && (protect & PAGE_GUARD).0 == 0
}

impl CodeMemory for ProcessMemory {
    fn allocate(&mut self, size: usize) -> Result<Addr> {
        // SAFETY: fresh private allocation, nothing else refers to it.
        let ptr = unsafe { VirtualAlloc(None, size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        if ptr.is_null() {
            return Err(Error::AllocationFailed {
                size,
                message: windows::core::Error::from_win32().to_string(),
            });
        }
        debug!("VirtualAlloc({}) = {:p}", size, ptr);
        to_addr(ptr, size)
    }

    fn protect_execute(&mut self, base: Addr, size: usize) -> Result<()> {
        let mut old = PAGE_PROTECTION_FLAGS(0);
        // SAFETY: the range was returned by `allocate` and is owned by the engine.
        unsafe { VirtualProtect(base as usize as *const c_void, size, PAGE_EXECUTE, &mut old) }
            .map_err(|e| Error::ProtectFailed {
                address: base,
                message: e.to_string(),
            })
    }

    fn check_region(&self, address: Addr, len: usize) -> bool {
        if address == 0 {
            return false;
        }
        let Some(end) = range_end(address as usize, len) else {
            return false;
        };
        let mut cursor = address as usize;
        while cursor < end {
            let mut mbi = MEMORY_BASIC_INFORMATION::default();
            // SAFETY: VirtualQuery only inspects the page tables.
            let written = unsafe {
                VirtualQuery(
                    Some(cursor as *const c_void),
                    &mut mbi,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 || mbi.State != MEM_COMMIT || !is_accessible(mbi.Protect) {
                return false;
            }
            let Some(region_end) = range_end(mbi.BaseAddress as usize, mbi.RegionSize) else {
                return false;
            };
            if region_end <= cursor {
                return false;
            }
            cursor = region_end;
        }
        true
    }

    fn read(&self, address: Addr, len: usize) -> Result<Vec<u8>> {
        if !self.check_region(address, len) {
            return Err(Error::MemoryAccess {
                address,
                size: len,
                message: "region is not readable".to_string(),
            });
        }
        // SAFETY: the whole range is committed and readable.
        let slice = unsafe { std::slice::from_raw_parts(address as usize as *const u8, len) };
        Ok(slice.to_vec())
    }

    fn write(&mut self, address: Addr, bytes: &[u8]) -> Result<()> {
        // SAFETY: only called on engine-owned read-write allocations.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as usize as *mut u8, bytes.len());
        }
        Ok(())
    }

    fn patch(&mut self, address: Addr, bytes: &[u8]) -> Result<()> {
        let target = address as usize as *const c_void;
        let mut old = PAGE_PROTECTION_FLAGS(0);
        // SAFETY: the range passed `check_region` during planning; protection is
        // restored right after the copy.
        unsafe {
            VirtualProtect(target, bytes.len(), PAGE_EXECUTE_READWRITE, &mut old).map_err(|e| {
                Error::ProtectFailed {
                    address,
                    message: e.to_string(),
                }
            })?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), target as *mut u8, bytes.len());
            VirtualProtect(target, bytes.len(), old, &mut old).ok();
            FlushInstructionCache(GetCurrentProcess(), Some(target), bytes.len()).ok();
        }
        Ok(())
    }

    fn export_pointer(&mut self, host: usize) -> Result<Addr> {
        Addr::try_from(host).map_err(|_| Error::PointerOutOfRange(host))
    }
}
