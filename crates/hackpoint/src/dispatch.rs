//! Runtime dispatch.
//!
//! The stub saves the registers as one block on the stack, calls
//! [`breakpoint_process`], adds the returned value to its stack pointer, and
//! restores the block with `POPAD; POPFD; RET`. `POPAD` skips the saved
//! `esp`, so a stack pointer change requested by the handler is realised by
//! moving the whole block by the requested delta: after the restore, the
//! stack pointer ends up `SNAPSHOT_SIZE` bytes above the moved block, which
//! is exactly the requested value.

use std::ptr;

use tracing::trace;

use crate::breakpoint::Breakpoint;
use crate::regs::{SNAPSHOT_SIZE, X86Regs};
use crate::x86::Addr;

/// Result of running a breakpoint's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Execution resumes in the source cave
    pub diverted: bool,
    /// Requested change of the stack pointer, in bytes
    pub stack_delta: i32,
}

/// Run the handler and update the snapshot's resume address.
///
/// Does not move the snapshot; see [`relocate_snapshot`].
pub fn invoke(bp: &Breakpoint, cave: Addr, regs: &mut X86Regs) -> Dispatch {
    let esp_prev = regs.esp;

    let diverted = bp.invoke(regs);
    if diverted {
        regs.retaddr = cave;
    }

    let stack_delta = regs.esp.wrapping_sub(esp_prev) as i32;
    trace!(
        "{}: diverted={} stack_delta={}",
        bp.name(),
        diverted,
        stack_delta
    );

    Dispatch {
        diverted,
        stack_delta,
    }
}

/// Move the snapshot `delta` bytes, toward the handler's new stack pointer.
///
/// # Safety
///
/// `regs` must point at a snapshot with `delta` bytes of writable memory on
/// the side it moves to, none of which may belong to a live Rust object.
pub unsafe fn relocate_snapshot(regs: *mut X86Regs, delta: i32) -> *mut X86Regs {
    if delta == 0 {
        return regs;
    }
    let src = regs.cast::<u8>();
    // SAFETY: the caller guarantees the destination range is ours to write.
    unsafe {
        let dst = src.offset(delta as isize);
        ptr::copy(src, dst, SNAPSHOT_SIZE);
        dst.cast()
    }
}

/// Entry called by every stub instance.
///
/// Returns the number of bytes the stub must add to its stack pointer before
/// restoring the registers.
///
/// # Safety
///
/// Only to be called by a stub rendered for `bp`: `bp` points at a live
/// [`Breakpoint`], `regs` at the block the stub saved, with the stub's
/// scratch area below it.
pub unsafe extern "C" fn breakpoint_process(
    bp: *const Breakpoint,
    cave: usize,
    regs: *mut X86Regs,
) -> isize {
    // SAFETY: see the function contract.
    let (bp, snapshot) = unsafe { (&*bp, &mut *regs) };
    let dispatch = invoke(bp, cave as Addr, snapshot);

    if dispatch.stack_delta != 0 {
        // SAFETY: the stub reserves room below the block, and above it lies
        // the interrupted code's stack, which the handler asked to shrink.
        unsafe { relocate_snapshot(regs, dispatch.stack_delta) };
    }
    dispatch.stack_delta as isize
}

/// Address the stubs call, when running on the target architecture.
pub fn entry_address() -> Option<Addr> {
    Addr::try_from(breakpoint_process as *const () as usize).ok()
}
