//! # hackpoint
//!
//! Runtime code-patching engine for 32-bit x86 processes.
//!
//! Each breakpoint overwrites a few bytes of existing code with a `CALL` into
//! a generated stub. The stub saves the registers and hands them to a
//! handler, which may modify them and decide whether the overwritten
//! instructions still run.
//!
//! This crate provides:
//! - Breakpoint descriptions built from JSON configuration records
//! - Layout planning for the source cave and call cave regions
//! - Machine code generation for caves, stubs and patched call sites
//! - The runtime dispatcher called by every stub
//! - A live process backend (Windows) and a simulated image backend
//!
//! ## Flow
//!
//! ```text
//! JSON records ─► Breakpoint ─► LayoutPlan ─► render ─► PatchSet
//!                   (handler        (slots)     (bytes in
//!                    lookup)                     CodeMemory)
//! ```

pub mod breakpoint;
pub mod codegen;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod memory;
pub mod regs;
pub mod setup;
pub mod x86;

pub use breakpoint::{
    AddressResolver, Breakpoint, CandidateAddress, Handler, HandlerFn, HandlerRegistry,
    ModuleResolver, cave_exec_flag, handler_key,
};
pub use codegen::{InstalledSite, Region, Rendered, StubTemplate, render};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use dispatch::breakpoint_process;
pub use error::{Error, ErrorCategory, Result};
pub use layout::{AddressCheck, LayoutPlan, PatchSite, PlanEntry, plan};
#[cfg(target_os = "windows")]
pub use memory::ProcessMemory;
pub use memory::{CodeMemory, ImageMemory, Protection};
pub use regs::{Register, SNAPSHOT_SIZE, X86Regs};
pub use setup::{Engine, PatchSet, SetupReport, SkippedBreakpoint};
pub use x86::Addr;
