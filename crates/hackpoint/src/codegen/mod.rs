//! Machine code generation.
//!
//! For every [`PatchSite`] the generator writes
//!
//! 1. the original bytes, relocated, plus a jump back into the source cave slot
//! 2. a stub instance into the call cave slot
//! 3. a `CALL` to that stub over the original bytes
//!
//! and finally makes both regions execute-only.

mod cave;
mod stub;

use serde::Serialize;
use tracing::{debug, info};

use crate::breakpoint::Breakpoint;
use crate::error::Result;
use crate::layout::{LayoutPlan, PatchSite};
use crate::memory::CodeMemory;
use crate::x86::{Addr, INT3};

pub use cave::{call_site, fix_relative, source_cave};
pub use stub::{STUB_SCRATCH, StubTemplate};

/// A contiguous engine-owned allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub base: Addr,
    pub size: usize,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.base as u64 + self.size as u64
    }

    pub fn contains(&self, address: Addr) -> bool {
        address >= self.base && (address as u64) < self.end()
    }
}

/// Addresses of one rendered patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstalledSite {
    pub breakpoint: usize,
    pub address: Addr,
    pub cave_size: usize,
    pub source_cave: Addr,
    pub call_cave: Addr,
    /// Value embedded in the stub to reference the breakpoint
    pub descriptor: Addr,
}

/// Output of a render pass.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub source_region: Option<Region>,
    pub call_region: Option<Region>,
    pub sites: Vec<InstalledSite>,
}

/// Write every planned site into `memory`.
///
/// `breakpoints` must be the slice the plan was made from, at its final
/// address: stubs embed pointers to its elements.
pub fn render<M: CodeMemory + ?Sized>(
    breakpoints: &[Breakpoint],
    layout: &LayoutPlan,
    memory: &mut M,
    stub: &StubTemplate,
    dispatch: Addr,
) -> Result<Rendered> {
    if layout.is_empty() {
        info!("No breakpoints to render.");
        return Ok(Rendered::default());
    }
    debug_assert_eq!(layout.stub_size, stub.size());

    let source_base = memory.allocate(layout.source_cave_size)?;
    memory.write(source_base, &vec![INT3; layout.source_cave_size])?;
    let call_base = memory.allocate(layout.call_cave_size)?;

    info!(
        "Rendering breakpoints... (source cave at {:#x}, call cave at {:#x})",
        source_base, call_base
    );

    let mut sites = Vec::with_capacity(layout.sites.len());
    for site in &layout.sites {
        let bp = &breakpoints[site.breakpoint];
        let installed = render_site(bp, site, memory, stub, dispatch, source_base, call_base)?;
        sites.push(installed);
    }

    memory.protect_execute(source_base, layout.source_cave_size)?;
    memory.protect_execute(call_base, layout.call_cave_size)?;

    Ok(Rendered {
        source_region: Some(Region {
            base: source_base,
            size: layout.source_cave_size,
        }),
        call_region: Some(Region {
            base: call_base,
            size: layout.call_cave_size,
        }),
        sites,
    })
}

fn render_site<M: CodeMemory + ?Sized>(
    bp: &Breakpoint,
    site: &PatchSite,
    memory: &mut M,
    stub: &StubTemplate,
    dispatch: Addr,
    source_base: Addr,
    call_base: Addr,
) -> Result<InstalledSite> {
    let source_slot = source_base.wrapping_add(site.source_offset as u32);
    let call_slot = call_base.wrapping_add(site.call_offset as u32);
    let descriptor = memory.export_pointer(bp as *const Breakpoint as usize)?;

    let original = memory.read(site.address, site.cave_size)?;
    memory.write(source_slot, &source_cave(&original, site.address, source_slot))?;
    memory.write(
        call_slot,
        &stub.instantiate(call_slot, source_slot, descriptor, dispatch),
    )?;
    memory.patch(site.address, &call_site(site.address, call_slot, site.cave_size))?;

    debug!(
        "{} at {:#x}: source cave {:#x}, call cave {:#x}",
        bp.name(),
        site.address,
        source_slot,
        call_slot
    );

    Ok(InstalledSite {
        breakpoint: site.breakpoint,
        address: site.address,
        cave_size: site.cave_size,
        source_cave: source_slot,
        call_cave: call_slot,
        descriptor,
    })
}
