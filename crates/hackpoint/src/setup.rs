//! Setup orchestration: descriptions → layout → generated code.
//!
//! ## Example
//!
//! ```ignore
//! use hackpoint::{Engine, HandlerRegistry, ModuleResolver, ProcessMemory};
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register_breakpoint("file_load", |regs, config| {
//!     regs.eax = 0;
//!     hackpoint::cave_exec_flag(config)
//! });
//!
//! let engine = Engine::new(handlers);
//! let mut memory = unsafe { ProcessMemory::new() };
//! let patches = engine.apply(&breakpoints, &ModuleResolver::new(base), &mut memory)?;
//! let patches = patches.leak();
//! ```

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::breakpoint::{AddressResolver, Breakpoint, HandlerRegistry};
use crate::codegen::{self, InstalledSite, Region, Rendered};
use crate::config::EngineConfig;
use crate::dispatch;
use crate::error::{Error, ErrorCategory, Result};
use crate::layout::{self, LayoutPlan};
use crate::memory::CodeMemory;

/// A description that did not make it into the patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBreakpoint {
    pub name: String,
    pub category: ErrorCategory,
    pub reason: String,
}

/// Aggregate outcome of one setup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    /// Descriptions declared
    pub total: usize,
    /// Descriptions with at least one installed site
    pub active: usize,
    /// Installed sites
    pub sites: usize,
    /// Addresses excluded for lack of accessible bytes
    pub invalid_addresses: usize,
    pub skipped: Vec<SkippedBreakpoint>,
}

impl SetupReport {
    pub fn failed(&self) -> usize {
        self.total - self.active
    }
}

/// Everything a setup pass produced.
///
/// Stubs point into `breakpoints`, so the set has to outlive the patched code.
/// Patches are never undone; on a live process use [`PatchSet::leak`].
#[derive(Debug)]
pub struct PatchSet {
    breakpoints: Box<[Breakpoint]>,
    layout: LayoutPlan,
    rendered: Rendered,
    report: SetupReport,
}

impl PatchSet {
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn layout(&self) -> &LayoutPlan {
        &self.layout
    }

    pub fn sites(&self) -> &[InstalledSite] {
        &self.rendered.sites
    }

    pub fn breakpoint_for(&self, site: &InstalledSite) -> &Breakpoint {
        &self.breakpoints[site.breakpoint]
    }

    pub fn source_region(&self) -> Option<Region> {
        self.rendered.source_region
    }

    pub fn call_region(&self) -> Option<Region> {
        self.rendered.call_region
    }

    pub fn report(&self) -> &SetupReport {
        &self.report
    }

    /// Keep the set alive for the rest of the process.
    pub fn leak(self) -> &'static PatchSet {
        Box::leak(Box::new(self))
    }
}

pub struct Engine {
    config: EngineConfig,
    handlers: HandlerRegistry,
}

impl Engine {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self::with_config(handlers, EngineConfig::default())
    }

    pub fn with_config(handlers: HandlerRegistry, config: EngineConfig) -> Self {
        Self { config, handlers }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Build every description of a `{ name: record }` object, in declaration order.
    ///
    /// Descriptions that fail are logged and returned as skipped; the rest
    /// are unaffected.
    pub fn build_breakpoints(
        &self,
        list: &Value,
        resolver: &dyn AddressResolver,
    ) -> Result<(Vec<Breakpoint>, Vec<SkippedBreakpoint>)> {
        let object = list.as_object().ok_or(Error::InvalidBreakpointList)?;

        let mut breakpoints = Vec::with_capacity(object.len());
        let mut skipped = Vec::new();
        for (name, record) in object {
            match Breakpoint::from_json(name, record, &self.handlers, resolver) {
                Ok(bp) => breakpoints.push(bp),
                Err(e) => {
                    if matches!(e, Error::Ignored { .. } | Error::NoAddresses { .. }) {
                        info!("{}", e);
                    } else {
                        warn!("{}", e);
                    }
                    skipped.push(SkippedBreakpoint {
                        name: name.clone(),
                        category: e.category(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok((breakpoints, skipped))
    }

    pub fn plan<M: CodeMemory + ?Sized>(&self, breakpoints: &[Breakpoint], memory: &M) -> LayoutPlan {
        layout::plan(breakpoints, memory, self.config.stub.size())
    }

    /// Build, plan and render a breakpoint list.
    ///
    /// Only an allocation failure (or a broken setup environment) fails the
    /// whole pass; every other problem skips the affected description.
    pub fn apply<M: CodeMemory + ?Sized>(
        &self,
        list: &Value,
        resolver: &dyn AddressResolver,
        memory: &mut M,
    ) -> Result<PatchSet> {
        info!("Setting up breakpoints...");

        let (breakpoints, mut skipped) = self.build_breakpoints(list, resolver)?;
        let total = breakpoints.len() + skipped.len();
        let breakpoints = breakpoints.into_boxed_slice();

        let layout = self.plan(&breakpoints, memory);
        for entry in layout.entries.iter().filter(|e| !e.is_active()) {
            warn!("{}: no valid addresses, skipping", entry.name);
            skipped.push(SkippedBreakpoint {
                name: entry.name.clone(),
                category: ErrorCategory::Resolution,
                reason: format!("breakpoint {}: no valid addresses", entry.name),
            });
        }

        let rendered = if layout.is_empty() {
            Rendered::default()
        } else {
            let dispatch = self
                .config
                .dispatch_address
                .or_else(dispatch::entry_address)
                .ok_or(Error::NoDispatchAddress)?;
            codegen::render(&breakpoints, &layout, memory, &self.config.stub, dispatch)?
        };

        let report = SetupReport {
            total,
            active: layout.active_count(),
            sites: rendered.sites.len(),
            invalid_addresses: layout.invalid_address_count(),
            skipped,
        };
        info!(
            "{} of {} breakpoints active ({} sites, {} skipped)",
            report.active,
            report.total,
            report.sites,
            report.failed()
        );

        Ok(PatchSet {
            breakpoints,
            layout,
            rendered,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::ModuleResolver;
    use crate::memory::ImageMemory;
    use crate::x86::{Addr, CALL_NEAR_REL32, branch_target, read_u32};
    use serde_json::json;

    const BASE: Addr = 0x400000;
    const IMAGE: Addr = 0x401000;
    const DISPATCH: Addr = 0x1000_0000;

    fn image() -> Vec<u8> {
        (0..0x400u32).map(|i| (i % 0x60) as u8).collect()
    }

    fn memory() -> ImageMemory {
        let mut memory = ImageMemory::new();
        memory.load_image(IMAGE, image()).unwrap();
        memory
    }

    fn engine(names: &[&str]) -> Engine {
        let mut handlers = HandlerRegistry::new();
        for name in names {
            handlers.register_breakpoint(name, |_, config| crate::breakpoint::cave_exec_flag(config));
        }
        let config = EngineConfig::builder().dispatch_address(DISPATCH).build();
        Engine::with_config(handlers, config)
    }

    #[test]
    fn test_end_to_end_skips_invalid_description() {
        let list = json!({
            "first": { "addr": "Rx1010", "cavesize": 6 },
            "second": { "addr": ["0x900000", "Rx13FE"], "cavesize": 8 },
            "third": { "addr": "0x401200", "cavesize": 5 },
        });
        let engine = engine(&["first", "second", "third"]);
        let mut memory = memory();
        let patches = engine
            .apply(&list, &ModuleResolver::new(BASE), &mut memory)
            .unwrap();

        let report = patches.report();
        assert_eq!(report.total, 3);
        assert_eq!(report.active, 2);
        assert_eq!(report.sites, 2);
        assert_eq!(report.invalid_addresses, 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "second");
        assert_eq!(report.skipped[0].category, ErrorCategory::Resolution);

        let source = patches.source_region().unwrap();
        let call = patches.call_region().unwrap();
        assert_eq!(source.size, 2 * 16);
        assert_eq!(call.size, 2 * engine.config().stub.size());

        let names: Vec<_> = patches
            .sites()
            .iter()
            .map(|s| patches.breakpoint_for(s).name())
            .collect();
        assert_eq!(names, vec!["first", "third"]);

        // Only the two cave-size windows changed.
        let before = image();
        let after = memory.bytes_at(IMAGE, before.len()).unwrap();
        for (offset, (a, b)) in before.iter().zip(after).enumerate() {
            let addr = IMAGE + offset as u32;
            let patched = (0x401010..0x401016).contains(&addr) || (0x401200..0x401205).contains(&addr);
            if !patched {
                assert_eq!(a, b, "byte at {addr:#x} changed");
            }
        }
        for site in patches.sites() {
            let bytes = memory.bytes_at(site.address, 5).unwrap();
            assert_eq!(bytes[0], CALL_NEAR_REL32);
            assert_eq!(branch_target(site.address, read_u32(bytes, 1)), site.call_cave);
        }
    }

    #[test]
    fn test_multi_address_description() {
        let list = json!({
            "hook": { "addr": ["Rx1020", "Rx1100"], "cavesize": 7, "marker": 1 },
        });
        let engine = engine(&["hook"]);
        let mut memory = memory();
        let patches = engine
            .apply(&list, &ModuleResolver::new(BASE), &mut memory)
            .unwrap();

        assert_eq!(patches.report().active, 1);
        let sites = patches.sites();
        assert_eq!(sites.len(), 2);
        assert_ne!(sites[0].source_cave, sites[1].source_cave);
        assert_ne!(sites[0].call_cave, sites[1].call_cave);
        assert_eq!(sites[0].descriptor, sites[1].descriptor);
        let (source, call) = (patches.source_region().unwrap(), patches.call_region().unwrap());
        for site in sites {
            assert!(source.contains(site.source_cave));
            assert!(call.contains(site.call_cave));
        }

        let bp = patches.breakpoint_for(&sites[0]);
        assert!(std::ptr::eq(bp, patches.breakpoint_for(&sites[1])));
        assert_eq!(bp.config()["marker"], 1);
        assert_eq!(
            memory.resolve_pointer(sites[0].descriptor),
            Some(bp as *const Breakpoint as usize)
        );
    }

    #[test]
    fn test_configuration_errors_are_isolated() {
        let list = json!({
            "not_object": 5,
            "too_small": { "addr": "Rx1000", "cavesize": 4 },
            "no_handler": { "addr": "Rx1040", "cavesize": 5 },
            "not_here": { "addr": 0, "cavesize": 5 },
            "ignored": { "addr": "Rx1080", "cavesize": 5, "ignore": true },
            "good#1": { "addr": "Rx1100", "cavesize": 5 },
            "good#2": { "addr": "Rx1180", "cavesize": 5 },
        });
        let engine = engine(&["not_object", "too_small", "not_here", "ignored", "good"]);
        let mut memory = memory();
        let patches = engine
            .apply(&list, &ModuleResolver::new(BASE), &mut memory)
            .unwrap();

        let report = patches.report();
        assert_eq!(report.total, 7);
        assert_eq!(report.active, 2);
        let categories: Vec<_> = report
            .skipped
            .iter()
            .map(|s| (s.name.as_str(), s.category))
            .collect();
        assert_eq!(
            categories,
            vec![
                ("not_object", ErrorCategory::Configuration),
                ("too_small", ErrorCategory::Configuration),
                ("no_handler", ErrorCategory::HandlerNotFound),
                ("not_here", ErrorCategory::Resolution),
                ("ignored", ErrorCategory::Configuration),
            ]
        );
        assert_eq!(patches.breakpoints()[0].handler_key(), "BP_good");
        assert_eq!(patches.breakpoints()[1].handler_key(), "BP_good");
    }

    #[test]
    fn test_oversized_cave_size_is_skipped() {
        let list = json!({
            "big": { "addr": "0x401000", "cavesize": u64::MAX },
            "big_hex": { "addr": "0x401000", "cavesize": "0xFFFFFFFF" },
            "ok": { "addr": "Rx1040", "cavesize": 5 },
        });
        let engine = engine(&["big", "big_hex", "ok"]);
        let mut memory = memory();
        let patches = engine
            .apply(&list, &ModuleResolver::new(BASE), &mut memory)
            .unwrap();

        let report = patches.report();
        assert_eq!(report.total, 3);
        assert_eq!(report.active, 1);
        let skipped: Vec<_> = report
            .skipped
            .iter()
            .map(|s| (s.name.as_str(), s.category))
            .collect();
        assert_eq!(
            skipped,
            vec![
                ("big", ErrorCategory::Configuration),
                ("big_hex", ErrorCategory::Configuration),
            ]
        );

        let site = patches.sites()[0];
        assert_eq!(site.address, 0x401040);
        assert_eq!(memory.bytes_at(0x401040, 1).unwrap()[0], CALL_NEAR_REL32);
        assert_eq!(memory.bytes_at(IMAGE, 0x40).unwrap(), &image()[..0x40]);
    }

    #[test]
    fn test_allocation_failure_aborts() {
        let list = json!({ "first": { "addr": "Rx1010", "cavesize": 6 } });
        let engine = engine(&["first"]);
        let mut memory = memory();
        memory.set_allocation_limit(Some(0));

        let err = engine
            .apply(&list, &ModuleResolver::new(BASE), &mut memory)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(memory.bytes_at(IMAGE, 0x400).unwrap(), image().as_slice());
    }

    #[test]
    fn test_nothing_to_render() {
        let list = json!({ "first": { "addr": "0x900000", "cavesize": 6 } });
        let engine = engine(&["first"]);
        let mut memory = memory();
        memory.set_allocation_limit(Some(0));

        let patches = engine
            .apply(&list, &ModuleResolver::new(BASE), &mut memory)
            .unwrap();
        assert_eq!(patches.report().active, 0);
        assert!(patches.sites().is_empty());
        assert!(patches.source_region().is_none());
    }

    #[test]
    fn test_list_must_be_object() {
        let engine = engine(&[]);
        let err = engine
            .apply(&json!([1, 2]), &ModuleResolver::new(BASE), &mut memory())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBreakpointList));
    }
}
