//! Layout planning for source caves and call caves.
//!
//! Every candidate address that passes validation becomes a [`PatchSite`]
//! with one slot in each region. Slots are handed out in description order,
//! then address order, so the same input always yields the same layout.
//!
//! ```text
//!  source cave region                    call cave region
//! ┌──────────────────────────┐          ┌───────────────┐
//! │ site 0: orig bytes + JMP │ align16  │ site 0: stub  │ stub size
//! ├──────────────────────────┤          ├───────────────┤
//! │ site 1: orig bytes + JMP │          │ site 1: stub  │
//! └──────────────────────────┘          └───────────────┘
//! ```

use tracing::{debug, info};

use crate::breakpoint::{Breakpoint, CandidateAddress};
use crate::memory::CodeMemory;
use crate::x86::{Addr, source_slot_size};

/// Outcome of validating one candidate address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressCheck {
    Valid(Addr),
    /// Not applicable to this build
    Null,
    /// Could not be resolved when the description was built
    Unresolved,
    /// Fewer than `cave_size` accessible bytes at the address
    InsufficientBytes(Addr),
}

impl AddressCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, AddressCheck::Valid(_))
    }
}

/// Per-description planning diagnostics, one check per candidate address.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub breakpoint: usize,
    pub name: String,
    pub checks: Vec<AddressCheck>,
}

impl PlanEntry {
    pub fn valid_count(&self) -> usize {
        self.checks.iter().filter(|c| c.is_valid()).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c, AddressCheck::InsufficientBytes(_)))
            .count()
    }

    pub fn is_active(&self) -> bool {
        self.valid_count() > 0
    }
}

/// A validated `(address, breakpoint)` pair with its slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    /// Index into the planned breakpoint slice
    pub breakpoint: usize,
    pub address: Addr,
    pub cave_size: usize,
    /// Offset of the slot inside the source cave region
    pub source_offset: usize,
    pub source_slot_size: usize,
    /// Offset of the slot inside the call cave region
    pub call_offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LayoutPlan {
    pub sites: Vec<PatchSite>,
    pub entries: Vec<PlanEntry>,
    pub source_cave_size: usize,
    pub call_cave_size: usize,
    pub stub_size: usize,
}

impl LayoutPlan {
    /// Number of descriptions with at least one valid address
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_active()).count()
    }

    /// Addresses excluded for lack of accessible bytes
    pub fn invalid_address_count(&self) -> usize {
        self.entries.iter().map(PlanEntry::invalid_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Validate every candidate address and size both regions.
pub fn plan<M: CodeMemory + ?Sized>(
    breakpoints: &[Breakpoint],
    memory: &M,
    stub_size: usize,
) -> LayoutPlan {
    let mut layout = LayoutPlan {
        stub_size,
        ..Default::default()
    };

    for (index, bp) in breakpoints.iter().enumerate() {
        debug!("({:2}/{:2}) {}...", index + 1, breakpoints.len(), bp.name());

        let cave_size = bp.cave_size();
        let slot_size = source_slot_size(cave_size);

        let checks: Vec<AddressCheck> = bp
            .addresses()
            .iter()
            .map(|candidate| match candidate {
                CandidateAddress::Null => AddressCheck::Null,
                CandidateAddress::Unresolved(_) => AddressCheck::Unresolved,
                CandidateAddress::Resolved(0) => AddressCheck::Null,
                CandidateAddress::Resolved(addr) => {
                    if memory.check_region(*addr, cave_size) {
                        debug!("  at {:#x}... OK", addr);
                        AddressCheck::Valid(*addr)
                    } else {
                        debug!("  at {:#x}... not enough source bytes, skipping", addr);
                        AddressCheck::InsufficientBytes(*addr)
                    }
                }
            })
            .collect();

        for check in &checks {
            if let AddressCheck::Valid(address) = *check {
                layout.sites.push(PatchSite {
                    breakpoint: index,
                    address,
                    cave_size,
                    source_offset: layout.source_cave_size,
                    source_slot_size: slot_size,
                    call_offset: layout.call_cave_size,
                });
                layout.source_cave_size += slot_size;
                layout.call_cave_size += stub_size;
            }
        }

        layout.entries.push(PlanEntry {
            breakpoint: index,
            name: bp.name().to_string(),
            checks,
        });
    }

    info!(
        "planned {} sites for {}/{} breakpoints ({} addresses excluded), {} + {} cave bytes",
        layout.sites.len(),
        layout.active_count(),
        breakpoints.len(),
        layout.invalid_address_count(),
        layout.source_cave_size,
        layout.call_cave_size
    );

    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::Handler;
    use crate::memory::ImageMemory;
    use crate::regs::X86Regs;
    use crate::x86::CALL_LEN;
    use serde_json::Value;
    use std::sync::Arc;

    const STUB: usize = 48;

    fn breakpoint(name: &str, cave_size: usize, addrs: &[CandidateAddress]) -> Breakpoint {
        let handler: Handler = Arc::new(|_: &mut X86Regs, _: &Value| true);
        Breakpoint::new(name, cave_size, handler, Value::Null, addrs.to_vec()).unwrap()
    }

    fn memory() -> ImageMemory {
        let mut memory = ImageMemory::new();
        memory.load_image(0x401000, vec![0x90; 0x1000]).unwrap();
        memory
    }

    #[test]
    fn test_slots_are_contiguous() {
        let bps = vec![
            breakpoint("a", 5, &[CandidateAddress::Resolved(0x401000)]),
            breakpoint(
                "b",
                12,
                &[
                    CandidateAddress::Resolved(0x401100),
                    CandidateAddress::Resolved(0x401200),
                ],
            ),
            breakpoint("c", 30, &[CandidateAddress::Resolved(0x401300)]),
        ];
        let layout = plan(&bps, &memory(), STUB);

        assert_eq!(layout.sites.len(), 4);
        let mut expected_offset = 0;
        for (i, site) in layout.sites.iter().enumerate() {
            assert_eq!(site.source_slot_size, source_slot_size(site.cave_size));
            assert_eq!(site.source_slot_size % 16, 0);
            assert!(site.source_slot_size >= site.cave_size + CALL_LEN);
            assert_eq!(site.source_offset, expected_offset);
            assert_eq!(site.call_offset, i * STUB);
            expected_offset += site.source_slot_size;
        }
        assert_eq!(layout.source_cave_size, expected_offset);
        assert_eq!(layout.source_cave_size, 16 + 32 + 32 + 48);
        assert_eq!(layout.call_cave_size, 4 * STUB);
    }

    #[test]
    fn test_order_follows_declaration() {
        let bps = vec![
            breakpoint(
                "a",
                5,
                &[
                    CandidateAddress::Resolved(0x401800),
                    CandidateAddress::Resolved(0x401000),
                ],
            ),
            breakpoint("b", 5, &[CandidateAddress::Resolved(0x401400)]),
        ];
        let layout = plan(&bps, &memory(), STUB);
        let order: Vec<_> = layout.sites.iter().map(|s| (s.breakpoint, s.address)).collect();
        assert_eq!(order, vec![(0, 0x401800), (0, 0x401000), (1, 0x401400)]);
    }

    #[test]
    fn test_invalid_addresses_are_tagged_not_removed() {
        let bps = vec![breakpoint(
            "a",
            8,
            &[
                CandidateAddress::Resolved(0x500000),
                CandidateAddress::Null,
                CandidateAddress::Resolved(0x401FFC),
                CandidateAddress::Unresolved("\"x\"".to_string()),
                CandidateAddress::Resolved(0x401010),
            ],
        )];
        let layout = plan(&bps, &memory(), STUB);

        assert_eq!(
            layout.entries[0].checks,
            vec![
                AddressCheck::InsufficientBytes(0x500000),
                AddressCheck::Null,
                AddressCheck::InsufficientBytes(0x401FFC),
                AddressCheck::Unresolved,
                AddressCheck::Valid(0x401010),
            ]
        );
        assert_eq!(layout.invalid_address_count(), 2);
        assert_eq!(layout.sites.len(), 1);
        assert_eq!(layout.sites[0].address, 0x401010);
    }

    #[test]
    fn test_description_without_valid_address_is_skipped() {
        let bps = vec![
            breakpoint("a", 5, &[CandidateAddress::Resolved(0x401000)]),
            breakpoint("b", 5, &[CandidateAddress::Resolved(0x900000)]),
            breakpoint("c", 5, &[CandidateAddress::Resolved(0x401020)]),
        ];
        let layout = plan(&bps, &memory(), STUB);

        assert_eq!(layout.active_count(), 2);
        assert!(!layout.entries[1].is_active());
        assert_eq!(layout.sites.len(), 2);
        assert_eq!(layout.sites[1].breakpoint, 2);
        assert_eq!(layout.source_cave_size, 32);
        assert_eq!(layout.call_cave_size, 2 * STUB);
    }

    #[test]
    fn test_empty_input() {
        let layout = plan(&[], &memory(), STUB);
        assert!(layout.is_empty());
        assert_eq!(layout.source_cave_size, 0);
        assert_eq!(layout.call_cave_size, 0);
    }
}
