//! Plan command: validate descriptions and show the cave layout without
//! touching the image.

use std::fmt;

use anyhow::Result;
use hackpoint::{AddressCheck, Breakpoint, LayoutPlan, SkippedBreakpoint};
use owo_colors::OwoColorize;
use serde::Serialize;

use super::Target;
use super::hex_utils::format_hex_address;
use crate::TargetArgs;

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub breakpoints: Vec<EntryReport>,
    pub skipped: Vec<SkippedBreakpoint>,
    pub source_cave_size: usize,
    pub call_cave_size: usize,
}

#[derive(Debug, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub handler: String,
    pub cave_size: usize,
    pub addresses: Vec<AddressReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStatus {
    Ok,
    NotApplicable,
    Unresolved,
    InsufficientBytes,
}

impl fmt::Display for AddressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AddressStatus::Ok => "ok",
            AddressStatus::NotApplicable => "not applicable",
            AddressStatus::Unresolved => "unresolved",
            AddressStatus::InsufficientBytes => "not enough source bytes",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Serialize)]
pub struct AddressReport {
    pub address: Option<String>,
    pub status: AddressStatus,
}

impl AddressReport {
    fn from_check(check: &AddressCheck) -> Self {
        let (address, status) = match check {
            AddressCheck::Valid(addr) => (Some(*addr), AddressStatus::Ok),
            AddressCheck::Null => (None, AddressStatus::NotApplicable),
            AddressCheck::Unresolved => (None, AddressStatus::Unresolved),
            AddressCheck::InsufficientBytes(addr) => {
                (Some(*addr), AddressStatus::InsufficientBytes)
            }
        };
        Self {
            address: address.map(format_hex_address),
            status,
        }
    }
}

pub fn build_report(
    breakpoints: &[Breakpoint],
    skipped: Vec<SkippedBreakpoint>,
    layout: &LayoutPlan,
) -> PlanReport {
    let entries = layout
        .entries
        .iter()
        .map(|entry| {
            let bp = &breakpoints[entry.breakpoint];
            EntryReport {
                name: entry.name.clone(),
                handler: bp.handler_key().to_string(),
                cave_size: bp.cave_size(),
                addresses: entry.checks.iter().map(AddressReport::from_check).collect(),
            }
        })
        .collect();

    PlanReport {
        breakpoints: entries,
        skipped,
        source_cave_size: layout.source_cave_size,
        call_cave_size: layout.call_cave_size,
    }
}

pub fn run(args: &TargetArgs, json: bool) -> Result<()> {
    let target = Target::load(args)?;
    let engine = target.engine();
    let (breakpoints, skipped) = engine.build_breakpoints(&target.breakpoints, &target.resolver())?;
    let layout = engine.plan(&breakpoints, &target.memory);
    let report = build_report(&breakpoints, skipped, &layout);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &layout);
    }
    Ok(())
}

fn print_report(report: &PlanReport, layout: &LayoutPlan) {
    for entry in &report.breakpoints {
        let active = entry.addresses.iter().any(|a| a.status == AddressStatus::Ok);
        if active {
            println!("{} ({}, cavesize {})", entry.name.green().bold(), entry.handler, entry.cave_size);
        } else {
            println!("{} ({}, cavesize {})", entry.name.red().bold(), entry.handler, entry.cave_size);
        }
        for addr in &entry.addresses {
            let address = addr.address.as_deref().unwrap_or("-");
            let status = addr.status.to_string();
            match addr.status {
                AddressStatus::Ok => println!("  {} {}", address, status.green()),
                AddressStatus::InsufficientBytes => println!("  {} {}", address, status.yellow()),
                AddressStatus::NotApplicable | AddressStatus::Unresolved => {
                    println!("  {} {}", address, status.dimmed())
                }
            }
        }
    }

    if !report.skipped.is_empty() {
        println!();
        println!("{}", "Skipped:".yellow().bold());
        for skipped in &report.skipped {
            println!("  [{}] {}", skipped.category, skipped.reason);
        }
    }

    println!();
    println!(
        "{} of {} active, {} sites",
        layout.active_count(),
        report.breakpoints.len() + report.skipped.len(),
        layout.sites.len()
    );
    println!(
        "source cave: {} bytes, call cave: {} bytes",
        report.source_cave_size, report.call_cave_size
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::offline_handlers;
    use hackpoint::{Engine, ImageMemory, ModuleResolver};
    use serde_json::json;

    #[test]
    fn test_build_report() {
        let list = json!({
            "first": { "addr": ["Rx1000", 0, "0x500000"], "cavesize": 6 },
            "broken": { "addr": "Rx1000" },
        });
        let engine = Engine::new(offline_handlers(&list));
        let mut memory = ImageMemory::new();
        memory.load_image(0x401000, vec![0; 0x100]).unwrap();

        let (bps, skipped) = engine
            .build_breakpoints(&list, &ModuleResolver::new(0x400000))
            .unwrap();
        let layout = engine.plan(&bps, &memory);
        let report = build_report(&bps, skipped, &layout);

        assert_eq!(report.breakpoints.len(), 1);
        let entry = &report.breakpoints[0];
        assert_eq!(entry.handler, "BP_first");
        let statuses: Vec<_> = entry.addresses.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![
                AddressStatus::Ok,
                AddressStatus::NotApplicable,
                AddressStatus::InsufficientBytes,
            ]
        );
        assert_eq!(entry.addresses[2].status.to_string(), "not enough source bytes");
        assert_eq!(entry.addresses[0].address.as_deref(), Some("0x00401000"));

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "broken");
        assert_eq!(report.source_cave_size, 16);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["skipped"][0]["category"], "configuration");
        let addresses = &value["breakpoints"][0]["addresses"];
        assert_eq!(addresses[0]["status"], "ok");
        assert_eq!(addresses[1]["status"], "not_applicable");
        assert_eq!(addresses[1]["address"], serde_json::Value::Null);
        assert_eq!(addresses[2]["status"], "insufficient_bytes");
    }
}
