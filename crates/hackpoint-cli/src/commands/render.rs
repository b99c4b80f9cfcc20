//! Render command: patch the image in a simulated address space and show
//! what was generated.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use hackpoint::x86::CALL_LEN;
use hackpoint::{ImageMemory, PatchSet};
use owo_colors::OwoColorize;
use tracing::info;

use super::hex_utils::format_hex_address;
use super::{Target, hexdump};
use crate::TargetArgs;

pub fn run(args: &TargetArgs, output: Option<&Path>, dump: bool) -> Result<()> {
    let mut target = Target::load(args)?;
    let patches = render(&mut target)?;

    print_summary(&patches);
    if dump {
        print_dump(&patches, &target.memory);
    }

    if let Some(path) = output {
        let image = patched_image(&target)?;
        fs::write(path, image).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote patched image to {}", path.display());
    }
    Ok(())
}

pub fn render(target: &mut Target) -> Result<PatchSet> {
    let engine = target.engine();
    let resolver = target.resolver();
    Ok(engine.apply(&target.breakpoints, &resolver, &mut target.memory)?)
}

/// Image bytes after patching.
pub fn patched_image(target: &Target) -> Result<&[u8]> {
    target
        .memory
        .bytes_at(target.settings.image_base, target.image_len)
        .context("Image is no longer mapped")
}

fn print_summary(patches: &PatchSet) {
    let report = patches.report();
    for site in patches.sites() {
        println!(
            "{} {} → source cave {}, call cave {}",
            patches.breakpoint_for(site).name().green(),
            format_hex_address(site.address),
            format_hex_address(site.source_cave),
            format_hex_address(site.call_cave),
        );
    }
    for skipped in &report.skipped {
        println!("{} [{}] {}", "skipped".yellow(), skipped.category, skipped.reason);
    }
    println!();
    println!(
        "{} of {} breakpoints active, {} sites, {} invalid addresses",
        report.active, report.total, report.sites, report.invalid_addresses
    );
}

fn print_dump(patches: &PatchSet, memory: &ImageMemory) {
    let stub_size = patches.layout().stub_size;
    for site in patches.sites() {
        let name = patches.breakpoint_for(site).name();
        println!("{}", name.bold());
        let windows = [
            ("patched site", site.address, site.cave_size),
            ("source cave", site.source_cave, site.cave_size + CALL_LEN),
            ("call cave", site.call_cave, stub_size),
        ];
        for (title, address, len) in windows {
            if let Some(bytes) = memory.bytes_at(address, len) {
                hexdump::print(title, address, bytes);
            }
        }
    }
}
