mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::hex_utils::parse_hex_address;

#[derive(Parser)]
#[command(name = "hackpoint")]
#[command(about = "Plan and render x86 breakpoint patches against a code image")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate breakpoint descriptions and show the cave layout
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Patch the image and show the generated code
    Render {
        #[command(flatten)]
        target: TargetArgs,

        /// Write the patched image to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Dump the patched windows and both cave regions
        #[arg(long)]
        dump: bool,
    },
}

/// Inputs shared by every command
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Breakpoint file (`{"breakpoints": {...}}` or a bare name → record map)
    #[arg(short, long, env = "HACKPOINT_BREAKPOINTS")]
    pub breakpoints: Option<PathBuf>,

    /// Raw code image to patch
    #[arg(short, long, env = "HACKPOINT_IMAGE")]
    pub image: Option<PathBuf>,

    /// Address the image is loaded at (hex)
    #[arg(long, value_parser = parse_hex_u32)]
    pub image_base: Option<u32>,

    /// Module base for `Rx` addresses (hex, defaults to the image base)
    #[arg(long, value_parser = parse_hex_u32)]
    pub module_base: Option<u32>,

    /// Settings file
    #[arg(short, long, default_value = "hackpoint.toml", env = "HACKPOINT_CONFIG")]
    pub config: PathBuf,
}

fn parse_hex_u32(s: &str) -> Result<u32> {
    parse_hex_address(s)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hackpoint=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Plan { target, json } => commands::plan::run(&target, json),
        Command::Render {
            target,
            output,
            dump,
        } => commands::render::run(&target, output.as_deref(), dump),
    }
}
