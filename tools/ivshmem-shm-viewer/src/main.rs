// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-only inspector: maps an existing region and prints its header
//! fields once, without taking part in the protocol. Useful for debugging
//! a stuck handshake or a hung iteration from outside either peer.

use clap::Parser;
use colored::Colorize;
use ivshmem_core::fsm::{ReaderState, WriterState};
use ivshmem_core::region::{layout, SharedRegion, DEFAULT_REGION_SIZE};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Pretty,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[derive(Parser)]
#[command(
    name = "ivshmem-shm-viewer",
    about = "Inspect an ivshmem benchmark region's header without joining the protocol"
)]
struct Cli {
    /// Path to the backing file (host-side shared-memory-filesystem file).
    path: PathBuf,

    #[arg(long, default_value_t = DEFAULT_REGION_SIZE)]
    region_size: usize,

    #[arg(long, default_value = "pretty")]
    format: OutputFormat,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> ivshmem_core::Result<()> {
    let region = SharedRegion::open_host(&cli.path, cli.region_size)?;
    let header = region.header();

    let magic = header.load_magic();
    let writer_state = WriterState::from_u32(header.load_writer_state());
    let reader_state = ReaderState::from_u32(header.load_reader_state());
    let sequence = header.load_sequence();
    let data_size = header.load_data_size();
    let error_code = header.load_error_code();
    let test_complete = header.load_test_complete();

    match cli.format {
        OutputFormat::Json => {
            println!(
                "{{\"magic\":\"0x{magic:08x}\",\"writer_state\":{},\"reader_state\":{},\"sequence\":{sequence},\"data_size\":{data_size},\"error_code\":{error_code},\"test_complete\":{test_complete}}}",
                json_state(writer_state.map(|s| s.to_string())),
                json_state(reader_state.map(|s| s.to_string())),
            );
        }
        OutputFormat::Pretty => {
            println!("{}", "ivshmem region".bold());
            println!("  path:          {:?}", region.path());
            println!(
                "  magic:         0x{:08x}{}",
                magic,
                if magic == layout::MAGIC_READY {
                    " (ready)".green().to_string()
                } else {
                    " (uninitialised)".yellow().to_string()
                }
            );
            println!("  writer_state:  {}", display_state(writer_state.map(|s| s.to_string()), header.load_writer_state()));
            println!("  reader_state:  {}", display_state(reader_state.map(|s| s.to_string()), header.load_reader_state()));
            println!("  sequence:      {sequence}");
            println!("  data_size:     {data_size} bytes");
            println!("  error_code:    {error_code}");
            println!("  test_complete: {test_complete}");
        }
    }

    Ok(())
}

fn json_state(name: Option<String>) -> String {
    match name {
        Some(n) => format!("\"{n}\""),
        None => "null".to_string(),
    }
}

fn display_state(name: Option<String>, raw: u32) -> String {
    match name {
        Some(n) => n,
        None => format!("INVALID({raw})").red().to_string(),
    }
}
