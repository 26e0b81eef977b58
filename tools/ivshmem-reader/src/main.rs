// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Guest-side Reader process. Maps the region either through a PCI BAR
//! resource node or, when none is given, the same shared-memory-filesystem
//! file the Writer uses — the host-side smoke-testing path.

use clap::Parser;
use colored::Colorize;
use ivshmem_core::measurement::CpuClockSampler;
use ivshmem_core::region::{SharedRegion, DEFAULT_REGION_SIZE};
use ivshmem_core::{ReaderSession, Timeouts};
use log::info;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "ivshmem-reader",
    about = "Reader side of the ivshmem cross-domain shared-memory benchmark"
)]
struct Cli {
    /// PCI BAR resource node (e.g. `/sys/bus/pci/devices/0000:00:04.0/resource2`).
    /// When absent or missing, falls back to `--fallback-path`.
    #[arg(long)]
    pci_bar: Option<PathBuf>,

    /// Shared-memory-filesystem file to use when no PCI BAR is available.
    #[arg(long, default_value = "/dev/shm/ivshmem_bench")]
    fallback_path: PathBuf,

    #[arg(long, default_value_t = DEFAULT_REGION_SIZE)]
    region_size: usize,

    /// Maximum number of messages to serve before exiting. Unbounded
    /// (serve until `test_complete`) when omitted.
    #[arg(long)]
    max_messages: Option<u32>,

    /// Record CPU time per iteration in the opaque perf-sample field
    /// instead of leaving it zeroed.
    #[arg(long, default_value_t = false)]
    sample_cpu_time: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .expect("failed to install Ctrl-C handler");
    }

    if let Err(e) = run(&cli, &interrupted) {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(cli: &Cli, interrupted: &AtomicBool) -> ivshmem_core::Result<()> {
    info!(
        "opening region: pci_bar={:?} fallback={:?}",
        cli.pci_bar, cli.fallback_path
    );
    let region = SharedRegion::open_guest(cli.pci_bar.as_deref(), &cli.fallback_path, cli.region_size)?;

    let mut reader = ReaderSession::new(region, Timeouts::default());
    if cli.sample_cpu_time {
        reader = reader.with_sampler(Box::new(CpuClockSampler::default()));
    }

    println!("{}", "waiting for writer handshake...".dimmed());
    reader.wait_for_writer()?;
    println!("{}", "handshake complete, serving iterations".green());

    let mut served = 0u32;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            println!("{}", "interrupted, stopping early".yellow());
            break;
        }
        if let Some(max) = cli.max_messages {
            if served >= max {
                break;
            }
        }
        match reader.serve_iteration() {
            Ok(true) => served += 1,
            Ok(false) => {
                println!("{}", "writer signalled completion".green());
                break;
            }
            Err(e) => {
                eprintln!("{} {e}", "warning:".yellow());
                break;
            }
        }
    }

    println!("served {served} messages");
    Ok(())
}
