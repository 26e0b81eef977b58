// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host-side Writer process. Creates (or reuses) the backing file, runs
//! the handshake, then drives a latency or bandwidth suite against
//! whatever Reader has mapped the same region.

use clap::{Parser, Subcommand};
use colored::Colorize;
use ivshmem_core::region::{SharedRegion, DEFAULT_REGION_SIZE};
use ivshmem_core::{record, Timeouts, WriterSession};
use log::info;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "ivshmem-writer",
    about = "Writer side of the ivshmem cross-domain shared-memory benchmark"
)]
struct Cli {
    /// Backing file path. On real hardware the Writer always uses a
    /// shared-memory-filesystem file; there is no PCI BAR on the host side.
    #[arg(long, default_value = "/dev/shm/ivshmem_bench")]
    path: PathBuf,

    /// Total size of the mapped region, in bytes.
    #[arg(long, default_value_t = DEFAULT_REGION_SIZE)]
    region_size: usize,

    /// Remove any stale backing file before creating a fresh one.
    #[arg(long, default_value_t = true)]
    cleanup_stale: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fixed-size payload, repeated N times.
    Latency {
        #[arg(long, default_value_t = 1000)]
        iterations: u32,
        #[arg(long, default_value_t = 64)]
        payload_size: usize,
    },
    /// A ladder of payload sizes, M iterations each.
    Bandwidth {
        #[arg(long, default_value_t = 50)]
        iterations_per_size: u32,
        #[arg(long, value_delimiter = ',', default_values_t = vec![64, 1024, 16384, 262144, 1048576])]
        sizes: Vec<usize>,
    },
    /// Run the handshake, then immediately signal completion. Useful for
    /// exercising the Reader's teardown path in isolation.
    Shutdown,
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
    if cli.cleanup_stale {
        if let Err(e) = ivshmem_core::region::backing::cleanup_stale_file(&cli.path) {
            log::warn!("could not remove stale backing file {:?}: {e}", cli.path);
        }
    }

    info!("creating region at {:?} ({} bytes)", cli.path, cli.region_size);
    let region = SharedRegion::create_host(&cli.path, cli.region_size)?;
    let mut writer = WriterSession::new(region, Timeouts::default());

    println!("{}", "waiting for reader handshake...".dimmed());
    writer.initialise()?;
    println!("{}", "handshake complete".green());

    let records = match &cli.command {
        Command::Latency {
            iterations,
            payload_size,
        } => {
            println!(
                "running latency suite: {iterations} iterations, {payload_size} byte payload"
            );
            run_with_interrupt(*iterations, *payload_size, &mut writer, interrupted)?
        }
        Command::Bandwidth {
            iterations_per_size,
            sizes,
        } => {
            println!(
                "running bandwidth suite: sizes {sizes:?}, {iterations_per_size} iterations each"
            );
            writer.run_bandwidth_suite(sizes, *iterations_per_size)?
        }
        Command::Shutdown => Vec::new(),
    };

    record::print_summary(&records);

    writer.shutdown();
    println!("{}", "sent test_complete, writer COMPLETED".green());
    Ok(())
}

fn run_with_interrupt(
    iterations: u32,
    payload_size: usize,
    writer: &mut WriterSession,
    interrupted: &AtomicBool,
) -> ivshmem_core::Result<Vec<record::IterationRecord>> {
    let payload = vec![0xA5u8; payload_size];
    let mut records = Vec::with_capacity(iterations as usize);
    for i in 0..iterations {
        if interrupted.load(Ordering::SeqCst) {
            println!("{}", "interrupted, stopping early".yellow());
            break;
        }
        records.push(writer.send_iteration(i, &payload)?);
    }
    Ok(records)
}
