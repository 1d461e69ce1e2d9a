use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hdtn_store::{AvailableDest, Eid, Store, StoreConfig};

#[derive(Parser)]
#[command(name = "storectl")]
#[command(about = "Manual push/pop/remove/stats access to a bundle store, for debugging")]
struct Cli {
    /// One or more backing disk files/directories.
    #[arg(long = "disk", required = true)]
    disks: Vec<PathBuf>,

    /// Total usable capacity across all disks, in bytes.
    #[arg(long)]
    capacity_bytes: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push the contents of a file as one bundle addressed to a destination.
    Push {
        /// Custody id to catalog the bundle under; the engine never assigns
        /// one itself, so the caller (here, the operator) must supply it.
        custody_id: u64,
        dest_node: u64,
        dest_service: u64,
        #[arg(long, default_value_t = 1)]
        priority: u8,
        #[arg(long)]
        expiration_secs: u64,
        file: PathBuf,
    },
    /// Pop the best bundle addressed to a destination and print its size.
    Pop { dest_node: u64, dest_service: u64 },
    /// Permanently delete a bundle by custody id.
    Remove { custody_id: u64 },
    /// Print store-wide metrics.
    Stats,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = StoreConfig::new(cli.disks, cli.capacity_bytes);
    config.try_restore_from_disk = true;
    let (store, report) = Store::open(config).map_err(|e| anyhow!(e.to_string()))?;
    if let Some(report) = report {
        log::info!(
            "restored {} bundles ({} bytes) across {} segments (fully consistent: {})",
            report.total_bundles_restored,
            report.total_bytes_restored,
            report.total_segments_restored,
            report.successfully_restored
        );
    }

    match cli.command {
        Commands::Push {
            custody_id,
            dest_node,
            dest_service,
            priority,
            expiration_secs,
            file,
        } => {
            let data = std::fs::read(file)?;
            let (custody_id, result) = store
                .push_all_segments(
                    custody_id,
                    Eid::new(dest_node, dest_service),
                    priority,
                    expiration_secs,
                    0,
                    &data,
                    None,
                )
                .map_err(|e| anyhow!(e.to_string()))?;
            println!("pushed custody_id={custody_id} uuid_duplicate={}", result.uuid_duplicate);
        }
        Commands::Pop { dest_node, dest_service } => {
            let dest = AvailableDest::Exact(Eid::new(dest_node, dest_service));
            match store.pop_top(&[dest]) {
                Some(mut session) => {
                    let data = store.read_all_segments(&mut session).map_err(|e| anyhow!(e.to_string()))?;
                    println!("popped custody_id={} bytes={}", session.custody_id, data.len());
                    store.remove_read_bundle(session).map_err(|e| anyhow!(e.to_string()))?;
                }
                None => println!("no bundle available for that destination"),
            }
        }
        Commands::Remove { custody_id } => {
            store
                .remove_bundle_by_custody_id(custody_id)
                .map_err(|e| anyhow!(e.to_string()))?;
            println!("removed custody_id={custody_id}");
        }
        Commands::Stats => {
            let metrics = store.metrics();
            println!("{metrics:#?}");
        }
    }

    Ok(())
}
