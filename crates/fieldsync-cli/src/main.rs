//! Fieldsync CLI
//!
//! Thin wrapper around fieldsync-core for inspecting and managing the queue
//! databases of a device's data directory. Useful when debugging what a
//! client accumulated while offline.
//!
//! ## Usage
//!
//! ```bash
//! # Summary of both queues
//! fieldsync status
//!
//! # List pending edits
//! fieldsync edits list
//!
//! # Drop every pending edit (careful: unsent work is lost)
//! fieldsync edits clear
//!
//! # List queued attachments
//! fieldsync attachments list
//!
//! # Attachment queue size accounting
//! fieldsync attachments usage
//!
//! # Registered layer snapshots
//! fieldsync layers list
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use fieldsync_core::{AttachmentQueue, EditQueue};

/// Fieldsync - offline feature edit queue tooling
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(version = "0.1.0")]
#[command(about = "Fieldsync - offline feature edit queue tooling")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.fieldsync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summary of both queues
    Status,

    /// Edit queue management
    Edits {
        #[command(subcommand)]
        action: EditsAction,
    },

    /// Attachment queue management
    Attachments {
        #[command(subcommand)]
        action: AttachmentsAction,
    },

    /// Layer snapshot management
    Layers {
        #[command(subcommand)]
        action: LayersAction,
    },
}

#[derive(Subcommand)]
enum EditsAction {
    /// List pending edit records
    List,
    /// Count pending edit records
    Count,
    /// Remove every pending edit and layer snapshot
    Clear,
}

#[derive(Subcommand)]
enum AttachmentsAction {
    /// List queued attachments
    List,
    /// Size accounting for the attachment queue
    Usage,
    /// Remove every queued attachment
    Clear,
}

#[derive(Subcommand)]
enum LayersAction {
    /// List registered layer snapshots
    List,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fieldsync")
        .join("data")
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn format_timestamp(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => ts.to_string(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Status => {
            let edits = EditQueue::open_in(&data_dir)
                .with_context(|| format!("opening edit queue in {}", data_dir.display()))?;
            let attachments = AttachmentQueue::open_in(&data_dir)
                .with_context(|| format!("opening attachment queue in {}", data_dir.display()))?;

            let edit_usage = edits.usage()?;
            let attachment_usage = attachments.usage()?;
            println!("Data directory: {}", data_dir.display());
            println!(
                "Pending edits:       {} ({} bytes)",
                edit_usage.record_count, edit_usage.size_bytes
            );
            println!(
                "Pending attachments: {} ({} bytes)",
                attachment_usage.record_count, attachment_usage.size_bytes
            );
            println!("Layer snapshots:     {}", edits.layer_snapshots()?.len());
        }

        Commands::Edits { action } => {
            let edits = EditQueue::open_in(&data_dir)
                .with_context(|| format!("opening edit queue in {}", data_dir.display()))?;
            match action {
                EditsAction::List => {
                    let pending = edits.all_pending()?;
                    if pending.is_empty() {
                        println!("No pending edits.");
                    }
                    for record in pending {
                        println!(
                            "{:<8} {:<30} queued {}",
                            record.operation.as_str(),
                            record.id,
                            format_timestamp(record.enqueued_at)
                        );
                    }
                }
                EditsAction::Count => {
                    println!("{}", edits.pending_count()?);
                }
                EditsAction::Clear => {
                    let count = edits.pending_count()?;
                    edits.clear()?;
                    println!("Removed {} pending edit(s).", count);
                }
            }
        }

        Commands::Attachments { action } => {
            let attachments = AttachmentQueue::open_in(&data_dir)
                .with_context(|| format!("opening attachment queue in {}", data_dir.display()))?;
            match action {
                AttachmentsAction::List => {
                    let records = attachments.all()?;
                    if records.is_empty() {
                        println!("No queued attachments.");
                    }
                    for record in records {
                        println!(
                            "{:<8} {:<30} {:<24} {} bytes",
                            record.id, record.feature_id, record.name, record.size
                        );
                    }
                }
                AttachmentsAction::Usage => {
                    let usage = attachments.usage()?;
                    println!(
                        "{} attachment(s), {} bytes",
                        usage.record_count, usage.size_bytes
                    );
                }
                AttachmentsAction::Clear => {
                    let count = attachments.usage()?.record_count;
                    attachments.clear()?;
                    println!("Removed {} attachment(s).", count);
                }
            }
        }

        Commands::Layers { action } => {
            let edits = EditQueue::open_in(&data_dir)
                .with_context(|| format!("opening edit queue in {}", data_dir.display()))?;
            match action {
                LayersAction::List => {
                    let snapshots = edits.layer_snapshots()?;
                    if snapshots.is_empty() {
                        println!("No layer snapshots registered.");
                    }
                    for (layer_id, definition) in snapshots {
                        let fields = definition
                            .get("fields")
                            .and_then(|f| f.as_array())
                            .map(|f| f.len())
                            .unwrap_or(0);
                        println!("{:<30} {} field(s)", layer_id, fields);
                    }
                }
            }
        }
    }

    Ok(())
}
