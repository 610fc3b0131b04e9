//! packfs command-line front end
//!
//! Runs one operation against a container file and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use packfs::{Container, ContainerConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "packfs")]
#[command(version, about = "Single-file container filesystem", long_about = None)]
struct Cli {
    /// Container file (created if missing)
    #[arg(short, long, default_value = "container.bin")]
    container: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory inside the container, e.g. /docs/2024
    #[arg(short, long, default_value = "/")]
    dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy a host file into the container
    Cpin {
        #[arg(value_name = "EXTERNAL")]
        source: PathBuf,
        name: String,
    },

    /// List the working directory
    Ls {
        #[arg(long)]
        json: bool,
    },

    /// Remove a file
    Rm { name: String },

    /// Copy a file out of the container
    Cpout {
        name: String,
        #[arg(value_name = "EXTERNAL")]
        destination: PathBuf,
    },

    /// Create a directory
    Md { name: String },

    /// Remove a directory and everything below it
    Rd { name: String },

    /// Merge adjacent free blocks
    Defrag,

    /// Reclaim deleted metadata slots
    Vacuum,

    /// Show container statistics
    Info {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ContainerConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => ContainerConfig::default(),
    };

    let mut container = Container::open_with(&cli.container, config)
        .with_context(|| format!("Failed to open container {:?}", cli.container))?;
    container
        .change_directory(&cli.dir)
        .with_context(|| format!("No such directory: {}", cli.dir))?;

    match cli.command {
        Commands::Cpin { source, name } => {
            let id = container
                .import_file(&source, &name)
                .with_context(|| format!("Failed to import {:?}", source))?;
            println!("Imported {:?} as '{}' (id {})", source, name, id);
        }
        Commands::Ls { json } => {
            let entries = container.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{}", container.current_path()?);
                for entry in entries {
                    let kind = if entry.is_directory { "<DIR>" } else { "" };
                    println!(
                        "{:>5}  {:<5}  {:>10}  {:>10}  {}  {}",
                        entry.id,
                        kind,
                        entry.size,
                        entry.compressed_size,
                        entry.modified.format("%Y-%m-%d %H:%M:%S"),
                        entry.name
                    );
                }
            }
        }
        Commands::Rm { name } => {
            container.remove(&name)?;
            println!("Removed '{}'", name);
        }
        Commands::Cpout { name, destination } => {
            container
                .export_file(&name, &destination)
                .with_context(|| format!("Failed to export '{}'", name))?;
            println!("Exported '{}' to {:?}", name, destination);
        }
        Commands::Md { name } => {
            let id = container.make_directory(&name)?;
            println!("Created directory '{}' (id {})", name, id);
        }
        Commands::Rd { name } => {
            let removed = container.remove_directory(&name)?;
            println!("Removed directory '{}' ({} entries)", name, removed);
        }
        Commands::Defrag => {
            let report = container.defragment()?;
            println!(
                "Free blocks: {} -> {} ({} bytes free)",
                report.blocks_before, report.blocks_after, report.free_bytes
            );
        }
        Commands::Vacuum => {
            let report = container.vacuum()?;
            println!(
                "Metadata slots: {} -> {}",
                report.slots_before, report.slots_after
            );
        }
        Commands::Info { json } => {
            let info = container.info()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Container:      {:?}", container.path());
                println!("Size:           {} bytes", info.container_size);
                println!(
                    "Metadata slots: {} of {} ({} live)",
                    info.entry_count, info.metadata_capacity, info.live_entries
                );
                println!("Free blocks:    {} ({} bytes)", info.free_blocks, info.free_bytes);
            }
        }
    }

    container.close()?;
    Ok(())
}
