//! dsktool CLI - partition table inspection and editing
//!
//! Reads and edits GPT and MBR partition tables on block devices and raw
//! disk images.

mod mounts;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dsktool_core::{format_size, PartitionTable, TableKind};
use dsktool_device::{open_device, DeviceConfig};
use dsktool_zones::{
    create, delete, detect_and_read, CreateRequest, Extent, MutationOutcome, ReadOptions,
    UnifiedTable, KNOWN_GPT_TYPES, KNOWN_MBR_TYPES,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dsktool")]
#[command(about = "Inspect and edit GPT and MBR partition tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Treat CRC mismatches and malformed EBRs as errors
    #[arg(long, global = true, env = "DSKTOOL_STRICT")]
    strict: bool,

    /// Logical sector size in bytes
    #[arg(long, global = true, env = "DSKTOOL_SECTOR_SIZE", default_value = "512")]
    sector_size: u32,

    /// Read image files through a memory map (read-only commands)
    #[arg(long, global = true)]
    mmap: bool,

    /// Log level
    #[arg(long, global = true, env = "RUST_LOG", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// List partitions and trailing free space
    Partitions {
        /// Block device or image file
        device: PathBuf,

        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show partition table details
    Info {
        /// Block device or image file
        device: PathBuf,
    },

    /// Create a partition in the free space
    Create {
        /// Block device or image file
        device: PathBuf,

        /// Partition type name, GPT type GUID, or MBR type byte (0xNN)
        #[arg(long = "type")]
        type_name: String,

        /// End LBA, or a size such as 100M or 1.5G
        #[arg(long)]
        end: Extent,

        /// First LBA (defaults to the start of the free space)
        #[arg(long)]
        start: Option<u64>,

        /// Preferred table slot (1-based)
        #[arg(long)]
        slot: Option<usize>,

        /// Partition name (GPT only)
        #[arg(long, default_value = "")]
        name: String,

        /// Mark the partition bootable
        #[arg(long)]
        bootable: bool,

        /// Expected table scheme (defaults to the detected one)
        #[arg(long)]
        scheme: Option<Scheme>,

        /// Confirm writing to the device
        #[arg(long)]
        yes: bool,
    },

    /// Delete a partition by its number in the partition list
    Delete {
        /// Block device or image file
        device: PathBuf,

        /// Partition number as shown by `partitions`
        number: usize,

        /// Confirm writing to the device
        #[arg(long)]
        yes: bool,
    },

    /// List partition type names accepted by `create`
    Types,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Scheme {
    Gpt,
    Mbr,
}

impl From<Scheme> for TableKind {
    fn from(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Gpt => TableKind::Gpt,
            Scheme::Mbr => TableKind::Mbr,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let options = ReadOptions { strict: cli.strict };
    let config = DeviceConfig {
        sector_size: cli.sector_size,
        writable: false,
        use_mmap: cli.mmap,
    };

    match cli.command {
        Command::Partitions { device, json } => cmd_partitions(&device, &config, &options, json),
        Command::Info { device } => cmd_info(&device, &config, &options),
        Command::Create {
            device,
            type_name,
            end,
            start,
            slot,
            name,
            bootable,
            scheme,
            yes,
        } => {
            confirm(yes, &device)?;
            let (mut dev, geometry) = open_device(&device, &writable(&config))
                .with_context(|| format!("failed to open {}", device.display()))?;
            let table = detect_and_read(dev.as_mut(), &geometry, &options)?;
            let free_space = table
                .unused()
                .context("no free space left on the device")?
                .clone();

            let request = CreateRequest {
                scheme: scheme.map(TableKind::from).unwrap_or(table.kind),
                slot_hint: slot,
                first_lba: start,
                extent: end,
                type_name,
                name,
                bootable,
            };
            let outcome = create(dev.as_mut(), &geometry, &free_space, &request, &options)?;
            println!("Created partition {}", outcome.record);
            print_outcome(&outcome);
            Ok(())
        }
        Command::Delete {
            device,
            number,
            yes,
        } => {
            confirm(yes, &device)?;
            let (mut dev, geometry) = open_device(&device, &writable(&config))
                .with_context(|| format!("failed to open {}", device.display()))?;
            let table = detect_and_read(dev.as_mut(), &geometry, &options)?;

            let mounted = match table.get_partition(number).and_then(|record| record.slot) {
                Some(slot) => {
                    let node = mounts::partition_device_path(&device, slot + 1);
                    mounts::is_mounted(&node)
                        .with_context(|| format!("failed to check mounts for {}", node.display()))?
                }
                None => false,
            };

            let outcome = delete(dev.as_mut(), &geometry, number, mounted, &options)?;
            println!("Deleted partition {}", outcome.record);
            print_outcome(&outcome);
            Ok(())
        }
        Command::Types => {
            cmd_types();
            Ok(())
        }
    }
}

fn writable(config: &DeviceConfig) -> DeviceConfig {
    DeviceConfig {
        writable: true,
        use_mmap: false,
        ..config.clone()
    }
}

fn confirm(yes: bool, device: &Path) -> Result<()> {
    if !yes {
        bail!("refusing to modify {} without --yes", device.display());
    }
    Ok(())
}

fn read(device: &Path, config: &DeviceConfig, options: &ReadOptions) -> Result<UnifiedTable> {
    let (mut dev, geometry) = open_device(device, config)
        .with_context(|| format!("failed to open {}", device.display()))?;
    let table = detect_and_read(dev.as_mut(), &geometry, options)
        .with_context(|| format!("failed to read partition table on {}", device.display()))?;
    Ok(table)
}

fn cmd_partitions(
    device: &Path,
    config: &DeviceConfig,
    options: &ReadOptions,
    json: bool,
) -> Result<()> {
    let table = read(device, config, options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    println!("Partition table: {}", table.identify());
    println!();
    print_partitions(&table);
    print_diagnostics(&table);
    Ok(())
}

fn cmd_info(device: &Path, config: &DeviceConfig, options: &ReadOptions) -> Result<()> {
    let table = read(device, config, options)?;
    let geometry = &table.geometry;

    println!("=== Device ===");
    println!("Path:         {}", device.display());
    println!("Sector size:  {} bytes", geometry.sector_size);
    println!("Sectors:      {}", geometry.disk_size_sectors);
    println!("Size:         {}", format_size(geometry.size_bytes()));
    println!();
    println!("=== Partition Table ===");
    println!("Type:         {}", table.identify());
    if let Some(guid) = &table.disk_guid {
        println!("Disk GUID:    {}", guid);
    }
    if let Some(signature) = table.disk_signature {
        println!("Disk Sig:     0x{:08X}", signature);
    }
    println!("Partitions:   {}", table.real_partitions().count());
    println!("Slots:        {}", table.slot_count);
    println!(
        "Free slots:   {}",
        if table.available_slots.is_empty() {
            "none".to_string()
        } else {
            table
                .available_slots
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    match table.unused() {
        Some(gap) => println!(
            "Free space:   LBA {}..={} ({})",
            gap.first_lba,
            gap.last_lba,
            format_size(gap.size_bytes())
        ),
        None => println!("Free space:   none"),
    }
    print_diagnostics(&table);
    Ok(())
}

fn cmd_types() {
    println!("=== GPT ===");
    println!("{:<22} {:<38} {}", "Name", "Type GUID", "Aliases");
    println!("{}", "-".repeat(80));
    for known in KNOWN_GPT_TYPES {
        println!(
            "{:<22} {:<38} {}",
            known.name,
            known.guid.0,
            known.aliases.join(", ")
        );
    }

    println!();
    println!("=== MBR ===");
    println!("{:<22} {:<6} {}", "Name", "Byte", "Aliases");
    println!("{}", "-".repeat(50));
    for known in KNOWN_MBR_TYPES {
        println!(
            "{:<22} 0x{:02X}   {}",
            known.name,
            known.code,
            known.aliases.join(", ")
        );
    }
}

fn print_outcome(outcome: &MutationOutcome) {
    println!();
    print_partitions(&outcome.table);
    print_diagnostics(&outcome.table);
}

fn print_partitions(table: &UnifiedTable) {
    if table.partitions.is_empty() {
        println!("No partitions or free space found.");
        return;
    }

    println!(
        "{:<4} {:<9} {:>12} {:>12} {:>12} {:<22} {}",
        "#", "Kind", "Start", "End", "Size", "Type", "Name"
    );
    println!("{}", "-".repeat(90));

    for record in &table.partitions {
        let mut name = record.name.clone();
        if record.active {
            name.push_str(" *");
        }
        println!(
            "{:<4} {:<9} {:>12} {:>12} {:>12} {:<22} {}",
            record.number,
            record.kind.to_string(),
            record.first_lba,
            record.last_lba,
            format_size(record.size_bytes()),
            record.type_name,
            name.trim()
        );
    }
}

fn print_diagnostics(table: &UnifiedTable) {
    if table.diagnostics.is_empty() {
        return;
    }
    eprintln!();
    for diagnostic in &table.diagnostics {
        eprintln!("warning: {}", diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from([
            "dsktool", "create", "disk.img", "--type", "Linux Filesystem", "--end", "100M",
            "--slot", "3", "--yes",
        ])
        .unwrap();
        match cli.command {
            Command::Create {
                type_name,
                end,
                slot,
                yes,
                ..
            } => {
                assert_eq!(type_name, "Linux Filesystem");
                assert_eq!(end, Extent::Bytes(100 << 20));
                assert_eq!(slot, Some(3));
                assert!(yes);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_extent() {
        let args = ["dsktool", "create", "disk.img", "--type", "ESP", "--end", "12XB"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_mutation_requires_yes() {
        assert!(confirm(false, Path::new("disk.img")).is_err());
        assert!(confirm(true, Path::new("disk.img")).is_ok());
    }
}
