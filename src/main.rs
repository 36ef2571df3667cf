use clap::{Parser, Subcommand};
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use netblocks::audit::AuditFilter;
use netblocks::config::load_config;
use netblocks::model::ActionKind;
use netblocks::segment::SegmentLayout;
use netblocks::service::AllocationService;

/// IP address space documentation and planning tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory from config or defaults
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all blocks with their subnets
    List {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Create a new block
    AddBlock { name: String },
    /// Rename an existing block
    RenameBlock { id: u32, name: String },
    /// Delete a block and everything in it
    DeleteBlock { id: u32 },
    /// Reorder blocks; the id list must name every block exactly once
    ReorderBlocks { ids: Vec<u32> },
    /// Set (or clear, when omitted) a block's base network
    SetBlockNetwork { id: u32, network: Option<String> },
    /// Collapse or expand a block in listings
    CollapseBlock {
        id: u32,
        /// Expand instead of collapse
        #[arg(long)]
        expand: bool,
    },
    /// Allocate a subnet inside a block
    AddSubnet {
        block_id: u32,
        name: String,
        cidr: String,
        /// VLAN id (1-4094)
        #[arg(long)]
        vlan: Option<u16>,
        /// Container to group the subnet under
        #[arg(long)]
        container: Option<u32>,
    },
    /// Replace a subnet's fields
    EditSubnet {
        id: u32,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        cidr: Option<String>,
        #[arg(long)]
        vlan: Option<u16>,
        /// Remove the VLAN tag
        #[arg(long, conflicts_with = "vlan")]
        clear_vlan: bool,
        #[arg(long)]
        container: Option<u32>,
    },
    /// Delete a subnet
    DeleteSubnet { id: u32 },
    /// Create a container inside a block
    AddContainer {
        block_id: u32,
        name: String,
        network: String,
    },
    /// Replace a container's name and base network
    EditContainer {
        id: u32,
        name: String,
        network: String,
    },
    /// Delete a container (its subnets stay)
    DeleteContainer { id: u32 },
    /// Show the segment layout of a container
    Segment { container_id: u32 },
    /// Show the segment layout of a block's own base network
    SegmentBlock { block_id: u32 },
    /// List available snapshots, newest first
    Snapshots,
    /// Restore the full state from a snapshot
    Restore { snapshot_id: u64 },
    /// Show change log entries, newest first
    History {
        /// Only entries for this block name
        #[arg(long)]
        block: Option<String>,
        /// Only entries with this action (create, update, delete, restore)
        #[arg(long)]
        action: Option<String>,
        /// Maximum number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    let service = AllocationService::open(&config)?;

    match args.command {
        Command::List { json } => list(&service, json)?,
        Command::AddBlock { name } => {
            let block = service.create_block(&name)?;
            println!("Created block {} '{}'", block.id, block.name);
        }
        Command::RenameBlock { id, name } => {
            let block = service.rename_block(id, &name)?;
            println!("Renamed block {} to '{}'", block.id, block.name);
        }
        Command::DeleteBlock { id } => {
            let block = service.delete_block(id)?;
            println!("Deleted block '{}'", block.name);
        }
        Command::ReorderBlocks { ids } => {
            service.reorder_blocks(&ids)?;
            println!("Reordered {} blocks", ids.len());
        }
        Command::SetBlockNetwork { id, network } => {
            let block = service.set_block_network(id, network.as_deref())?;
            match block.base_network {
                Some(net) => println!("Block '{}' base network set to {}", block.name, net),
                None => println!("Block '{}' base network cleared", block.name),
            }
        }
        Command::CollapseBlock { id, expand } => {
            let block = service.set_block_collapsed(id, !expand)?;
            let state = if block.collapsed { "collapsed" } else { "expanded" };
            println!("Block '{}' {}", block.name, state);
        }
        Command::AddSubnet {
            block_id,
            name,
            cidr,
            vlan,
            container,
        } => {
            let subnet = service.create_subnet(block_id, &name, &cidr, vlan, container)?;
            println!("Created subnet {} '{}' ({})", subnet.id, subnet.name, subnet.cidr);
        }
        Command::EditSubnet {
            id,
            name,
            cidr,
            vlan,
            clear_vlan,
            container,
        } => {
            // Unspecified fields keep their current values
            let current = service.get_subnet(id)?;
            let name = name.unwrap_or(current.name);
            let cidr = cidr.unwrap_or_else(|| current.cidr.to_string());
            let vlan = if clear_vlan { None } else { vlan.or(current.vlan_id) };
            let container = container.or(current.container_id);
            let subnet = service.update_subnet(id, &name, &cidr, vlan, container)?;
            println!("Updated subnet {} '{}' ({})", subnet.id, subnet.name, subnet.cidr);
        }
        Command::DeleteSubnet { id } => {
            let subnet = service.delete_subnet(id)?;
            println!("Deleted subnet '{}' ({})", subnet.name, subnet.cidr);
        }
        Command::AddContainer {
            block_id,
            name,
            network,
        } => {
            let container = service.create_container(block_id, &name, &network)?;
            println!(
                "Created container {} '{}' ({})",
                container.id, container.name, container.base_network
            );
        }
        Command::EditContainer { id, name, network } => {
            let container = service.update_container(id, &name, &network)?;
            println!(
                "Updated container {} '{}' ({})",
                container.id, container.name, container.base_network
            );
        }
        Command::DeleteContainer { id } => {
            let container = service.delete_container(id)?;
            println!("Deleted container '{}'", container.name);
        }
        Command::Segment { container_id } => {
            let layout = service.compute_segment_layout(container_id)?;
            print_layout(&layout);
        }
        Command::SegmentBlock { block_id } => {
            let layout = service.compute_block_layout(block_id)?;
            print_layout(&layout);
        }
        Command::Snapshots => {
            let snapshots = service.list_snapshots();
            if snapshots.is_empty() {
                println!("No snapshots");
            }
            for meta in snapshots {
                println!("{:>8}  {}", meta.id, meta.timestamp.to_rfc3339());
            }
        }
        Command::Restore { snapshot_id } => {
            service.restore_snapshot(snapshot_id)?;
            info!("State restored from snapshot {}", snapshot_id);
            println!("Restored to snapshot {}", snapshot_id);
        }
        Command::History {
            block,
            action,
            limit,
        } => {
            let action = action
                .as_deref()
                .map(str::parse::<ActionKind>)
                .transpose()
                .map_err(|e| color_eyre::eyre::eyre!(e))?;
            let filter = AuditFilter {
                block,
                action,
                ..Default::default()
            };
            for entry in service.audit_entries(&filter).into_iter().take(limit) {
                println!(
                    "{:>6}  {}  {:<8}  {}",
                    entry.id,
                    entry.timestamp.to_rfc3339(),
                    entry.action,
                    entry.details
                );
            }
        }
    }

    Ok(())
}

fn list(service: &AllocationService, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&service.export_state())?);
        return Ok(());
    }
    for block in service.list_blocks() {
        let marker = if block.collapsed { "+" } else { "-" };
        match block.base_network {
            Some(net) => println!("{} [{}] {} ({})", marker, block.id, block.name, net),
            None => println!("{} [{}] {}", marker, block.id, block.name),
        }
        if block.collapsed {
            continue;
        }
        for container in service.list_containers(Some(block.id)) {
            println!("    ({}) {} {}", container.id, container.name, container.base_network);
        }
        for subnet in service.list_subnets(Some(block.id)) {
            let vlan = subnet
                .vlan_id
                .map(|v| format!(" VLAN {}", v))
                .unwrap_or_default();
            println!("    [{}] {} {}{}", subnet.id, subnet.cidr, subnet.name, vlan);
        }
    }
    Ok(())
}

fn print_layout(layout: &SegmentLayout) {
    let network = match layout.network {
        Some(network) => network,
        None => {
            println!("No base network configured");
            return;
        }
    };
    println!(
        "{}: {}/{} addresses used ({:.1}%)",
        network,
        layout.usage.used_addresses,
        layout.usage.total_addresses,
        layout.usage.usage_percent
    );
    for segment in &layout.segments {
        println!(
            "  {:>6.2}% +{:>6.2}%  {} '{}' (color {})",
            segment.start_percent,
            segment.width_percent,
            segment.cidr,
            segment.name,
            segment.color_index
        );
    }
    for boundary in &layout.boundaries {
        println!("  | {:>6.2}%  {}", boundary.percent, boundary.label);
    }
}
