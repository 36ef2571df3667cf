//! Data model: blocks, containers, subnets and the serializable state graph.
//!
//! `NetworkState` is the unit of snapshotting: capturing it before a mutation
//! and swapping it back on restore is what makes every change undoable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cidr::CidrRange;
use crate::snapshot::SnapshotId;

pub type BlockId = u32;
pub type ContainerId = u32;
pub type SubnetId = u32;

/// Top-level grouping of subnets and the overlap-isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    /// Display order, contiguous 1-based integers.
    pub position: u32,
    /// UI hint only, but persisted and restored like everything else.
    #[serde(default)]
    pub collapsed: bool,
    /// Address universe when the block itself is used for segment planning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_network: Option<CidrRange>,
}

/// Named subgroup of a block's subnets sharing a base network, used for
/// visualization only. Deleting a container never deletes subnets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub block_id: BlockId,
    pub name: String,
    pub base_network: CidrRange,
    pub position: u32,
}

/// A CIDR-addressed, VLAN-tagged, named address range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub block_id: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    pub cidr: CidrRange,
}

fn first_id() -> u32 {
    1
}

/// The full block/container/subnet graph plus id counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub containers: Vec<Container>,
    pub subnets: Vec<Subnet>,
    #[serde(default = "first_id")]
    next_block_id: u32,
    #[serde(default = "first_id")]
    next_container_id: u32,
    #[serde(default = "first_id")]
    next_subnet_id: u32,
}

impl Default for NetworkState {
    fn default() -> Self {
        NetworkState {
            blocks: Vec::new(),
            containers: Vec::new(),
            subnets: Vec::new(),
            next_block_id: 1,
            next_container_id: 1,
            next_subnet_id: 1,
        }
    }
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn block_by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    pub fn container_mut(&mut self, id: ContainerId) -> Option<&mut Container> {
        self.containers.iter_mut().find(|c| c.id == id)
    }

    pub fn subnet(&self, id: SubnetId) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.id == id)
    }

    pub fn subnet_mut(&mut self, id: SubnetId) -> Option<&mut Subnet> {
        self.subnets.iter_mut().find(|s| s.id == id)
    }

    pub fn subnets_in_block(&self, block_id: BlockId) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter().filter(move |s| s.block_id == block_id)
    }

    pub fn containers_in_block(&self, block_id: BlockId) -> impl Iterator<Item = &Container> {
        self.containers
            .iter()
            .filter(move |c| c.block_id == block_id)
    }

    pub fn allocate_block_id(&mut self) -> BlockId {
        let id = self.next_block_id;
        self.next_block_id += 1;
        id
    }

    pub fn allocate_container_id(&mut self) -> ContainerId {
        let id = self.next_container_id;
        self.next_container_id += 1;
        id
    }

    pub fn allocate_subnet_id(&mut self) -> SubnetId {
        let id = self.next_subnet_id;
        self.next_subnet_id += 1;
        id
    }

    /// Delete a block and everything it owns. The dependent containers and
    /// subnets are collected before anything is removed so the cascade is
    /// computed against a consistent view.
    pub fn remove_block(&mut self, id: BlockId) -> Option<(Block, Vec<Container>, Vec<Subnet>)> {
        let index = self.blocks.iter().position(|b| b.id == id)?;

        let container_ids: Vec<ContainerId> = self
            .containers
            .iter()
            .filter(|c| c.block_id == id)
            .map(|c| c.id)
            .collect();
        let subnet_ids: Vec<SubnetId> = self
            .subnets
            .iter()
            .filter(|s| s.block_id == id)
            .map(|s| s.id)
            .collect();

        let mut removed_containers = Vec::with_capacity(container_ids.len());
        for cid in container_ids {
            if let Some(pos) = self.containers.iter().position(|c| c.id == cid) {
                removed_containers.push(self.containers.remove(pos));
            }
        }
        let mut removed_subnets = Vec::with_capacity(subnet_ids.len());
        for sid in subnet_ids {
            if let Some(pos) = self.subnets.iter().position(|s| s.id == sid) {
                removed_subnets.push(self.subnets.remove(pos));
            }
        }

        let block = self.blocks.remove(index);
        self.normalize_positions();
        Some((block, removed_containers, removed_subnets))
    }

    pub fn remove_subnet(&mut self, id: SubnetId) -> Option<Subnet> {
        let index = self.subnets.iter().position(|s| s.id == id)?;
        Some(self.subnets.remove(index))
    }

    /// Delete a container. Its subnets keep existing; only the grouping is
    /// dropped.
    pub fn remove_container(&mut self, id: ContainerId) -> Option<Container> {
        let index = self.containers.iter().position(|c| c.id == id)?;
        let container = self.containers.remove(index);
        for subnet in self.subnets.iter_mut() {
            if subnet.container_id == Some(id) {
                subnet.container_id = None;
            }
        }
        Some(container)
    }

    /// Re-assign contiguous 1-based positions, keeping the current
    /// (position, name) order.
    pub fn normalize_positions(&mut self) {
        self.blocks
            .sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
        for (index, block) in self.blocks.iter_mut().enumerate() {
            block.position = index as u32 + 1;
        }
    }

    /// Make sure id counters sit above every id in use. Needed after loading
    /// record sets written by an older layout that did not persist counters.
    pub fn repair_counters(&mut self) {
        let max_block = self.blocks.iter().map(|b| b.id).max().unwrap_or(0);
        let max_container = self.containers.iter().map(|c| c.id).max().unwrap_or(0);
        let max_subnet = self.subnets.iter().map(|s| s.id).max().unwrap_or(0);
        self.next_block_id = self.next_block_id.max(max_block + 1);
        self.next_container_id = self.next_container_id.max(max_container + 1);
        self.next_subnet_id = self.next_subnet_id.max(max_subnet + 1);
    }

    pub(crate) fn counters(&self) -> (u32, u32, u32) {
        (
            self.next_block_id,
            self.next_container_id,
            self.next_subnet_id,
        )
    }

    pub(crate) fn set_counters(&mut self, counters: (u32, u32, u32)) {
        self.next_block_id = counters.0;
        self.next_container_id = counters.1;
        self.next_subnet_id = counters.2;
    }
}

/// Any entity a mutation can touch, tagged for the audit payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Block(Block),
    Container(Container),
    Subnet(Subnet),
}

impl Entity {
    pub fn label(&self) -> String {
        match self {
            Entity::Block(b) => format!("block '{}'", b.name),
            Entity::Container(c) => format!("container '{}' ({})", c.name, c.base_network),
            Entity::Subnet(s) => format!("subnet '{}' ({})", s.name, s.cidr),
        }
    }
}

/// What a mutation did, with its structured payload. Audit entries are built
/// from this in one exhaustive mapping instead of ad-hoc string formatting at
/// every call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    Create {
        entity: Entity,
    },
    Update {
        before: Entity,
        after: Entity,
    },
    Delete {
        entity: Entity,
        cascade: Vec<Entity>,
    },
    Reorder {
        before: Vec<BlockId>,
        after: Vec<BlockId>,
    },
    Restore {
        snapshot_id: SnapshotId,
    },
}

/// Audit-visible action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Restore,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Restore => "restore",
        };
        f.write_str(text)
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(ActionKind::Create),
            "update" => Ok(ActionKind::Update),
            "delete" => Ok(ActionKind::Delete),
            "restore" => Ok(ActionKind::Restore),
            other => Err(format!("unknown action kind '{}'", other)),
        }
    }
}

impl Mutation {
    pub fn action(&self) -> ActionKind {
        match self {
            Mutation::Create { .. } => ActionKind::Create,
            Mutation::Update { .. } => ActionKind::Update,
            Mutation::Delete { .. } => ActionKind::Delete,
            Mutation::Reorder { .. } => ActionKind::Update,
            Mutation::Restore { .. } => ActionKind::Restore,
        }
    }

    /// Human-readable details line for the change log. `block` is the block
    /// name at the time of the action; it stays meaningful after deletion.
    pub fn details(&self, block: &str) -> String {
        match self {
            Mutation::Create {
                entity: Entity::Block(b),
            } => format!("Added block '{}'", b.name),
            Mutation::Create {
                entity: Entity::Container(c),
            } => format!(
                "Added container '{}' ({}) to block '{}'",
                c.name, c.base_network, block
            ),
            Mutation::Create {
                entity: Entity::Subnet(s),
            } => format!(
                "Added subnet '{}' ({}){} to block '{}'",
                s.name,
                s.cidr,
                vlan_info(s.vlan_id),
                block
            ),
            Mutation::Update {
                before: Entity::Block(old),
                after: Entity::Block(new),
            } => {
                if old.name != new.name {
                    format!("Renamed block '{}' to '{}'", old.name, new.name)
                } else {
                    format!("Updated block '{}'", new.name)
                }
            }
            Mutation::Update {
                after: Entity::Subnet(s),
                ..
            } => format!(
                "Edited subnet '{}' ({}){} in block '{}'",
                s.name,
                s.cidr,
                vlan_info(s.vlan_id),
                block
            ),
            Mutation::Update { after, .. } => {
                format!("Updated {} in block '{}'", after.label(), block)
            }
            Mutation::Delete {
                entity: Entity::Block(b),
                cascade,
            } => {
                let subnets = cascade
                    .iter()
                    .filter(|e| matches!(e, Entity::Subnet(_)))
                    .count();
                let containers = cascade
                    .iter()
                    .filter(|e| matches!(e, Entity::Container(_)))
                    .count();
                format!(
                    "Deleted block '{}' ({} subnets, {} containers)",
                    b.name, subnets, containers
                )
            }
            Mutation::Delete {
                entity: Entity::Subnet(s),
                ..
            } => format!(
                "Deleted subnet '{}' ({}) from block '{}'",
                s.name, s.cidr, block
            ),
            Mutation::Delete {
                entity: Entity::Container(c),
                ..
            } => format!("Deleted container '{}' from block '{}'", c.name, block),
            Mutation::Reorder { after, .. } => format!("Reordered {} blocks", after.len()),
            Mutation::Restore { snapshot_id } => format!("Restored to snapshot {}", snapshot_id),
        }
    }
}

fn vlan_info(vlan_id: Option<u16>) -> String {
    match vlan_id {
        Some(vlan) => format!(" VLAN {}", vlan),
        None => String::new(),
    }
}
