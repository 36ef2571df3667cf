//! Allocation service: block/container/subnet CRUD with snapshot capture and
//! audit logging around every mutation.
//!
//! Every mutating call runs under one write lock and follows the same
//! protocol: capture a snapshot of the pre-mutation state, validate, apply
//! the change to a working copy, persist the record sets, append the audit
//! entry, and only then swap the working copy in as the live state. A failed
//! audit append rolls the record sets back, so a mutation can never outlive
//! a missing audit record. Reads share a read lock and never block each
//! other.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audit::{AuditFilter, AuditLog, ChangeLogEntry};
use crate::cidr::CidrRange;
use crate::config::{Config, SortOrder};
use crate::error::{IpamError, Result};
use crate::model::{
    Block, BlockId, Container, ContainerId, Entity, Mutation, NetworkState, Subnet, SubnetId,
};
use crate::segment::{self, SegmentLayout};
use crate::snapshot::{SnapshotId, SnapshotMeta, SnapshotStore};
use crate::store::FileStore;
use crate::validate;

struct Core {
    state: NetworkState,
    store: FileStore,
    snapshots: SnapshotStore,
    audit: AuditLog,
}

pub struct AllocationService {
    inner: RwLock<Core>,
    default_sort: SortOrder,
}

impl Core {
    /// The mutation protocol shared by every write path:
    /// capture → validate/apply → persist → audit → swap.
    ///
    /// `apply` works on a copy of the live state and returns the mutation,
    /// the block name for the audit entry, and the success payload. Any
    /// error out of `apply` aborts with the live state untouched.
    fn commit<T>(
        &mut self,
        apply: impl FnOnce(&mut NetworkState) -> Result<(Mutation, String, T)>,
    ) -> Result<T> {
        self.snapshots.capture(&self.state)?;

        let mut working = self.state.clone();
        let (mutation, block_name, payload) = apply(&mut working)?;

        self.store.save(&working)?;
        if let Err(err) = self.audit.append(&mutation, &block_name) {
            log::error!("Audit append failed, rolling back: {}", err);
            if let Err(undo) = self.store.save(&self.state) {
                log::error!("Failed to re-persist prior state after rollback: {}", undo);
            }
            return Err(err);
        }

        self.state = working;
        Ok(payload)
    }
}

impl AllocationService {
    /// Open (or initialize) all stores under the configured data directory.
    pub fn open(config: &Config) -> Result<Self> {
        let store = FileStore::open(config.data_dir.clone())?;
        let state = store.load()?;
        let snapshots =
            SnapshotStore::open(config.data_dir.join("snapshots"), config.snapshot_limit)?;
        let audit = AuditLog::open(config.data_dir.join("change_log.jsonl"))?;
        log::info!(
            "Allocation service ready: {} blocks, {} subnets, {} snapshots",
            state.blocks.len(),
            state.subnets.len(),
            snapshots.len()
        );
        Ok(AllocationService {
            inner: RwLock::new(Core {
                state,
                store,
                snapshots,
                audit,
            }),
            default_sort: config.default_sort,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Core> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Core> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    // ---- block operations ----

    pub fn create_block(&self, name: &str) -> Result<Block> {
        let name = name.trim().to_string();
        self.write().commit(move |state| {
            validate::validate_name(&name)?;
            validate::check_duplicate_block_name(&name, None, &state.blocks)?;

            let id = state.allocate_block_id();
            let position = state.blocks.iter().map(|b| b.position).max().unwrap_or(0) + 1;
            let block = Block {
                id,
                name: name.clone(),
                position,
                collapsed: false,
                base_network: None,
            };
            state.blocks.push(block.clone());
            Ok((
                Mutation::Create {
                    entity: Entity::Block(block.clone()),
                },
                name,
                block,
            ))
        })
    }

    pub fn rename_block(&self, id: BlockId, new_name: &str) -> Result<Block> {
        let new_name = new_name.trim().to_string();
        self.write().commit(move |state| {
            validate::validate_name(&new_name)?;
            validate::check_duplicate_block_name(&new_name, Some(id), &state.blocks)?;

            let block = state
                .block_mut(id)
                .ok_or(IpamError::NotFound {
                    kind: "block",
                    id: id.into(),
                })?;
            let before = block.clone();
            block.name = new_name;
            let after = block.clone();
            let block_name = after.name.clone();
            Ok((
                Mutation::Update {
                    before: Entity::Block(before),
                    after: Entity::Block(after.clone()),
                },
                block_name,
                after,
            ))
        })
    }

    /// Delete a block; owned subnets and containers go with it.
    pub fn delete_block(&self, id: BlockId) -> Result<Block> {
        self.write().commit(move |state| {
            let (block, containers, subnets) =
                state.remove_block(id).ok_or(IpamError::NotFound {
                    kind: "block",
                    id: id.into(),
                })?;

            let cascade: Vec<Entity> = containers
                .into_iter()
                .map(Entity::Container)
                .chain(subnets.into_iter().map(Entity::Subnet))
                .collect();
            let block_name = block.name.clone();
            Ok((
                Mutation::Delete {
                    entity: Entity::Block(block.clone()),
                    cascade,
                },
                block_name,
                block,
            ))
        })
    }

    /// Apply a full new ordering. The id list must cover the current block
    /// set exactly; duplicates, omissions and foreign ids are all rejected
    /// so a block can never silently drop out of the ordering.
    pub fn reorder_blocks(&self, ids: &[BlockId]) -> Result<()> {
        let ids = ids.to_vec();
        self.write().commit(move |state| {
            if ids.len() != state.blocks.len() {
                return Err(IpamError::InvalidOrder {
                    reason: format!(
                        "expected {} block ids, got {}",
                        state.blocks.len(),
                        ids.len()
                    ),
                });
            }
            let mut seen = std::collections::HashSet::new();
            for &id in &ids {
                if !seen.insert(id) {
                    return Err(IpamError::InvalidOrder {
                        reason: format!("duplicate block id {}", id),
                    });
                }
                if state.block(id).is_none() {
                    return Err(IpamError::InvalidOrder {
                        reason: format!("unknown block id {}", id),
                    });
                }
            }

            let mut before: Vec<BlockId> = state.blocks.iter().map(|b| b.id).collect();
            before.sort_by_key(|&id| state.block(id).map(|b| b.position).unwrap_or(0));

            for (index, &id) in ids.iter().enumerate() {
                if let Some(block) = state.block_mut(id) {
                    block.position = index as u32 + 1;
                }
            }
            state.normalize_positions();

            Ok((
                Mutation::Reorder {
                    before,
                    after: ids.clone(),
                },
                "-".to_string(),
                (),
            ))
        })
    }

    /// Set or clear the base network a block uses for segment planning.
    pub fn set_block_network(&self, id: BlockId, network: Option<&str>) -> Result<Block> {
        let network = network.map(CidrRange::parse).transpose()?;
        self.update_block(id, move |block| block.base_network = network)
    }

    pub fn set_block_collapsed(&self, id: BlockId, collapsed: bool) -> Result<Block> {
        self.update_block(id, move |block| block.collapsed = collapsed)
    }

    fn update_block(&self, id: BlockId, change: impl FnOnce(&mut Block)) -> Result<Block> {
        self.write().commit(move |state| {
            let block = state
                .block_mut(id)
                .ok_or(IpamError::NotFound {
                    kind: "block",
                    id: id.into(),
                })?;
            let before = block.clone();
            change(block);
            let after = block.clone();
            let block_name = after.name.clone();
            Ok((
                Mutation::Update {
                    before: Entity::Block(before),
                    after: Entity::Block(after.clone()),
                },
                block_name,
                after,
            ))
        })
    }

    // ---- subnet operations ----

    pub fn create_subnet(
        &self,
        block_id: BlockId,
        name: &str,
        cidr: &str,
        vlan_id: Option<u16>,
        container_id: Option<ContainerId>,
    ) -> Result<Subnet> {
        let name = name.trim().to_string();
        let cidr = cidr.to_string();
        self.write().commit(move |state| {
            validate::validate_name(&name)?;
            if let Some(vlan) = vlan_id {
                validate::validate_vlan(vlan)?;
            }
            let cidr = CidrRange::parse(&cidr)?;

            let block_name = state
                .block(block_id)
                .map(|b| b.name.clone())
                .ok_or(IpamError::NotFound {
                    kind: "block",
                    id: block_id.into(),
                })?;
            if let Some(cid) = container_id {
                let container = state.container(cid).ok_or(IpamError::NotFound {
                    kind: "container",
                    id: cid.into(),
                })?;
                if container.block_id != block_id {
                    return Err(IpamError::NotFound {
                        kind: "container",
                        id: cid.into(),
                    });
                }
            }

            validate::check_duplicate_vlan(vlan_id, block_id, None, &state.subnets)?;
            validate::check_overlap(cidr, block_id, None, &state.subnets)?;

            let id = state.allocate_subnet_id();
            let subnet = Subnet {
                id,
                block_id,
                container_id,
                name,
                vlan_id,
                cidr,
            };
            state.subnets.push(subnet.clone());
            Ok((
                Mutation::Create {
                    entity: Entity::Subnet(subnet.clone()),
                },
                block_name,
                subnet,
            ))
        })
    }

    pub fn update_subnet(
        &self,
        id: SubnetId,
        name: &str,
        cidr: &str,
        vlan_id: Option<u16>,
        container_id: Option<ContainerId>,
    ) -> Result<Subnet> {
        let name = name.trim().to_string();
        let cidr = cidr.to_string();
        self.write().commit(move |state| {
            validate::validate_name(&name)?;
            if let Some(vlan) = vlan_id {
                validate::validate_vlan(vlan)?;
            }
            let cidr = CidrRange::parse(&cidr)?;

            let before = state
                .subnet(id)
                .cloned()
                .ok_or(IpamError::NotFound {
                    kind: "subnet",
                    id: id.into(),
                })?;
            let block_name = state
                .block(before.block_id)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| "-".to_string());
            if let Some(cid) = container_id {
                let container = state.container(cid).ok_or(IpamError::NotFound {
                    kind: "container",
                    id: cid.into(),
                })?;
                if container.block_id != before.block_id {
                    return Err(IpamError::NotFound {
                        kind: "container",
                        id: cid.into(),
                    });
                }
            }

            // A subnet being resized must not conflict with itself
            validate::check_duplicate_vlan(vlan_id, before.block_id, Some(id), &state.subnets)?;
            validate::check_overlap(cidr, before.block_id, Some(id), &state.subnets)?;

            let subnet = state.subnet_mut(id).ok_or(IpamError::NotFound {
                kind: "subnet",
                id: id.into(),
            })?;
            subnet.name = name;
            subnet.cidr = cidr;
            subnet.vlan_id = vlan_id;
            subnet.container_id = container_id;
            let after = subnet.clone();
            Ok((
                Mutation::Update {
                    before: Entity::Subnet(before),
                    after: Entity::Subnet(after.clone()),
                },
                block_name,
                after,
            ))
        })
    }

    pub fn delete_subnet(&self, id: SubnetId) -> Result<Subnet> {
        self.write().commit(move |state| {
            let subnet = state.remove_subnet(id).ok_or(IpamError::NotFound {
                kind: "subnet",
                id: id.into(),
            })?;
            let block_name = state
                .block(subnet.block_id)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| "-".to_string());
            Ok((
                Mutation::Delete {
                    entity: Entity::Subnet(subnet.clone()),
                    cascade: Vec::new(),
                },
                block_name,
                subnet,
            ))
        })
    }

    // ---- container operations ----

    pub fn create_container(
        &self,
        block_id: BlockId,
        name: &str,
        base_network: &str,
    ) -> Result<Container> {
        let name = name.trim().to_string();
        let base_network = base_network.to_string();
        self.write().commit(move |state| {
            validate::validate_name(&name)?;
            let base_network = CidrRange::parse(&base_network)?;

            let block_name = state
                .block(block_id)
                .map(|b| b.name.clone())
                .ok_or(IpamError::NotFound {
                    kind: "block",
                    id: block_id.into(),
                })?;

            let id = state.allocate_container_id();
            let position = state
                .containers_in_block(block_id)
                .map(|c| c.position)
                .max()
                .unwrap_or(0)
                + 1;
            let container = Container {
                id,
                block_id,
                name,
                base_network,
                position,
            };
            state.containers.push(container.clone());
            Ok((
                Mutation::Create {
                    entity: Entity::Container(container.clone()),
                },
                block_name,
                container,
            ))
        })
    }

    pub fn update_container(
        &self,
        id: ContainerId,
        name: &str,
        base_network: &str,
    ) -> Result<Container> {
        let name = name.trim().to_string();
        let base_network = base_network.to_string();
        self.write().commit(move |state| {
            validate::validate_name(&name)?;
            let base_network = CidrRange::parse(&base_network)?;

            let container = state.container_mut(id).ok_or(IpamError::NotFound {
                kind: "container",
                id: id.into(),
            })?;
            let before = container.clone();
            container.name = name;
            container.base_network = base_network;
            let after = container.clone();
            let block_name = state
                .block(after.block_id)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| "-".to_string());
            Ok((
                Mutation::Update {
                    before: Entity::Container(before),
                    after: Entity::Container(after.clone()),
                },
                block_name,
                after,
            ))
        })
    }

    /// Delete a container. Its subnets keep existing; only the grouping goes.
    pub fn delete_container(&self, id: ContainerId) -> Result<Container> {
        self.write().commit(move |state| {
            let container = state.remove_container(id).ok_or(IpamError::NotFound {
                kind: "container",
                id: id.into(),
            })?;
            let block_name = state
                .block(container.block_id)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| "-".to_string());
            Ok((
                Mutation::Delete {
                    entity: Entity::Container(container.clone()),
                    cascade: Vec::new(),
                },
                block_name,
                container,
            ))
        })
    }

    // ---- snapshots ----

    /// Snapshot metadata, newest first.
    pub fn list_snapshots(&self) -> Vec<SnapshotMeta> {
        self.read().snapshots.list()
    }

    /// Replace the live graph with a snapshot's contents. The pre-restore
    /// state is captured first, so a restore is itself undoable by restoring
    /// the immediately preceding snapshot. All-or-nothing: an unknown id or
    /// a corrupt payload leaves the live state untouched.
    pub fn restore_snapshot(&self, id: SnapshotId) -> Result<()> {
        let mut guard = self.write();
        let core = &mut *guard;

        let target = core.snapshots.load(id)?;
        core.snapshots.capture(&core.state)?;

        core.store.save(&target)?;
        let mutation = Mutation::Restore { snapshot_id: id };
        if let Err(err) = core.audit.append(&mutation, "-") {
            log::error!("Audit append failed, rolling back restore: {}", err);
            if let Err(undo) = core.store.save(&core.state) {
                log::error!("Failed to re-persist prior state after rollback: {}", undo);
            }
            return Err(err);
        }

        core.state = target;
        log::info!("Restored state from snapshot {}", id);
        Ok(())
    }

    // ---- reads ----

    pub fn get_block(&self, id: BlockId) -> Result<Block> {
        self.read().state.block(id).cloned().ok_or(IpamError::NotFound {
            kind: "block",
            id: id.into(),
        })
    }

    pub fn get_container(&self, id: ContainerId) -> Result<Container> {
        self.read()
            .state
            .container(id)
            .cloned()
            .ok_or(IpamError::NotFound {
                kind: "container",
                id: id.into(),
            })
    }

    pub fn get_subnet(&self, id: SubnetId) -> Result<Subnet> {
        self.read()
            .state
            .subnet(id)
            .cloned()
            .ok_or(IpamError::NotFound {
                kind: "subnet",
                id: id.into(),
            })
    }

    /// Blocks in display order (position, then name).
    pub fn list_blocks(&self) -> Vec<Block> {
        let core = self.read();
        let mut blocks = core.state.blocks.clone();
        blocks.sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
        blocks
    }

    pub fn list_containers(&self, block_id: Option<BlockId>) -> Vec<Container> {
        let core = self.read();
        let mut containers: Vec<Container> = core
            .state
            .containers
            .iter()
            .filter(|c| block_id.map_or(true, |id| c.block_id == id))
            .cloned()
            .collect();
        containers.sort_by(|a, b| {
            a.block_id
                .cmp(&b.block_id)
                .then(a.position.cmp(&b.position))
                .then(a.name.cmp(&b.name))
        });
        containers
    }

    /// Subnets sorted by the configured default order.
    pub fn list_subnets(&self, block_id: Option<BlockId>) -> Vec<Subnet> {
        let core = self.read();
        let mut subnets: Vec<Subnet> = core
            .state
            .subnets
            .iter()
            .filter(|s| block_id.map_or(true, |id| s.block_id == id))
            .cloned()
            .collect();
        sort_subnets(&mut subnets, self.default_sort);
        subnets
    }

    /// Layout for a container: the parent block's subnets whose range lies
    /// inside the container's base network.
    pub fn compute_segment_layout(&self, container_id: ContainerId) -> Result<SegmentLayout> {
        let core = self.read();
        let container = core.state.container(container_id).ok_or(IpamError::NotFound {
            kind: "container",
            id: container_id.into(),
        })?;
        let allocations: Vec<Subnet> = core
            .state
            .subnets_in_block(container.block_id)
            .cloned()
            .collect();
        Ok(segment::compute_layout(container.base_network, &allocations))
    }

    /// Layout for a block used directly as a planning container. A block
    /// without a base network yields the explicit "nothing to show" layout.
    pub fn compute_block_layout(&self, block_id: BlockId) -> Result<SegmentLayout> {
        let core = self.read();
        let block = core.state.block(block_id).ok_or(IpamError::NotFound {
            kind: "block",
            id: block_id.into(),
        })?;
        let network = match block.base_network {
            Some(network) => network,
            None => return Ok(SegmentLayout::empty()),
        };
        let allocations: Vec<Subnet> = core.state.subnets_in_block(block_id).cloned().collect();
        Ok(segment::compute_layout(network, &allocations))
    }

    /// Change log entries matching the filter, newest first.
    pub fn audit_entries(&self, filter: &AuditFilter) -> Vec<ChangeLogEntry> {
        self.read().audit.list(filter)
    }

    /// Full copy of the live graph, for exports and state comparison.
    pub fn export_state(&self) -> NetworkState {
        self.read().state.clone()
    }

    #[cfg(test)]
    fn snapshot_count(&self) -> usize {
        self.read().snapshots.len()
    }
}

fn sort_subnets(subnets: &mut [Subnet], order: SortOrder) {
    match order {
        SortOrder::Network => {
            subnets.sort_by(|a, b| a.block_id.cmp(&b.block_id).then(a.cidr.cmp(&b.cidr)));
        }
        SortOrder::Vlan => {
            // Untagged subnets sort last within their block
            subnets.sort_by(|a, b| {
                a.block_id
                    .cmp(&b.block_id)
                    .then(a.vlan_id.is_none().cmp(&b.vlan_id.is_none()))
                    .then(a.vlan_id.cmp(&b.vlan_id))
                    .then(a.cidr.cmp(&b.cidr))
            });
        }
        SortOrder::Name => {
            subnets.sort_by(|a, b| {
                a.block_id
                    .cmp(&b.block_id)
                    .then(a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                    .then(a.cidr.cmp(&b.cidr))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service_in(dir: &std::path::Path) -> AllocationService {
        let config = Config {
            data_dir: dir.to_path_buf(),
            snapshot_limit: 10,
            default_sort: SortOrder::Vlan,
        };
        AllocationService::open(&config).unwrap()
    }

    #[test]
    fn test_every_mutation_is_preceded_by_a_capture() {
        let dir = tempdir().unwrap();
        let service = service_in(dir.path());

        assert_eq!(service.snapshot_count(), 0);
        service.create_block("Lab").unwrap();
        assert_eq!(service.snapshot_count(), 1);
        service.create_block("Office").unwrap();
        assert_eq!(service.snapshot_count(), 2);

        // A rejected mutation still captured the pre-state first
        assert!(service.create_block("Lab").is_err());
        assert_eq!(service.snapshot_count(), 3);
    }

    #[test]
    fn test_rejected_mutation_leaves_state_unchanged() {
        let dir = tempdir().unwrap();
        let service = service_in(dir.path());
        let block = service.create_block("Lab").unwrap();
        service
            .create_subnet(block.id, "Servers", "192.168.1.0/24", Some(10), None)
            .unwrap();

        let before = service.export_state();
        let err = service
            .create_subnet(block.id, "IOT", "192.168.1.128/25", Some(20), None)
            .unwrap_err();
        assert!(matches!(err, IpamError::OverlapConflict { .. }));
        assert_eq!(service.export_state(), before);
    }

    #[test]
    fn test_duplicate_vlan_rejected_within_block() {
        let dir = tempdir().unwrap();
        let service = service_in(dir.path());
        let lab = service.create_block("Lab").unwrap();
        let office = service.create_block("Office").unwrap();
        service
            .create_subnet(lab.id, "Servers", "10.0.0.0/24", Some(10), None)
            .unwrap();

        let err = service
            .create_subnet(lab.id, "Printers", "10.0.1.0/24", Some(10), None)
            .unwrap_err();
        assert!(matches!(err, IpamError::DuplicateVlan { vlan: 10, .. }));

        // Same VLAN in another block is fine
        service
            .create_subnet(office.id, "Servers", "10.0.0.0/24", Some(10), None)
            .unwrap();
    }

    #[test]
    fn test_update_subnet_excludes_itself_from_checks() {
        let dir = tempdir().unwrap();
        let service = service_in(dir.path());
        let block = service.create_block("Lab").unwrap();
        let subnet = service
            .create_subnet(block.id, "Servers", "192.168.1.0/24", Some(10), None)
            .unwrap();

        // Shrinking in place must not conflict with the old range
        let resized = service
            .update_subnet(subnet.id, "Servers", "192.168.1.0/25", Some(10), None)
            .unwrap();
        assert_eq!(resized.cidr.to_string(), "192.168.1.0/25");
    }

    #[test]
    fn test_reorder_validation() {
        let dir = tempdir().unwrap();
        let service = service_in(dir.path());
        let a = service.create_block("A").unwrap();
        let b = service.create_block("B").unwrap();

        for bad in [
            vec![a.id],              // missing id
            vec![a.id, a.id],        // duplicate
            vec![a.id, b.id, 99],    // wrong length + foreign
            vec![a.id, 99],          // foreign id
        ] {
            let err = service.reorder_blocks(&bad).unwrap_err();
            assert!(matches!(err, IpamError::InvalidOrder { .. }), "{:?}", bad);
        }
        // Ordering unchanged after the rejections
        let blocks = service.list_blocks();
        assert_eq!(blocks[0].id, a.id);

        service.reorder_blocks(&[b.id, a.id]).unwrap();
        let blocks = service.list_blocks();
        assert_eq!(blocks[0].id, b.id);
        assert_eq!(blocks[0].position, 1);
        assert_eq!(blocks[1].position, 2);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let exported = {
            let service = service_in(dir.path());
            let block = service.create_block("Lab").unwrap();
            service
                .create_subnet(block.id, "Servers", "10.0.0.0/24", None, None)
                .unwrap();
            service.export_state()
        };

        let reopened = service_in(dir.path());
        assert_eq!(reopened.export_state(), exported);
    }

    #[test]
    fn test_subnet_sorting_orders() {
        let dir = tempdir().unwrap();
        let service = service_in(dir.path());
        let block = service.create_block("Lab").unwrap();
        service
            .create_subnet(block.id, "zeta", "10.0.2.0/24", None, None)
            .unwrap();
        service
            .create_subnet(block.id, "alpha", "10.0.1.0/24", Some(30), None)
            .unwrap();
        service
            .create_subnet(block.id, "mid", "10.0.0.0/24", Some(10), None)
            .unwrap();

        // Default sort is VLAN: tagged ascending, untagged last
        let vlans: Vec<Option<u16>> = service
            .list_subnets(Some(block.id))
            .iter()
            .map(|s| s.vlan_id)
            .collect();
        assert_eq!(vlans, vec![Some(10), Some(30), None]);
    }
}
