//! Input validation and the sibling overlap check.
//!
//! The block is the overlap-isolation boundary: two subnets in the same block
//! may never overlap, regardless of container membership. All checks are O(n)
//! scans over the sibling set, which is plenty at the tens-of-subnets scale
//! this targets, and correct for any sibling count.

use crate::cidr::CidrRange;
use crate::error::{IpamError, Result};
use crate::model::{Block, BlockId, Subnet, SubnetId};

/// Names are display strings; keep them short and free of markup.
pub const MAX_NAME_LEN: usize = 50;

pub const VLAN_MIN: u16 = 1;
pub const VLAN_MAX: u16 = 4094;

/// Validate a block/container/subnet name: non-empty, at most 50 characters,
/// no `<`, `>`, `"` or `'`.
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(IpamError::InvalidName {
            reason: "name cannot be empty".to_string(),
        });
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(IpamError::InvalidName {
            reason: format!("name must be {} characters or less", MAX_NAME_LEN),
        });
    }
    if trimmed.contains(['<', '>', '"', '\'']) {
        return Err(IpamError::InvalidName {
            reason: "name contains invalid characters".to_string(),
        });
    }
    Ok(())
}

/// VLAN tags live in [1, 4094]; 0 and 4095 are reserved by 802.1Q.
pub fn validate_vlan(vlan: u16) -> Result<()> {
    if !(VLAN_MIN..=VLAN_MAX).contains(&vlan) {
        return Err(IpamError::InvalidVlan { vlan });
    }
    Ok(())
}

/// Reject a candidate range that overlaps any sibling subnet in the same
/// block. `exclude` skips the candidate's own previous state on edits so a
/// subnet being resized does not conflict with itself.
pub fn check_overlap(
    candidate: CidrRange,
    block_id: BlockId,
    exclude: Option<SubnetId>,
    subnets: &[Subnet],
) -> Result<()> {
    for subnet in subnets {
        if subnet.block_id != block_id {
            continue;
        }
        if exclude == Some(subnet.id) {
            continue;
        }
        if candidate.overlaps(&subnet.cidr) {
            return Err(IpamError::OverlapConflict {
                cidr: candidate.to_string(),
                conflicting: subnet.clone(),
            });
        }
    }
    Ok(())
}

/// Reject a VLAN id already used by another subnet in the same block. A
/// missing VLAN never conflicts; any number of untagged subnets may coexist.
pub fn check_duplicate_vlan(
    vlan_id: Option<u16>,
    block_id: BlockId,
    exclude: Option<SubnetId>,
    subnets: &[Subnet],
) -> Result<()> {
    let vlan = match vlan_id {
        Some(vlan) => vlan,
        None => return Ok(()),
    };
    for subnet in subnets {
        if subnet.block_id != block_id {
            continue;
        }
        if exclude == Some(subnet.id) {
            continue;
        }
        if subnet.vlan_id == Some(vlan) {
            return Err(IpamError::DuplicateVlan {
                vlan,
                conflicting: subnet.clone(),
            });
        }
    }
    Ok(())
}

/// Block names are unique display strings.
pub fn check_duplicate_block_name(
    name: &str,
    exclude: Option<BlockId>,
    blocks: &[Block],
) -> Result<()> {
    for block in blocks {
        if exclude == Some(block.id) {
            continue;
        }
        if block.name == name {
            return Err(IpamError::DuplicateName {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(id: SubnetId, block_id: BlockId, cidr: &str, vlan_id: Option<u16>) -> Subnet {
        Subnet {
            id,
            block_id,
            container_id: None,
            name: format!("net{}", id),
            vlan_id,
            cidr: CidrRange::parse(cidr).unwrap(),
        }
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Lab").is_ok());
        assert!(validate_name("  padded  ").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(51)).is_err());
        assert!(validate_name("bad<name>").is_err());
        assert!(validate_name("it's").is_err());
    }

    #[test]
    fn test_vlan_range() {
        assert!(validate_vlan(1).is_ok());
        assert!(validate_vlan(4094).is_ok());
        assert!(validate_vlan(0).is_err());
        assert!(validate_vlan(4095).is_err());
    }

    #[test]
    fn test_overlap_is_scoped_to_block() {
        let siblings = vec![
            subnet(1, 1, "192.168.1.0/24", Some(10)),
            subnet(2, 2, "192.168.1.0/24", None),
        ];
        let candidate = CidrRange::parse("192.168.1.128/25").unwrap();

        // Conflicts inside block 1, carries the conflicting subnet
        let err = check_overlap(candidate, 1, None, &siblings).unwrap_err();
        match err {
            IpamError::OverlapConflict { conflicting, .. } => assert_eq!(conflicting.id, 1),
            other => panic!("expected OverlapConflict, got {:?}", other),
        }

        // Same range is fine in block 3: the block is the isolation boundary
        assert!(check_overlap(candidate, 3, None, &siblings).is_ok());
    }

    #[test]
    fn test_overlap_excludes_self_on_edit() {
        let siblings = vec![subnet(1, 1, "192.168.1.0/24", None)];
        let resized = CidrRange::parse("192.168.1.0/25").unwrap();
        assert!(check_overlap(resized, 1, Some(1), &siblings).is_ok());
        assert!(check_overlap(resized, 1, None, &siblings).is_err());
    }

    #[test]
    fn test_duplicate_vlan() {
        let siblings = vec![
            subnet(1, 1, "10.0.0.0/24", Some(10)),
            subnet(2, 1, "10.0.1.0/24", None),
        ];
        assert!(check_duplicate_vlan(Some(10), 1, None, &siblings).is_err());
        assert!(check_duplicate_vlan(Some(10), 1, Some(1), &siblings).is_ok());
        assert!(check_duplicate_vlan(Some(10), 2, None, &siblings).is_ok());
        // Untagged subnets never conflict
        assert!(check_duplicate_vlan(None, 1, None, &siblings).is_ok());
    }

    #[test]
    fn test_duplicate_block_name() {
        let blocks = vec![Block {
            id: 1,
            name: "Lab".to_string(),
            position: 1,
            collapsed: false,
            base_network: None,
        }];
        assert!(check_duplicate_block_name("Lab", None, &blocks).is_err());
        assert!(check_duplicate_block_name("Lab", Some(1), &blocks).is_ok());
        assert!(check_duplicate_block_name("Office", None, &blocks).is_ok());
    }
}
