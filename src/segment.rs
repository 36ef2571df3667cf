//! Segment geometry for container visualization.
//!
//! Turns a base network and its allocations into container-relative
//! percentages, boundary markers and color indices. Everything here is a pure
//! function of its inputs so layouts are deterministic and testable.

use serde::Serialize;

use crate::cidr::CidrRange;
use crate::model::{Subnet, SubnetId};

/// Fixed palette size used for cyclic color assignment.
pub const PALETTE_SIZE: usize = 8;

/// One allocation positioned within the base network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub subnet_id: SubnetId,
    pub name: String,
    pub cidr: CidrRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    pub start_percent: f64,
    pub width_percent: f64,
    pub color_index: usize,
}

/// A size-class boundary strictly inside the base network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Boundary {
    pub percent: f64,
    pub label: String,
}

/// Address accounting for the base network.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_addresses: u64,
    pub used_addresses: u64,
    pub free_addresses: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentLayout {
    /// None means there is no base network, which is a valid
    /// "nothing to show" state rather than an error.
    pub network: Option<CidrRange>,
    pub segments: Vec<Segment>,
    pub boundaries: Vec<Boundary>,
    pub usage: UsageStats,
}

impl SegmentLayout {
    pub fn empty() -> Self {
        SegmentLayout {
            network: None,
            segments: Vec::new(),
            boundaries: Vec::new(),
            usage: UsageStats::default(),
        }
    }
}

/// Lay out the allocations that fall inside `network`. Allocations outside
/// the base network are skipped, matching how a container only visualizes the
/// part of its block that it actually covers. Sorted by range (start, then
/// prefix); colors cycle over the palette so adjacent segments always differ.
pub fn compute_layout(network: CidrRange, allocations: &[Subnet]) -> SegmentLayout {
    let mut inside: Vec<&Subnet> = allocations
        .iter()
        .filter(|s| network.contains(&s.cidr))
        .collect();
    inside.sort_by(|a, b| a.cidr.cmp(&b.cidr));

    let total = network.size();
    let mut used = 0u64;
    let mut segments = Vec::with_capacity(inside.len());
    for (index, subnet) in inside.iter().enumerate() {
        let offset = u64::from(subnet.cidr.start()) - u64::from(network.start());
        used += subnet.cidr.size();
        segments.push(Segment {
            subnet_id: subnet.id,
            name: subnet.name.clone(),
            cidr: subnet.cidr,
            vlan_id: subnet.vlan_id,
            start_percent: offset as f64 / total as f64 * 100.0,
            width_percent: subnet.cidr.size() as f64 / total as f64 * 100.0,
            color_index: color_index(index, PALETTE_SIZE),
        });
    }

    SegmentLayout {
        network: Some(network),
        segments,
        boundaries: boundaries(network),
        usage: UsageStats {
            total_addresses: total,
            used_addresses: used,
            free_addresses: total - used,
            usage_percent: used as f64 / total as f64 * 100.0,
        },
    }
}

/// Deterministic round-robin color. Adjacent sorted indices land on different
/// palette slots for any palette of two or more colors; a one-color palette
/// cannot satisfy the constraint, so it is waived there.
pub fn color_index(sorted_index: usize, palette: usize) -> usize {
    if palette <= 1 {
        0
    } else {
        sorted_index % palette
    }
}

/// Boundary granularity is one size class finer than the container prefix:
/// a /16 or smaller container marks /24 boundaries, /8../15 marks /16, and
/// anything wider marks /8.
pub fn boundary_prefix(container_prefix: u8) -> u8 {
    if container_prefix >= 16 {
        24
    } else if container_prefix >= 8 {
        16
    } else {
        8
    }
}

/// Markers strictly inside (0%, 100%); the boundary coinciding with the
/// network start is suppressed.
fn boundaries(network: CidrRange) -> Vec<Boundary> {
    let step = 1u64 << (32 - u32::from(boundary_prefix(network.prefix())));
    let start = u64::from(network.start());
    let end = network.end();
    let total = network.size();

    let mut markers = Vec::new();
    let mut addr = (start / step + 1) * step;
    while addr < end {
        markers.push(Boundary {
            percent: (addr - start) as f64 / total as f64 * 100.0,
            label: std::net::Ipv4Addr::from(addr as u32).to_string(),
        });
        addr += step;
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockId;

    fn subnet(id: SubnetId, block_id: BlockId, cidr: &str) -> Subnet {
        Subnet {
            id,
            block_id,
            container_id: None,
            name: format!("net{}", id),
            vlan_id: None,
            cidr: CidrRange::parse(cidr).unwrap(),
        }
    }

    #[test]
    fn test_half_allocation_of_a_slash_24() {
        let network = CidrRange::parse("10.0.0.0/24").unwrap();
        let allocations = vec![subnet(1, 1, "10.0.0.0/25")];
        let layout = compute_layout(network, &allocations);

        assert_eq!(layout.segments.len(), 1);
        assert_eq!(layout.segments[0].start_percent, 0.0);
        assert_eq!(layout.segments[0].width_percent, 50.0);
        assert_eq!(layout.usage.total_addresses, 256);
        assert_eq!(layout.usage.used_addresses, 128);
        assert_eq!(layout.usage.free_addresses, 128);
        assert_eq!(layout.usage.usage_percent, 50.0);
    }

    #[test]
    fn test_adjacent_segments_get_different_colors() {
        let network = CidrRange::parse("10.0.0.0/22").unwrap();
        let allocations = vec![
            subnet(3, 1, "10.0.2.0/24"),
            subnet(1, 1, "10.0.0.0/24"),
            subnet(2, 1, "10.0.1.0/24"),
        ];
        let layout = compute_layout(network, &allocations);

        // Sorted by start
        let ids: Vec<SubnetId> = layout.segments.iter().map(|s| s.subnet_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        for pair in layout.segments.windows(2) {
            assert_ne!(pair[0].color_index, pair[1].color_index);
        }
    }

    #[test]
    fn test_color_wraps_without_adjacent_repeat() {
        for i in 0..20 {
            assert_ne!(color_index(i, PALETTE_SIZE), color_index(i + 1, PALETTE_SIZE));
        }
        // Waived for a one-color palette
        assert_eq!(color_index(3, 1), 0);
        assert_eq!(color_index(4, 1), 0);
    }

    #[test]
    fn test_allocations_outside_network_are_skipped() {
        let network = CidrRange::parse("10.0.0.0/24").unwrap();
        let allocations = vec![subnet(1, 1, "10.0.0.0/25"), subnet(2, 1, "192.168.0.0/24")];
        let layout = compute_layout(network, &allocations);
        assert_eq!(layout.segments.len(), 1);
        assert_eq!(layout.usage.used_addresses, 128);
    }

    #[test]
    fn test_boundary_granularity() {
        assert_eq!(boundary_prefix(24), 24);
        assert_eq!(boundary_prefix(16), 24);
        assert_eq!(boundary_prefix(15), 16);
        assert_eq!(boundary_prefix(8), 16);
        assert_eq!(boundary_prefix(7), 8);
        assert_eq!(boundary_prefix(0), 8);
    }

    #[test]
    fn test_boundaries_are_strictly_interior() {
        let network = CidrRange::parse("10.0.0.0/22").unwrap();
        let layout = compute_layout(network, &[]);

        // /22 marks /24 boundaries: .1.0, .2.0, .3.0 but not .0.0 or the end
        let labels: Vec<&str> = layout.boundaries.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["10.0.1.0", "10.0.2.0", "10.0.3.0"]);
        for boundary in &layout.boundaries {
            assert!(boundary.percent > 0.0 && boundary.percent < 100.0);
        }
        assert_eq!(layout.boundaries[0].percent, 25.0);
    }

    #[test]
    fn test_slash_24_has_no_interior_boundaries() {
        let network = CidrRange::parse("192.168.1.0/24").unwrap();
        let layout = compute_layout(network, &[]);
        assert!(layout.boundaries.is_empty());
    }

    #[test]
    fn test_empty_allocations_is_a_valid_state() {
        let network = CidrRange::parse("10.0.0.0/24").unwrap();
        let layout = compute_layout(network, &[]);
        assert!(layout.segments.is_empty());
        assert_eq!(layout.usage.used_addresses, 0);
        assert_eq!(layout.usage.usage_percent, 0.0);

        let nothing = SegmentLayout::empty();
        assert!(nothing.network.is_none());
        assert!(nothing.segments.is_empty());
    }
}
