//! Error types for the allocation and snapshot engine.
//!
//! Validation errors (`InvalidCidr`, `OverlapConflict`, `InvalidOrder`, ...)
//! are expected and recoverable; they carry enough detail for the caller to
//! correct the input and never leave a partial commit behind. `Persistence`
//! and `Corrupt` report storage-level trouble.

use crate::model::Subnet;

/// Errors surfaced by the allocation core.
#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("invalid CIDR '{input}': {reason}")]
    InvalidCidr { input: String, reason: String },

    #[error("{cidr} overlaps with existing subnet '{}' ({})", .conflicting.name, .conflicting.cidr)]
    OverlapConflict { cidr: String, conflicting: Subnet },

    #[error("VLAN {vlan} is already used by subnet '{}' in the same block", .conflicting.name)]
    DuplicateVlan { vlan: u16, conflicting: Subnet },

    #[error("a block named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("invalid name: {reason}")]
    InvalidName { reason: String },

    #[error("VLAN ID {vlan} is out of range (must be 1-4094)")]
    InvalidVlan { vlan: u16 },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("invalid block order: {reason}")]
    InvalidOrder { reason: String },

    #[error("snapshot {snapshot_id} is corrupt: {reason}")]
    Corrupt { snapshot_id: u64, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),
}

impl From<serde_json::Error> for IpamError {
    fn from(err: serde_json::Error) -> Self {
        IpamError::Persistence(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

pub type Result<T> = std::result::Result<T, IpamError>;
