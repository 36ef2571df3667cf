//! # Netblocks - IP address space documentation and planning
//!
//! This library keeps an inventory of IPv4 address space: top-level blocks,
//! the subnets allocated inside them, and optional containers that group
//! subnets for visual planning. Everything is stored as plain JSON on disk.
//!
//! ## Key Features
//!
//! - **Overlap-safe allocation**: a subnet is only accepted if its range is
//!   disjoint from every other subnet in the same block
//! - **Segment geometry**: percent-based layouts for rendering a container's
//!   address space as a proportional bar with boundary markers
//! - **Full audit trail**: every mutation is recorded in an append-only
//!   change log before it is considered committed
//! - **Snapshots**: the complete state is captured before each mutation and
//!   can be restored wholesale, with FIFO retention
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `cidr`: IPv4 CIDR parsing, normalization and range arithmetic
//! - `model`: blocks, containers, subnets and the mutation vocabulary
//! - `validate`: name, VLAN, overlap and uniqueness rules
//! - `segment`: proportional segment layouts and usage statistics
//! - `audit`: the append-only change log
//! - `snapshot`: full-state snapshots with retention trimming
//! - `store`: JSON record-set persistence
//! - `service`: the allocation service tying mutation, audit and snapshots
//!   together under one lock
//! - `config`: YAML configuration with environment overrides
//! - `error`: the crate-wide error type
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use netblocks::config::Config;
//! use netblocks::service::AllocationService;
//!
//! let service = AllocationService::open(&Config::default())?;
//! let block = service.create_block("Lab")?;
//! service.create_subnet(block.id, "Servers", "192.168.1.0/24", Some(10), None)?;
//! # Ok::<(), netblocks::IpamError>(())
//! ```

pub mod audit;
pub mod cidr;
pub mod config;
pub mod error;
pub mod model;
pub mod segment;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod validate;

pub use error::{IpamError, Result};
