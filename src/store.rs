//! Record-set persistence.
//!
//! The live graph is kept as three JSON record sets plus a small meta file
//! with the id counters: `blocks.json`, `containers.json`, `subnets.json`,
//! `meta.json`. Writes rewrite whole files; at tens of records that is both
//! simpler and faster than anything incremental.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Block, Container, NetworkState, Subnet};

const BLOCKS_FILE: &str = "blocks.json";
const CONTAINERS_FILE: &str = "containers.json";
const SUBNETS_FILE: &str = "subnets.json";
const META_FILE: &str = "meta.json";

#[derive(Serialize, Deserialize)]
struct Meta {
    next_block_id: u32,
    next_container_id: u32,
    next_subnet_id: u32,
}

pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(FileStore { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Load the graph, or an empty one on first start. A missing meta file
    /// (older layout) is repaired from the highest ids in use.
    pub fn load(&self) -> Result<NetworkState> {
        let mut state = NetworkState::new();
        if let Some(blocks) = self.read_json::<Vec<Block>>(BLOCKS_FILE)? {
            state.blocks = blocks;
        }
        if let Some(containers) = self.read_json::<Vec<Container>>(CONTAINERS_FILE)? {
            state.containers = containers;
        }
        if let Some(subnets) = self.read_json::<Vec<Subnet>>(SUBNETS_FILE)? {
            state.subnets = subnets;
        }
        if let Some(meta) = self.read_json::<Meta>(META_FILE)? {
            state.set_counters((meta.next_block_id, meta.next_container_id, meta.next_subnet_id));
        }
        state.repair_counters();
        log::debug!(
            "Loaded {} blocks, {} containers, {} subnets from {:?}",
            state.blocks.len(),
            state.containers.len(),
            state.subnets.len(),
            self.data_dir
        );
        Ok(state)
    }

    /// Persist every record set. Any failure is a `Persistence` error; the
    /// caller decides whether to roll back.
    pub fn save(&self, state: &NetworkState) -> Result<()> {
        let (next_block_id, next_container_id, next_subnet_id) = state.counters();
        self.write_json(BLOCKS_FILE, &state.blocks)?;
        self.write_json(CONTAINERS_FILE, &state.containers)?;
        self.write_json(SUBNETS_FILE, &state.subnets)?;
        self.write_json(
            META_FILE,
            &Meta {
                next_block_id,
                next_container_id,
                next_subnet_id,
            },
        )?;
        Ok(())
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(self.data_dir.join(name), json)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.data_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}
