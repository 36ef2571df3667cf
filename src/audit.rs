//! Append-only change log.
//!
//! Every mutation and restore gets one entry: action kind, the block's name
//! at the time of the action (a plain string, so it survives block deletion),
//! a human-readable details line, and the serialized mutation payload.
//! Entries are never rewritten; the log is JSON lines, one entry per line,
//! and grows without bound by design.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{ActionKind, Mutation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub block: String,
    pub details: String,
    /// JSON-serialized `Mutation`, kept for reconstructing what changed.
    pub content: String,
}

/// Read-side filter; all fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub block: Option<String>,
    pub action: Option<ActionKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    fn matches(&self, entry: &ChangeLogEntry) -> bool {
        if let Some(block) = &self.block {
            if &entry.block != block {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}

pub struct AuditLog {
    path: PathBuf,
    entries: Vec<ChangeLogEntry>,
    next_id: u64,
}

impl AuditLog {
    /// Open the log file, loading any existing entries. A torn final line
    /// (crash mid-append) is skipped with a warning; everything before it is
    /// intact because entries are only ever appended.
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut entries = Vec::new();
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            for (number, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ChangeLogEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(err) => {
                        log::warn!(
                            "Skipping unreadable change log line {}: {}",
                            number + 1,
                            err
                        );
                    }
                }
            }
        }
        let next_id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        log::debug!("Loaded {} change log entries", entries.len());
        Ok(AuditLog {
            path,
            entries,
            next_id,
        })
    }

    /// Append one entry. The write must succeed for the triggering mutation
    /// to be considered complete; callers roll the mutation back when this
    /// fails.
    pub fn append(&mut self, mutation: &Mutation, block: &str) -> Result<ChangeLogEntry> {
        let entry = ChangeLogEntry {
            id: self.next_id,
            timestamp: Utc::now(),
            action: mutation.action(),
            block: block.to_string(),
            details: mutation.details(block),
            content: serde_json::to_string(mutation)?,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        log::info!("{}", entry.details);
        self.next_id += 1;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Matching entries, newest first.
    pub fn list(&self, filter: &AuditFilter) -> Vec<ChangeLogEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, Entity};
    use tempfile::tempdir;

    fn block_mutation(name: &str) -> Mutation {
        Mutation::Create {
            entity: Entity::Block(Block {
                id: 1,
                name: name.to_string(),
                position: 1,
                collapsed: false,
                base_network: None,
            }),
        }
    }

    #[test]
    fn test_append_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("change_log.jsonl");

        let mut log = AuditLog::open(path.clone()).unwrap();
        log.append(&block_mutation("Lab"), "Lab").unwrap();
        log.append(&Mutation::Restore { snapshot_id: 3 }, "-")
            .unwrap();
        assert_eq!(log.len(), 2);

        // Entries survive a reopen, ids keep increasing
        let mut reopened = AuditLog::open(path).unwrap();
        assert_eq!(reopened.len(), 2);
        let entry = reopened.append(&block_mutation("Office"), "Office").unwrap();
        assert_eq!(entry.id, 3);
    }

    #[test]
    fn test_list_is_newest_first_and_filtered() {
        let dir = tempdir().unwrap();
        let mut log = AuditLog::open(dir.path().join("log.jsonl")).unwrap();
        log.append(&block_mutation("Lab"), "Lab").unwrap();
        log.append(&block_mutation("Office"), "Office").unwrap();
        log.append(&Mutation::Restore { snapshot_id: 1 }, "-")
            .unwrap();

        let all = log.list(&AuditFilter::default());
        assert_eq!(all.len(), 3);
        assert!(all[0].id > all[1].id && all[1].id > all[2].id);

        let lab_only = log.list(&AuditFilter {
            block: Some("Lab".to_string()),
            ..Default::default()
        });
        assert_eq!(lab_only.len(), 1);
        assert_eq!(lab_only[0].block, "Lab");

        let restores = log.list(&AuditFilter {
            action: Some(ActionKind::Restore),
            ..Default::default()
        });
        assert_eq!(restores.len(), 1);
    }

    #[test]
    fn test_torn_final_line_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut log = AuditLog::open(path.clone()).unwrap();
        log.append(&block_mutation("Lab"), "Lab").unwrap();
        drop(log);

        // Simulate a crash mid-append
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":2,\"timest").unwrap();
        drop(file);

        let reopened = AuditLog::open(path).unwrap();
        assert_eq!(reopened.len(), 1);
    }
}
