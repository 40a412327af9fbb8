//! Remediation action history
//!
//! Append-only log of terminal outcomes, keyed by workload:
//! - One record per processed incident, never mutated after append
//! - Queried by "since" timestamp for cooldown and rate-limit decisions
//! - Persisted as a JSON snapshot via atomic temp-file rename; appends
//!   are flushed before the caller sees its result
//! - Pruned by age only

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{HistoryRecord, WorkloadRef};

/// Default retention period (30 days)
const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for the history store
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum age of retained records
    pub retention: Duration,
    /// Path for persistent storage (optional)
    pub persistence_path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            persistence_path: None,
        }
    }
}

/// Append-only store of remediation history records
pub struct HistoryStore {
    /// Records per workload key, ordered by applied_at
    records: RwLock<HashMap<String, Vec<HistoryRecord>>>,
    config: HistoryConfig,
}

impl HistoryStore {
    /// Create an in-memory store
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a store backed by a JSON snapshot file
    pub fn with_persistence(persistence_path: PathBuf) -> Result<Self> {
        let config = HistoryConfig {
            persistence_path: Some(persistence_path.clone()),
            ..Default::default()
        };

        let mut records = HashMap::new();
        if persistence_path.exists() {
            match load_from_disk(&persistence_path) {
                Ok(loaded) => records = loaded,
                Err(e) => {
                    warn!(error = %e, "Failed to load persisted history, starting fresh");
                }
            }
        }

        Ok(Self {
            records: RwLock::new(records),
            config,
        })
    }

    /// Append a record and flush it durably before returning
    pub async fn append(&self, record: HistoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let key = record.workload.key();
        debug!(
            workload = %key,
            outcome = %record.outcome,
            reason_code = %record.reason_code,
            "Appending history record"
        );
        records.entry(key).or_default().push(record);

        if let Some(ref path) = self.config.persistence_path {
            save_to_disk(&records, path)?;
        }

        Ok(())
    }

    /// Records for a workload since the given instant, ordered by applied_at
    pub async fn query(&self, workload: &WorkloadRef, since: DateTime<Utc>) -> Vec<HistoryRecord> {
        let records = self.records.read().await;
        records
            .get(&workload.key())
            .map(|list| {
                list.iter()
                    .filter(|r| r.applied_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All records for a workload, ordered by applied_at
    pub async fn all_for(&self, workload: &WorkloadRef) -> Vec<HistoryRecord> {
        let records = self.records.read().await;
        records.get(&workload.key()).cloned().unwrap_or_default()
    }

    /// Drop records older than the retention period
    ///
    /// Returns the number of records removed.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::days(30));

        let mut records = self.records.write().await;
        let mut removed = 0usize;

        for list in records.values_mut() {
            let before = list.len();
            list.retain(|r| r.applied_at >= cutoff);
            removed += before - list.len();
        }
        records.retain(|_, list| !list.is_empty());

        if removed > 0 {
            info!(removed = removed, "Pruned history records");
            if let Some(ref path) = self.config.persistence_path {
                save_to_disk(&records, path)?;
            }
        }

        Ok(removed)
    }

    /// Summary statistics over the store
    pub async fn stats(&self) -> HistoryStats {
        let records = self.records.read().await;
        let total: usize = records.values().map(Vec::len).sum();
        let oldest = records
            .values()
            .flat_map(|list| list.iter().map(|r| r.applied_at))
            .min();
        let newest = records
            .values()
            .flat_map(|list| list.iter().map(|r| r.applied_at))
            .max();

        HistoryStats {
            workloads: records.len(),
            records: total,
            oldest,
            newest,
        }
    }
}

/// Statistics about the history store
#[derive(Debug, Clone)]
pub struct HistoryStats {
    pub workloads: usize,
    pub records: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Write the snapshot atomically via a temp file rename
fn save_to_disk(records: &HashMap<String, Vec<HistoryRecord>>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_vec(records).context("Failed to serialize history")?;

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, &json)
        .with_context(|| format!("Failed to write temp file {:?}", temp_path))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

/// Load a snapshot, re-sorting each workload's records by applied_at
fn load_from_disk(path: &Path) -> Result<HashMap<String, Vec<HistoryRecord>>> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read history file {:?}", path))?;

    let mut records: HashMap<String, Vec<HistoryRecord>> =
        serde_json::from_slice(&data).context("Failed to deserialize history")?;

    for list in records.values_mut() {
        list.sort_by_key(|r| r.applied_at);
    }

    let total: usize = records.values().map(Vec::len).sum();
    info!(path = %path.display(), records = total, "Loaded history from disk");
    Ok(records)
}
