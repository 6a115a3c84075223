//! Deployment records: what is already on-chain for a (network, plan) pair.
//!
//! A record is written after every confirmed step, so an interrupted or failed
//! run leaves behind the deployed address and the last completed step.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use alloy_core::primitives::B256;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{DeployedInstance, RecordError};

const LOCK_FILENAME: &str = ".lock";

/// One confirmed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub label: String,
    pub tx_hash: B256,
}

/// Progress of a plan on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub network: String,
    pub plan: String,
    /// Fingerprint of the compiled plan that produced this record.
    pub plan_fingerprint: String,
    pub chain_id: Option<u64>,
    pub instance: Option<DeployedInstance>,
    pub completed_steps: Vec<StepRecord>,
    pub total_steps: usize,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
    pub tool_version: String,
}

impl DeploymentRecord {
    pub fn new(
        network: impl Into<String>,
        plan: impl Into<String>,
        plan_fingerprint: impl Into<String>,
        total_steps: usize,
    ) -> Self {
        Self {
            network: network.into(),
            plan: plan.into(),
            plan_fingerprint: plan_fingerprint.into(),
            chain_id: None,
            instance: None,
            completed_steps: Vec::new(),
            total_steps,
            updated_at: chrono::Utc::now().timestamp(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Number of leading steps confirmed on-chain.
    pub fn completed(&self) -> usize {
        self.completed_steps.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed() >= self.total_steps
    }

    /// Index of the last confirmed step, if any.
    pub fn last_completed_step(&self) -> Option<usize> {
        self.completed_steps.last().map(|s| s.index)
    }

    pub(crate) fn push_step(&mut self, index: usize, label: String, tx_hash: B256) {
        self.completed_steps.push(StepRecord {
            index,
            label,
            tx_hash,
        });
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Restart the record for a new run of `fingerprint`, keeping the instance.
    pub(crate) fn restart(&mut self, fingerprint: &str, total_steps: usize) {
        self.plan_fingerprint = fingerprint.to_string();
        self.completed_steps.clear();
        self.total_steps = total_steps;
        self.updated_at = chrono::Utc::now().timestamp();
        self.tool_version = env!("CARGO_PKG_VERSION").to_string();
    }
}

/// Directory of deployment records, one subdirectory per network.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

/// Exclusive lock on a network's records; released on drop.
#[derive(Debug)]
pub struct RecordLock {
    _file: File,
    path: PathBuf,
}

impl RecordLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record for `plan` on `network`.
    pub fn record_path(&self, network: &str, plan: &str) -> PathBuf {
        self.dir.join(network).join(format!("{plan}.json"))
    }

    fn network_dir(&self, network: &str) -> Result<PathBuf, RecordError> {
        let dir = self.dir.join(network);
        std::fs::create_dir_all(&dir).map_err(|source| RecordError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Take the exclusive lock for `network`. Fails if another run holds it.
    pub fn lock(&self, network: &str) -> Result<RecordLock, RecordError> {
        let path = self.network_dir(network)?.join(LOCK_FILENAME);
        let file = File::create(&path).map_err(|source| RecordError::Io {
            path: path.clone(),
            source,
        })?;
        file.try_lock_exclusive()
            .map_err(|_| RecordError::Locked(path.clone()))?;
        tracing::debug!(path = %path.display(), "Record lock acquired");
        Ok(RecordLock { _file: file, path })
    }

    /// Load the record for `plan` on `network`, if one exists.
    pub fn load(&self, network: &str, plan: &str) -> Result<Option<DeploymentRecord>, RecordError> {
        let path = self.record_path(network, plan);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(|source| RecordError::Io {
            path: path.clone(),
            source,
        })?;
        let record = serde_json::from_str(&content)
            .map_err(|source| RecordError::Corrupt { path, source })?;
        Ok(Some(record))
    }

    /// Persist a record, replacing the previous one atomically.
    pub fn save(&self, record: &DeploymentRecord) -> Result<PathBuf, RecordError> {
        self.network_dir(&record.network)?;
        let path = self.record_path(&record.network, &record.plan);

        let json = serde_json::to_string_pretty(record).map_err(|source| RecordError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| RecordError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| RecordError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), completed = record.completed(), "Record saved");
        Ok(path)
    }
}
