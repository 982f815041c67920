//! JSON snapshot of the service tables.
//!
//! Written after every successful mutation when a state path is configured.
//! The snapshot contains the processor secret key; the file is the only place
//! it is ever written.
//!
//! Mutations hand a copy of the tables to [`SnapshotWriter`], which writes it
//! on the blocking pool. Copies are numbered in mutation order and a copy
//! older than the one already on disk is dropped.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

use crate::identity::RoleRegistry;
use crate::orders::OrderStore;
use crate::payment_config::PaymentSettings;

/// Every persisted table. New fields must be `#[serde(default)]`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub orders: OrderStore,
    #[serde(default)]
    pub registry: RoleRegistry,
    #[serde(default)]
    pub payment: PaymentSettings,
}

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the snapshot, or `None` if no file exists yet.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&self.path)
            .with_context(|| format!("failed to read state from {}", self.path.display()))?;
        let snapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("corrupt state file {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    /// Replace the snapshot via a sibling temp file and rename.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let encoded = serde_json::to_vec(snapshot).context("failed to encode state")?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&tmp, encoded)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Ordered, off-thread snapshot writes.
#[derive(Debug)]
pub struct SnapshotWriter {
    file: SnapshotFile,
    next_seq: AtomicU64,
    /// Sequence number of the snapshot on disk. Held for the whole write.
    written: Mutex<u64>,
}

impl SnapshotWriter {
    pub fn new(file: SnapshotFile) -> Arc<Self> {
        Arc::new(Self {
            file,
            next_seq: AtomicU64::new(0),
            written: Mutex::new(0),
        })
    }

    /// Queue a copy of the tables. Call while holding the state lock so the
    /// sequence number follows mutation order.
    pub fn submit(self: &Arc<Self>, snapshot: Snapshot) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let writer = self.clone();
                handle.spawn_blocking(move || writer.write(seq, &snapshot));
            }
            // No runtime (startup, plain threads): write inline.
            Err(_) => self.write(seq, &snapshot),
        }
    }

    /// Write `snapshot` synchronously, superseding anything queued before.
    pub fn flush(&self, snapshot: &Snapshot) -> Result<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        self.file.save(snapshot)?;
        *written = seq;
        Ok(())
    }

    fn write(&self, seq: u64, snapshot: &Snapshot) {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if seq <= *written {
            debug!(seq, written = *written, "Skipping stale snapshot");
            return;
        }
        match self.file.save(snapshot) {
            Ok(()) => *written = seq,
            Err(e) => error!(seq, error = %format!("{e:#}"), "Failed to persist state"),
        }
    }
}
