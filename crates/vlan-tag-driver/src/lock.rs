//! Per-physical-device locking
//!
//! Creating a tagged device is not atomic with checking whether it already
//! exists, so every create/delete against one physical device runs under
//! one exclusive lock. The [`LockRegistry`] hands out one in-process mutex
//! per device; when a lock directory is configured it also takes an
//! exclusive `flock` on `<lock_dir>/<device>.lock`, which serializes
//! separate driver processes on the same host.
//!
//! The registry is created once per process and passed explicitly to the
//! lifecycle manager. Entries are created on first use and never removed.

use dashmap::DashMap;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use vlan_tag_common::{VlanTagError, VlanTagResult};

/// Table of per-device locks
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
    lock_dir: Option<PathBuf>,
}

impl LockRegistry {
    /// Registry with in-process locks only
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that also takes file locks under `lock_dir`
    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            locks: DashMap::new(),
            lock_dir: Some(lock_dir.into()),
        }
    }

    /// Block until the lock for `device` is held
    pub async fn acquire(&self, device: &str) -> VlanTagResult<DeviceLockGuard> {
        let mutex = self
            .locks
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let local = mutex.lock_owned().await;

        let file = match &self.lock_dir {
            Some(dir) => Some(lock_file(dir, device).await?),
            None => None,
        };

        debug!(device = %device, "Acquired device lock");
        Ok(DeviceLockGuard {
            device: device.to_string(),
            _file: file,
            _local: local,
        })
    }
}

/// Held for the duration of one lifecycle operation; releases on drop
#[derive(Debug)]
pub struct DeviceLockGuard {
    device: String,
    _file: Option<Flock<File>>,
    _local: OwnedMutexGuard<()>,
}

impl Drop for DeviceLockGuard {
    fn drop(&mut self) {
        debug!(device = %self.device, "Released device lock");
    }
}

async fn lock_file(dir: &Path, device: &str) -> VlanTagResult<Flock<File>> {
    let dir = dir.to_path_buf();
    let path = dir.join(format!("{}.lock", device));

    let locked = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || -> io::Result<Flock<File>> {
            fs::create_dir_all(&dir)?;
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| io::Error::from(errno))
        })
        .await
        .map_err(io::Error::other)
        .and_then(|r| r)
    };

    locked.map_err(|source| VlanTagError::LockAcquisition {
        device: device.to_string(),
        path,
        source,
    })
}
