//! Leases on file-backed sources.
//!
//! Opening a file source creates an `ObjectUrl` in the registry. The lease is revoked exactly
//! once: explicitly through `revoke`, or when it is dropped on an error path.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

#[derive(Debug, Default)]
struct Leases {
    next_id: u64,
    live: HashMap<u64, PathBuf>,
    revoked: u64,
}

/// Keeps track of the object URLs that are currently handed out.
#[derive(Debug, Clone, Default)]
pub struct ObjectUrlRegistry {
    leases: Arc<Mutex<Leases>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, path: impl AsRef<Path>) -> ObjectUrl {
        let path = path.as_ref().to_path_buf();
        let id = {
            let mut leases = self.lock();
            let id = leases.next_id;
            leases.next_id += 1;
            leases.live.insert(id, path.clone());
            id
        };
        let url = format!("blob:detector/{}", id);
        log::debug!("Created {} for {}", url, path.display());

        ObjectUrl {
            id,
            url,
            path,
            registry: self.clone(),
            revoked: false,
        }
    }

    /// Number of leases not revoked yet.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Number of revocations so far.
    pub fn revoked_count(&self) -> u64 {
        self.lock().revoked
    }

    fn release(&self, id: u64) {
        let mut leases = self.lock();
        if leases.live.remove(&id).is_some() {
            leases.revoked += 1;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Leases> {
        self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A live lease on a file-backed source.
#[derive(Debug)]
pub struct ObjectUrl {
    id: u64,
    url: String,
    path: PathBuf,
    registry: ObjectUrlRegistry,
    revoked: bool,
}

impl ObjectUrl {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn revoke(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.revoked {
            self.revoked = true;
            self.registry.release(self.id);
            log::debug!("Revoked {}", self.url);
        }
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.release();
    }
}
