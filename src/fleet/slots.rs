//! Persisted fingerprint -> slot map for one host.
//!
//! Updates are compare-and-swap: read a snapshot, compute the next map, then, holding an
//! exclusive lock file, re-check the version and atomically replace the file. A version
//! mismatch means another allocator won and the caller retries from a fresh snapshot.

use super::error::{io_error, FleetError};
use crate::shared::fs_atomic::atomic_write_json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);
const LOCK_RETRY: Duration = Duration::from_millis(2);
const MAX_CAS_ATTEMPTS: u32 = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMapSnapshot {
    pub version: u64,
    pub assignments: BTreeMap<String, u32>,
}

impl SlotMapSnapshot {
    pub fn slot_of(&self, fingerprint: &str) -> Option<u32> {
        self.assignments.get(fingerprint).copied()
    }

    fn lowest_free_slot(&self, capacity: u32) -> Option<u32> {
        (1..=capacity).find(|slot| !self.assignments.values().any(|used| used == slot))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAllocation {
    Existing(u32),
    Allocated(u32),
    /// Pool full; the hardware stays unregistered until a slot frees.
    Exhausted,
}

impl SlotAllocation {
    pub fn slot(self) -> Option<u32> {
        match self {
            SlotAllocation::Existing(slot) | SlotAllocation::Allocated(slot) => Some(slot),
            SlotAllocation::Exhausted => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotMap {
    path: PathBuf,
    capacity: u32,
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl SlotMap {
    pub fn new(path: impl Into<PathBuf>, capacity: u32) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn load(&self) -> Result<SlotMapSnapshot, FleetError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(SlotMapSnapshot::default()),
            Err(err) => return Err(io_error(&self.path, err)),
        };
        serde_json::from_str(&raw).map_err(|source| FleetError::Parse {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Returns the fingerprint's slot, allocating the lowest free one if it has none.
    pub fn allocate(&self, fingerprint: &str) -> Result<SlotAllocation, FleetError> {
        self.update(|snapshot| {
            if let Some(slot) = snapshot.slot_of(fingerprint) {
                return (None, SlotAllocation::Existing(slot));
            }
            match snapshot.lowest_free_slot(self.capacity) {
                Some(slot) => {
                    let mut next = snapshot.clone();
                    next.assignments.insert(fingerprint.to_string(), slot);
                    (Some(next), SlotAllocation::Allocated(slot))
                }
                None => (None, SlotAllocation::Exhausted),
            }
        })
    }

    pub fn release(&self, fingerprint: &str) -> Result<Option<u32>, FleetError> {
        self.update(|snapshot| match snapshot.slot_of(fingerprint) {
            Some(slot) => {
                let mut next = snapshot.clone();
                next.assignments.remove(fingerprint);
                (Some(next), Some(slot))
            }
            None => (None, None),
        })
    }

    /// Retries `plan` against fresh snapshots until its proposed map is swapped in or it
    /// proposes no change.
    fn update<T>(
        &self,
        plan: impl Fn(&SlotMapSnapshot) -> (Option<SlotMapSnapshot>, T),
    ) -> Result<T, FleetError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let snapshot = self.load()?;
            let (next, result) = plan(&snapshot);
            let Some(mut next) = next else {
                return Ok(result);
            };
            next.version = snapshot.version + 1;
            if self.compare_and_swap(snapshot.version, &next)? {
                return Ok(result);
            }
        }
        Err(FleetError::Contention {
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    fn compare_and_swap(&self, expected: u64, next: &SlotMapSnapshot) -> Result<bool, FleetError> {
        let _guard = self.lock()?;
        if self.load()?.version != expected {
            return Ok(false);
        }
        atomic_write_json(&self.path, next).map_err(|e| io_error(&self.path, e))?;
        Ok(true)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn lock(&self) -> Result<LockGuard, FleetError> {
        let path = self.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(mut file) => {
                    let _ = file.write_all(std::process::id().to_string().as_bytes());
                    return Ok(LockGuard { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() > LOCK_WAIT {
                        return Err(FleetError::LockTimeout {
                            path: path.display().to_string(),
                        });
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(err) => return Err(io_error(&path, err)),
            }
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocation_is_stable_and_lowest_free_first() {
        let dir = tempdir().expect("tempdir");
        let map = SlotMap::new(dir.path().join("slots.json"), 3);
        assert_eq!(map.allocate("a").expect("a"), SlotAllocation::Allocated(1));
        assert_eq!(map.allocate("b").expect("b"), SlotAllocation::Allocated(2));
        assert_eq!(map.allocate("a").expect("a again"), SlotAllocation::Existing(1));
        assert_eq!(map.release("a").expect("release"), Some(1));
        assert_eq!(map.allocate("c").expect("c"), SlotAllocation::Allocated(1));
        assert_eq!(map.load().expect("load").version, 4);
    }

    #[test]
    fn exhaustion_is_reported_not_raised() {
        let dir = tempdir().expect("tempdir");
        let map = SlotMap::new(dir.path().join("slots.json"), 1);
        assert_eq!(map.allocate("a").expect("a"), SlotAllocation::Allocated(1));
        assert_eq!(map.allocate("b").expect("b"), SlotAllocation::Exhausted);
        assert_eq!(map.release("missing").expect("noop"), None);
    }

    #[test]
    fn stale_lock_is_cleared() {
        let dir = tempdir().expect("tempdir");
        let map = SlotMap::new(dir.path().join("slots.json"), 2);
        let lock = map.lock_path();
        fs::write(&lock, "999999").expect("write lock");
        let old = SystemTime::now() - Duration::from_secs(120);
        fs::File::options()
            .write(true)
            .open(&lock)
            .and_then(|file| file.set_modified(old))
            .expect("age lock");
        assert_eq!(map.allocate("a").expect("a"), SlotAllocation::Allocated(1));
        assert!(!lock.exists());
    }
}
