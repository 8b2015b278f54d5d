// CLASSIFICATION: COMMUNITY
// Filename: store.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-24

//! In-memory content store: the inode table behind the namespace.
//!
//! Each identifier maps to one record carrying the owning uid, the two
//! permission fields and the file bytes. Identifiers come from a
//! process-wide monotonic counter and are never reused, even after
//! release. All operations are safe to call from any worker thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::debug;
use thiserror::Error;

use crate::perm::Perm;

/// Immutable handle allocated once per created entry.
pub type Inumber = u64;

/// Credential of a connecting peer, as reported by the transport.
pub type Uid = u32;

/// Errors surfaced by content store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The identifier has no live record.
    #[error("no record for identifier {0}")]
    NoSuchRecord(Inumber),
    /// The record table lock was poisoned by a panicking holder.
    #[error("content store lock poisoned")]
    Poisoned,
}

/// Per-identifier record owned by the store.
#[derive(Debug, Clone)]
struct ContentRecord {
    owner: Uid,
    owner_perm: Perm,
    other_perm: Perm,
    data: Vec<u8>,
}

/// Ownership and permission view of a record, without its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStat {
    /// Uid that created the record.
    pub owner: Uid,
    /// Permission applied when the caller is the owner.
    pub owner_perm: Perm,
    /// Permission applied to everyone else.
    pub other_perm: Perm,
}

/// Concurrent inode table.
pub struct ContentStore {
    records: Mutex<HashMap<Inumber, ContentRecord>>,
    next: AtomicU64,
}

impl ContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh identifier and bind an empty record to it.
    pub fn create(&self, owner: Uid, owner_perm: Perm, other_perm: Perm) -> Result<Inumber, StoreError> {
        let inumber = self.next.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(
            inumber,
            ContentRecord {
                owner,
                owner_perm,
                other_perm,
                data: Vec::new(),
            },
        );
        debug!("store: allocated inumber {inumber} for uid {owner}");
        Ok(inumber)
    }

    /// Return ownership and permission fields for a record.
    pub fn stat(&self, inumber: Inumber) -> Result<RecordStat, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let rec = records
            .get(&inumber)
            .ok_or(StoreError::NoSuchRecord(inumber))?;
        Ok(RecordStat {
            owner: rec.owner,
            owner_perm: rec.owner_perm,
            other_perm: rec.other_perm,
        })
    }

    /// Fetch up to `max_len` bytes of record content.
    pub fn fetch(&self, inumber: Inumber, max_len: usize) -> Result<Vec<u8>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let rec = records
            .get(&inumber)
            .ok_or(StoreError::NoSuchRecord(inumber))?;
        Ok(rec.data.iter().take(max_len).copied().collect())
    }

    /// Replace record content.
    pub fn overwrite(&self, inumber: Inumber, bytes: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let rec = records
            .get_mut(&inumber)
            .ok_or(StoreError::NoSuchRecord(inumber))?;
        rec.data = bytes.to_vec();
        Ok(())
    }

    /// Drop a record. The identifier is retired, never reissued.
    pub fn release(&self, inumber: Inumber) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records
            .remove(&inumber)
            .map(|_| ())
            .ok_or(StoreError::NoSuchRecord(inumber))
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn identifiers_are_strictly_increasing() {
        let store = ContentStore::new();
        let a = store.create(1, Perm::READ, Perm::empty()).expect("create");
        let b = store.create(1, Perm::READ, Perm::empty()).expect("create");
        let c = store.create(2, Perm::WRITE, Perm::empty()).expect("create");
        assert!(a < b && b < c);
    }

    #[test]
    fn released_identifier_is_not_reused() {
        let store = ContentStore::new();
        let a = store.create(1, Perm::READ, Perm::empty()).expect("create");
        store.release(a).expect("release");
        let b = store.create(1, Perm::READ, Perm::empty()).expect("create");
        assert!(b > a);
        assert_eq!(store.stat(a), Err(StoreError::NoSuchRecord(a)));
    }

    #[test]
    fn overwrite_then_fetch_truncates() {
        let store = ContentStore::new();
        let ino = store
            .create(7, Perm::READ | Perm::WRITE, Perm::READ)
            .expect("create");
        store.overwrite(ino, b"hello").expect("overwrite");
        assert_eq!(store.fetch(ino, 3).expect("fetch"), b"hel");
        assert_eq!(store.fetch(ino, 64).expect("fetch"), b"hello");
    }

    #[test]
    fn missing_record_reports_no_such_record() {
        let store = ContentStore::new();
        assert_eq!(store.fetch(42, 8), Err(StoreError::NoSuchRecord(42)));
        assert_eq!(store.overwrite(42, b"x"), Err(StoreError::NoSuchRecord(42)));
        assert_eq!(store.release(42), Err(StoreError::NoSuchRecord(42)));
    }

    #[test]
    fn concurrent_creates_never_collide() {
        let store = Arc::new(ContentStore::new());
        let mut handles = Vec::new();
        for uid in 0..4u32 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..50 {
                    seen.push(store.create(uid, Perm::READ, Perm::empty()).expect("create"));
                }
                seen
            }));
        }
        let mut all: Vec<Inumber> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread failed"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
