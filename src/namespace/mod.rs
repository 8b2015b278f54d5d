// CLASSIFICATION: COMMUNITY
// Filename: namespace/mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-25

//! Partitioned name-to-identifier index.
//!
//! The namespace is split into a fixed number of independently lockable
//! partitions, each owning an ordered map from name to inumber. A name's
//! home partition is `hash(name) % partition_count`, recomputed on every
//! operation. Lookups take a shared lock, mutations an exclusive one, and
//! no operation ever holds two partition locks at once except the rename
//! protocol in [`rename`](self::rename).

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::{
    Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};

use log::debug;
use thiserror::Error;

use crate::store::Inumber;

mod rename;

pub use rename::RenameError;

/// Locking strategy applied to every partition, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Plain mutual exclusion; lookups serialize with each other.
    Mutex,
    /// Reader/writer locking; lookups proceed in parallel.
    #[default]
    RwLock,
}

impl FromStr for LockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mutex" => Ok(LockPolicy::Mutex),
            "rwlock" => Ok(LockPolicy::RwLock),
            other => Err(format!(
                "unknown lock policy {other:?} (expected \"mutex\" or \"rwlock\")"
            )),
        }
    }
}

/// Errors surfaced by namespace operations.
///
/// Poisoning means a holder panicked mid-mutation; the index may be
/// inconsistent and callers treat this as fatal, not retryable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// A partition lock was poisoned.
    #[error("namespace partition lock poisoned")]
    Poisoned,
}

type Tree = BTreeMap<String, Inumber>;

/// One lockable shard of the namespace.
enum Partition {
    Mutex(Mutex<Tree>),
    RwLock(RwLock<Tree>),
}

enum SharedGuard<'a> {
    Mutex(MutexGuard<'a, Tree>),
    RwLock(RwLockReadGuard<'a, Tree>),
}

impl Deref for SharedGuard<'_> {
    type Target = Tree;

    fn deref(&self) -> &Tree {
        match self {
            SharedGuard::Mutex(g) => g,
            SharedGuard::RwLock(g) => g,
        }
    }
}

enum ExclusiveGuard<'a> {
    Mutex(MutexGuard<'a, Tree>),
    RwLock(RwLockWriteGuard<'a, Tree>),
}

impl Deref for ExclusiveGuard<'_> {
    type Target = Tree;

    fn deref(&self) -> &Tree {
        match self {
            ExclusiveGuard::Mutex(g) => g,
            ExclusiveGuard::RwLock(g) => g,
        }
    }
}

impl DerefMut for ExclusiveGuard<'_> {
    fn deref_mut(&mut self) -> &mut Tree {
        match self {
            ExclusiveGuard::Mutex(g) => g,
            ExclusiveGuard::RwLock(g) => g,
        }
    }
}

impl Partition {
    fn new(policy: LockPolicy) -> Self {
        match policy {
            LockPolicy::Mutex => Partition::Mutex(Mutex::new(Tree::new())),
            LockPolicy::RwLock => Partition::RwLock(RwLock::new(Tree::new())),
        }
    }

    fn shared(&self) -> Result<SharedGuard<'_>, IndexError> {
        // Error types differ per lock flavor, so each arm maps its own.
        match self {
            Partition::Mutex(m) => m
                .lock()
                .map(SharedGuard::Mutex)
                .map_err(|_| IndexError::Poisoned),
            Partition::RwLock(l) => l
                .read()
                .map(SharedGuard::RwLock)
                .map_err(|_| IndexError::Poisoned),
        }
    }

    fn exclusive(&self) -> Result<ExclusiveGuard<'_>, IndexError> {
        match self {
            Partition::Mutex(m) => m
                .lock()
                .map(ExclusiveGuard::Mutex)
                .map_err(|_| IndexError::Poisoned),
            Partition::RwLock(l) => l
                .write()
                .map(ExclusiveGuard::RwLock)
                .map_err(|_| IndexError::Poisoned),
        }
    }

    /// Non-blocking exclusive acquisition. `Ok(None)` means busy; any
    /// other failure is fatal.
    fn try_exclusive(&self) -> Result<Option<ExclusiveGuard<'_>>, IndexError> {
        match self {
            Partition::Mutex(m) => match m.try_lock() {
                Ok(guard) => Ok(Some(ExclusiveGuard::Mutex(guard))),
                Err(TryLockError::WouldBlock) => Ok(None),
                Err(TryLockError::Poisoned(_)) => Err(IndexError::Poisoned),
            },
            Partition::RwLock(l) => match l.try_write() {
                Ok(guard) => Ok(Some(ExclusiveGuard::RwLock(guard))),
                Err(TryLockError::WouldBlock) => Ok(None),
                Err(TryLockError::Poisoned(_)) => Err(IndexError::Poisoned),
            },
        }
    }
}

/// The partitioned namespace index.
pub struct NamespaceIndex {
    partitions: Vec<Partition>,
}

impl NamespaceIndex {
    /// Build an index with `partition_count` partitions (minimum one),
    /// all using the given lock policy.
    pub fn new(partition_count: usize, policy: LockPolicy) -> Self {
        let count = partition_count.max(1);
        let mut partitions = Vec::with_capacity(count);
        for _ in 0..count {
            partitions.push(Partition::new(policy));
        }
        debug!("namespace: {count} partitions ({policy:?})");
        Self { partitions }
    }

    /// Number of partitions fixed at construction.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Home partition index for a name. Deterministic, never cached.
    pub fn home(&self, name: &str) -> usize {
        (fnv1a(name) % self.partitions.len() as u64) as usize
    }

    /// Resolve a name to its identifier, if bound.
    pub fn lookup(&self, name: &str) -> Result<Option<Inumber>, IndexError> {
        let guard = self.partitions[self.home(name)].shared()?;
        Ok(guard.get(name).copied())
    }

    /// Bind a name to an identifier, replacing any existing binding.
    pub fn insert(&self, name: &str, inumber: Inumber) -> Result<(), IndexError> {
        let mut guard = self.partitions[self.home(name)].exclusive()?;
        guard.insert(name.to_string(), inumber);
        Ok(())
    }

    /// Drop a binding, returning the identifier it held.
    pub fn remove(&self, name: &str) -> Result<Option<Inumber>, IndexError> {
        let mut guard = self.partitions[self.home(name)].exclusive()?;
        Ok(guard.remove(name))
    }

    /// Write one `name inumber` line per live entry.
    ///
    /// Partitions are visited in increasing index order, one exclusive
    /// lock at a time, so the walk never interferes with the rename
    /// protocol's two-lock section.
    pub fn snapshot<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for partition in &self.partitions {
            let guard = partition
                .exclusive()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            for (name, inumber) in guard.iter() {
                writeln!(out, "{name} {inumber}")?;
            }
        }
        Ok(())
    }
}

/// FNV-1a over the name bytes. Deterministic so a name's home partition
/// is stable for the process lifetime.
fn fnv1a(name: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
