// CLASSIFICATION: COMMUNITY
// Filename: session.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-25

//! Per-connection session state: descriptor table and permission checks.
//!
//! A session is owned by exactly one worker thread, so the descriptor
//! table needs no locking. The table has a fixed five slots; a free slot
//! holds `None`. Slot indices double as the externally visible
//! descriptor numbers.

use thiserror::Error;

use crate::namespace::{IndexError, NamespaceIndex};
use crate::perm::Perm;
use crate::store::{ContentStore, Inumber, Uid};

/// Number of descriptor slots per session.
pub const FD_TABLE_SIZE: usize = 5;

/// One open binding between a session and an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdEntry {
    /// Identifier the descriptor refers to.
    pub inumber: Inumber,
    /// Permission granted at open time; never widens afterwards.
    pub granted: Perm,
}

/// Errors surfaced by session operations, one per wire code class.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The name is not bound in the namespace.
    #[error("name not found")]
    NotFound,
    /// Requested mode exceeds the effective permission, or a write was
    /// attempted through a descriptor without the write bit.
    #[error("permission denied")]
    Denied,
    /// All five descriptor slots are in use.
    #[error("descriptor table full")]
    TableFull,
    /// The descriptor is out of range or its slot is free.
    #[error("bad descriptor")]
    BadDescriptor,
    /// Another descriptor in this session already references the identifier.
    #[error("identifier already open in this session")]
    AlreadyOpen,
    /// A read was attempted through a descriptor without the read bit.
    #[error("descriptor lacks read permission")]
    ReadDenied,
    /// The content store failed to service the request.
    #[error("content store failure")]
    Store,
    /// Fatal namespace failure; the connection cannot continue.
    #[error(transparent)]
    Fatal(#[from] IndexError),
}

/// Per-connection state: peer credential plus the open-descriptor table.
pub struct Session {
    uid: Uid,
    fds: [Option<FdEntry>; FD_TABLE_SIZE],
}

impl Session {
    /// Create a session for the given peer credential.
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            fds: [None; FD_TABLE_SIZE],
        }
    }

    /// Credential of the connecting peer.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Number of descriptors currently open.
    pub fn open_count(&self) -> usize {
        self.fds.iter().flatten().count()
    }

    /// Open `name` with the requested mode and return the descriptor number.
    ///
    /// The effective permission is the record's owner field when the
    /// caller is the owner, the other field otherwise; every requested
    /// bit must be granted. Read-only and write-only are distinct levels,
    /// never compared numerically.
    pub fn open(
        &mut self,
        namespace: &NamespaceIndex,
        store: &ContentStore,
        name: &str,
        mode: Perm,
    ) -> Result<usize, SessionError> {
        let inumber = namespace.lookup(name)?.ok_or(SessionError::NotFound)?;
        let stat = store.stat(inumber).map_err(|_| SessionError::Store)?;
        if self.fds.iter().flatten().any(|fd| fd.inumber == inumber) {
            return Err(SessionError::AlreadyOpen);
        }
        let slot = self
            .fds
            .iter()
            .position(Option::is_none)
            .ok_or(SessionError::TableFull)?;
        let effective = if stat.owner == self.uid {
            stat.owner_perm
        } else {
            stat.other_perm
        };
        if !effective.grants(mode) {
            return Err(SessionError::Denied);
        }
        self.fds[slot] = Some(FdEntry {
            inumber,
            granted: mode,
        });
        Ok(slot)
    }

    /// Free a descriptor slot.
    pub fn close(&mut self, fd: usize) -> Result<(), SessionError> {
        let slot = self
            .fds
            .get_mut(fd)
            .ok_or(SessionError::BadDescriptor)?;
        if slot.is_none() {
            return Err(SessionError::BadDescriptor);
        }
        *slot = None;
        Ok(())
    }

    /// Fetch up to `max_len` bytes through a descriptor.
    pub fn read(
        &self,
        store: &ContentStore,
        fd: usize,
        max_len: usize,
    ) -> Result<Vec<u8>, SessionError> {
        let entry = self.entry(fd)?;
        if !entry.granted.contains(Perm::READ) {
            return Err(SessionError::ReadDenied);
        }
        store
            .fetch(entry.inumber, max_len)
            .map_err(|_| SessionError::Store)
    }

    /// Overwrite content through a descriptor.
    pub fn write(
        &self,
        store: &ContentStore,
        fd: usize,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        let entry = self.entry(fd)?;
        if !entry.granted.contains(Perm::WRITE) {
            return Err(SessionError::Denied);
        }
        store
            .overwrite(entry.inumber, bytes)
            .map_err(|_| SessionError::Store)
    }

    /// Free every slot. Open identifiers are left untouched in the store.
    pub fn reset(&mut self) {
        self.fds = [None; FD_TABLE_SIZE];
    }

    fn entry(&self, fd: usize) -> Result<FdEntry, SessionError> {
        self.fds
            .get(fd)
            .copied()
            .flatten()
            .ok_or(SessionError::BadDescriptor)
    }
}
