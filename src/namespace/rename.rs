// CLASSIFICATION: COMMUNITY
// Filename: namespace/rename.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-25

//! Deadlock-free cross-partition rename protocol.
//!
//! Moving a binding touches two partitions, so a naive lock-both approach
//! can deadlock against a concurrent rename going the opposite way. The
//! protocol here is optimistic two-phase try-locking: grab the source
//! partition without blocking, then the target; if either acquisition is
//! busy, release everything and retry after a randomized delay scaled by
//! the attempt count. Randomization mitigates mutual livelock between
//! symmetric retries but does not eliminate it under adversarial timing.

use std::thread;
use std::time::Duration;

use log::trace;
use rand::Rng;
use thiserror::Error;

use super::{IndexError, NamespaceIndex};

/// Upper bound in milliseconds of the uniform random backoff base delay.
const BACKOFF_BASE_MAX_MS: u64 = 50;

/// Errors surfaced by [`NamespaceIndex::rename`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RenameError {
    /// The old name is not bound.
    #[error("rename source is not bound")]
    SourceMissing,
    /// The new name is already bound.
    #[error("rename target already bound")]
    TargetExists,
    /// Fatal partition failure.
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl NamespaceIndex {
    /// Atomically move the binding of `old` to `new`.
    ///
    /// The existence pre-checks are advisory, not reservations: a racing
    /// create or rename can still slip between the checks and the locked
    /// section. The locked section re-verifies the source; the target
    /// window is knowingly left open, matching the documented protocol.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), RenameError> {
        let src = self.home(old);
        let dst = self.home(new);

        if self.lookup(old)?.is_none() {
            return Err(RenameError::SourceMissing);
        }
        if self.lookup(new)?.is_some() {
            return Err(RenameError::TargetExists);
        }

        let base_ms = rand::thread_rng().gen_range(1..=BACKOFF_BASE_MAX_MS);
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let Some(mut first) = self.partitions[src].try_exclusive()? else {
                backoff(base_ms, attempt);
                continue;
            };
            // Same-partition move needs no second lock; the source guard
            // already covers the target tree.
            let second = if src == dst {
                None
            } else {
                match self.partitions[dst].try_exclusive()? {
                    Some(guard) => Some(guard),
                    None => {
                        drop(first);
                        backoff(base_ms, attempt);
                        continue;
                    }
                }
            };

            let Some(inumber) = first.remove(old) else {
                // A concurrent winner moved or deleted the source after
                // the pre-check; report it rather than binding a ghost.
                return Err(RenameError::SourceMissing);
            };
            match second {
                Some(mut guard) => {
                    guard.insert(new.to_string(), inumber);
                }
                None => {
                    first.insert(new.to_string(), inumber);
                }
            }
            trace!("rename {old:?} -> {new:?} settled on attempt {attempt}");
            // Guards drop in reverse declaration order: target partition
            // first, then source.
            return Ok(());
        }
    }
}

fn backoff(base_ms: u64, attempt: u64) {
    let delay = base_ms.saturating_mul(attempt);
    trace!("rename backoff {delay} ms (attempt {attempt})");
    thread::sleep(Duration::from_millis(delay));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::LockPolicy;

    #[test]
    fn rename_moves_the_binding() {
        let index = NamespaceIndex::new(4, LockPolicy::RwLock);
        index.insert("old", 9).expect("insert");
        index.rename("old", "new").expect("rename");
        assert_eq!(index.lookup("old").expect("lookup"), None);
        assert_eq!(index.lookup("new").expect("lookup"), Some(9));
    }

    #[test]
    fn rename_missing_source_fails() {
        let index = NamespaceIndex::new(4, LockPolicy::Mutex);
        assert_eq!(
            index.rename("ghost", "new"),
            Err(RenameError::SourceMissing)
        );
    }

    #[test]
    fn rename_onto_existing_target_fails() {
        let index = NamespaceIndex::new(4, LockPolicy::RwLock);
        index.insert("a", 1).expect("insert");
        index.insert("b", 2).expect("insert");
        assert_eq!(index.rename("a", "b"), Err(RenameError::TargetExists));
        assert_eq!(index.lookup("a").expect("lookup"), Some(1));
        assert_eq!(index.lookup("b").expect("lookup"), Some(2));
    }

    #[test]
    fn same_partition_rename_does_not_double_lock() {
        // One partition forces src == dst for every pair of names.
        let index = NamespaceIndex::new(1, LockPolicy::Mutex);
        index.insert("x", 3).expect("insert");
        index.rename("x", "y").expect("rename");
        assert_eq!(index.lookup("y").expect("lookup"), Some(3));
    }
}
