// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-26

//! flatfs — a flat-namespace in-memory file service over a unix socket.
//!
//! Multiple client processes speak a single-line request/response
//! protocol against one shared namespace. The crate splits into:
//!
//! * [`store`] — the inode table holding owner, permissions and bytes.
//! * [`namespace`] — the partitioned name index with its two-lock
//!   rename protocol and runtime-selected lock policy.
//! * [`session`] — per-connection descriptor table and permission layer.
//! * [`proto`] — line parsing and command dispatch.
//! * [`server`] — the accept loop, worker threads and shutdown barrier.
//! * [`client`] — a small blocking client for the same wire protocol.
//!
//! The `flatfsd` binary wires these together behind a clap CLI.

#![warn(missing_docs)]

pub mod client;
pub mod namespace;
pub mod perm;
pub mod proto;
pub mod server;
pub mod session;
pub mod store;

pub use client::{ClientError, FlatClient};
pub use namespace::{IndexError, LockPolicy, NamespaceIndex, RenameError};
pub use perm::Perm;
pub use proto::{Engine, Outcome, ParseError, Request, MAX_LINE};
pub use server::{ServerContext, Supervisor, SupervisorError};
pub use session::{Session, SessionError, FD_TABLE_SIZE};
pub use store::{ContentStore, Inumber, StoreError, Uid};
