// CLASSIFICATION: COMMUNITY
// Filename: server.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-26

//! Connection supervisor: accept loop, worker threads, shutdown barrier.
//!
//! The supervisor accepts on its calling thread and spawns one worker per
//! connection, unbounded. A termination signal abandons the accept loop,
//! unlinks the socket, waits on a condition variable until every worker
//! has drained, then writes the namespace snapshot and returns.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::namespace::{LockPolicy, NamespaceIndex};
use crate::proto::{Engine, Outcome, MAX_LINE};
use crate::store::{ContentStore, Uid};

/// Termination flag flipped by the signal handler.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Fatal supervisor failures; each one aborts the process with a diagnostic.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Listener setup failed.
    #[error("socket setup failed: {0}")]
    Bind(std::io::Error),
    /// The accept call failed for a reason other than interruption.
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
    /// Peer credential query failed.
    #[error("peer credential query failed: {0}")]
    PeerCred(std::io::Error),
    /// Worker thread spawn failed.
    #[error("worker spawn failed: {0}")]
    Spawn(std::io::Error),
    /// Signal handler installation failed.
    #[error("signal handler installation failed: {0}")]
    Signal(std::io::Error),
    /// Snapshot write failed.
    #[error("snapshot write failed: {0}")]
    Snapshot(std::io::Error),
}

/// Shared state handed to every worker, built once at startup.
pub struct ServerContext {
    /// The partitioned name index.
    pub namespace: NamespaceIndex,
    /// The inode table.
    pub store: ContentStore,
}

impl ServerContext {
    /// Build the context for a fresh, empty service.
    pub fn new(partitions: usize, policy: LockPolicy) -> Self {
        Self {
            namespace: NamespaceIndex::new(partitions, policy),
            store: ContentStore::new(),
        }
    }
}

#[derive(Default)]
struct Counters {
    accepted: u64,
    active: u64,
}

/// The shutdown barrier: client counters plus the condition workers
/// signal as they leave.
struct ClientGate {
    counters: Mutex<Counters>,
    idle: Condvar,
}

impl ClientGate {
    fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            idle: Condvar::new(),
        }
    }

    /// Register a new connection; returns its serial number.
    fn admit(&self) -> u64 {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters.accepted += 1;
        counters.active += 1;
        counters.accepted
    }

    /// A worker's own terminating thread reports its exit.
    fn depart(&self) {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters.active -= 1;
        self.idle.notify_one();
    }

    /// Block until every admitted connection has departed.
    fn wait_idle(&self) {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while counters.active != 0 {
            counters = match self.idle.wait(counters) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn accepted(&self) -> u64 {
        match self.counters.lock() {
            Ok(guard) => guard.accepted,
            Err(poisoned) => poisoned.into_inner().accepted,
        }
    }
}

/// Accepts connections and drives the graceful shutdown protocol.
pub struct Supervisor {
    ctx: Arc<ServerContext>,
    socket_path: PathBuf,
    snapshot_path: PathBuf,
    gate: Arc<ClientGate>,
}

impl Supervisor {
    /// Build a supervisor over a shared context.
    pub fn new(ctx: Arc<ServerContext>, socket_path: PathBuf, snapshot_path: PathBuf) -> Self {
        Self {
            ctx,
            socket_path,
            snapshot_path,
            gate: Arc::new(ClientGate::new()),
        }
    }

    /// Ask a running supervisor to begin graceful shutdown.
    ///
    /// Normally the signal handler does this; tests call it directly and
    /// then poke the listener with a throwaway connection so the blocked
    /// accept returns.
    pub fn request_shutdown() {
        SHUTDOWN.store(true, Ordering::SeqCst);
    }

    /// Listen, accept, and serve until a termination request, then drain
    /// and snapshot. Consumes the calling thread.
    pub fn run(&self) -> Result<(), SupervisorError> {
        install_signal_handlers()?;
        SHUTDOWN.store(false, Ordering::SeqCst);
        // A stale socket from a previous run would fail the bind.
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = UnixListener::bind(&self.socket_path).map_err(SupervisorError::Bind)?;
        info!("flatfsd listening on {}", self.socket_path.display());
        let started = Instant::now();

        loop {
            if SHUTDOWN.load(Ordering::SeqCst) {
                break;
            }
            // A signal landing after this check parks the loop in
            // accept() until one more connection arrives; a receive
            // timeout or self-pipe wake-up would close the window.
            match listener.accept() {
                Ok((stream, _addr)) => self.launch_worker(stream)?,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SupervisorError::Accept(e)),
            }
        }
        self.drain(started)
    }

    fn launch_worker(&self, stream: UnixStream) -> Result<(), SupervisorError> {
        let uid = peer_uid(&stream).map_err(SupervisorError::PeerCred)?;
        let id = self.gate.admit();
        let ctx = Arc::clone(&self.ctx);
        let gate = Arc::clone(&self.gate);
        thread::Builder::new()
            .name(format!("flatfs-client-{id}"))
            .spawn(move || worker_loop(ctx, gate, stream, uid, id))
            .map_err(SupervisorError::Spawn)?;
        Ok(())
    }

    fn drain(&self, started: Instant) -> Result<(), SupervisorError> {
        info!("termination requested; draining active clients");
        let _ = std::fs::remove_file(&self.socket_path);
        self.gate.wait_idle();

        let mut out = File::create(&self.snapshot_path).map_err(SupervisorError::Snapshot)?;
        self.ctx
            .namespace
            .snapshot(&mut out)
            .map_err(SupervisorError::Snapshot)?;
        info!(
            "flatfsd served {} clients, completed in {:.4} seconds",
            self.gate.accepted(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// Serve one connection until the unmount sentinel or transport failure.
fn worker_loop(
    ctx: Arc<ServerContext>,
    gate: Arc<ClientGate>,
    mut stream: UnixStream,
    uid: Uid,
    id: u64,
) {
    debug!("client {id} connected (uid {uid})");
    let mut engine = Engine::new(ctx, uid);
    let mut buf = [0u8; MAX_LINE];
    loop {
        // One read per request; the protocol carries no framing, so a
        // single receive is assumed to hold one whole line.
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("client {id}: receive failed: {e}");
                break;
            }
        };
        match engine.handle_line(&buf[..n]) {
            Ok(Outcome::Reply(bytes)) => {
                if let Err(e) = stream.write_all(&bytes) {
                    warn!("client {id}: send failed: {e}");
                    break;
                }
            }
            Ok(Outcome::Close) => break,
            Ok(Outcome::Drop) => break,
            Err(e) => {
                // Poisoned namespace state; no safe way to continue.
                error!("client {id}: fatal namespace failure: {e}");
                std::process::exit(1);
            }
        }
    }
    engine.reset();
    drop(stream);
    gate.depart();
    debug!("client {id} finished");
}

/// Query the connecting peer's uid via `SO_PEERCRED`.
fn peer_uid(stream: &UnixStream) -> std::io::Result<Uid> {
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut cred as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(cred.uid)
}

extern "C" fn on_terminate(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install `SIGINT`/`SIGTERM` handlers without `SA_RESTART`, so a blocked
/// accept returns `Interrupted` and the loop observes the flag.
fn install_signal_handlers() -> Result<(), SupervisorError> {
    unsafe {
        let handler: extern "C" fn(libc::c_int) = on_terminate;
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                return Err(SupervisorError::Signal(std::io::Error::last_os_error()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_tracks_admissions_and_departures() {
        let gate = Arc::new(ClientGate::new());
        assert_eq!(gate.admit(), 1);
        assert_eq!(gate.admit(), 2);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            handles.push(thread::spawn(move || gate.depart()));
        }
        for handle in handles {
            handle.join().expect("thread failed");
        }
        gate.wait_idle();
        assert_eq!(gate.accepted(), 2);
    }

    #[test]
    fn wait_idle_blocks_until_last_departure() {
        let gate = Arc::new(ClientGate::new());
        gate.admit();
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_idle())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        gate.depart();
        waiter.join().expect("waiter failed");
    }
}
