// CLASSIFICATION: COMMUNITY
// Filename: wire_protocol.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-26

//! End-to-end tests over a real unix socket: one supervisor thread, real
//! client connections, graceful shutdown with snapshot verification.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flatfs::{
    ClientError, FlatClient, LockPolicy, Perm, ServerContext, Supervisor, SupervisorError,
};
use serial_test::serial;
use tempfile::TempDir;

struct TestServer {
    _dir: TempDir,
    socket: PathBuf,
    snapshot: PathBuf,
    handle: JoinHandle<Result<(), SupervisorError>>,
}

fn start_server(partitions: usize) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("flatfs.sock");
    let snapshot = dir.path().join("snapshot.txt");
    let ctx = Arc::new(ServerContext::new(partitions, LockPolicy::RwLock));
    let supervisor = Supervisor::new(ctx, socket.clone(), snapshot.clone());
    let handle = thread::spawn(move || supervisor.run());
    for _ in 0..200 {
        if socket.exists() {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(socket.exists(), "server did not come up");
    TestServer {
        _dir: dir,
        socket,
        snapshot,
        handle,
    }
}

impl TestServer {
    fn client(&self) -> FlatClient {
        FlatClient::mount(&self.socket).expect("mount")
    }

    /// Trigger graceful shutdown and wait for the snapshot to land.
    fn stop(self) -> String {
        Supervisor::request_shutdown();
        // Poke the blocked accept; the throwaway connection closes
        // immediately and drains with everyone else.
        let _ = UnixStream::connect(&self.socket);
        self.handle
            .join()
            .expect("server thread panicked")
            .expect("server exited abnormally");
        std::fs::read_to_string(&self.snapshot).expect("snapshot file")
    }
}

#[test]
#[serial]
fn full_scenario_over_the_wire() {
    let server = start_server(4);
    let mut client = server.client();

    client
        .create("foo", Perm::READ | Perm::WRITE, Perm::READ)
        .expect("create foo");
    assert_eq!(
        client.create("foo", Perm::READ, Perm::READ),
        Err(ClientError::Status(-4))
    );

    let fd = client.open("foo", Perm::READ | Perm::WRITE).expect("open");
    assert_eq!(fd, 0);
    client.write(fd, "hello").expect("write");
    assert_eq!(client.read(fd, 6).expect("read"), b"hello");
    client.close_fd(fd).expect("close");

    client.rename("foo", "bar").expect("rename");
    assert_eq!(client.open("foo", Perm::READ), Err(ClientError::Status(-5)));
    let fd = client.open("bar", Perm::READ).expect("open renamed");
    assert_eq!(client.read(fd, 6).expect("read"), b"hello");
    client.close_fd(fd).expect("close");

    client.delete("bar").expect("delete");
    assert_eq!(client.open("bar", Perm::READ), Err(ClientError::Status(-5)));

    client.create("keep", Perm::READ, Perm::READ).expect("create keep");
    client.unmount().expect("unmount");

    let snapshot = server.stop();
    let lines: Vec<&str> = snapshot.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("keep "), "snapshot was {snapshot:?}");
}

#[test]
#[serial]
fn descriptor_table_fills_at_five() {
    let server = start_server(2);
    let mut client = server.client();

    for i in 0..6 {
        client
            .create(&format!("file{i}"), Perm::READ, Perm::READ)
            .expect("create");
    }
    for i in 0..5 {
        let fd = client.open(&format!("file{i}"), Perm::READ).expect("open");
        assert_eq!(fd, i);
    }
    assert_eq!(
        client.open("file5", Perm::READ),
        Err(ClientError::Status(-7))
    );
    assert_eq!(
        client.open("file0", Perm::READ),
        Err(ClientError::Status(-9))
    );
    client.close_fd(3).expect("close");
    assert_eq!(client.open("file5", Perm::READ).expect("reopen"), 3);

    client.unmount().expect("unmount");
    server.stop();
}

#[test]
#[serial]
fn concurrent_clients_share_one_namespace() {
    let server = start_server(8);

    let socket = server.socket.clone();
    let mut writers = Vec::new();
    for worker in 0..4 {
        let socket = socket.clone();
        writers.push(thread::spawn(move || {
            let mut client = FlatClient::mount(&socket).expect("mount");
            for i in 0..10 {
                client
                    .create(&format!("w{worker}_f{i}"), Perm::READ, Perm::READ)
                    .expect("create");
            }
            client.unmount().expect("unmount");
        }));
    }
    for writer in writers {
        writer.join().expect("writer failed");
    }

    let mut client = server.client();
    for worker in 0..4 {
        for i in 0..10 {
            client
                .open(&format!("w{worker}_f{i}"), Perm::READ)
                .expect("open");
            client.close_fd(0).expect("close");
        }
    }
    client.unmount().expect("unmount");

    let snapshot = server.stop();
    assert_eq!(snapshot.lines().count(), 40);
}

fn raw_roundtrip(stream: &mut UnixStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).expect("send");
    let mut buf = [0u8; 100];
    let n = stream.read(&mut buf).expect("recv");
    buf[..n].to_vec()
}

#[test]
#[serial]
fn write_payload_bytes_survive_the_wire() {
    let server = start_server(2);
    let mut stream = UnixStream::connect(&server.socket).expect("connect");

    assert_eq!(raw_roundtrip(&mut stream, b"c blob 33"), b"0");
    assert_eq!(raw_roundtrip(&mut stream, b"o blob 3"), b"0");

    // The payload is not valid UTF-8 and must come back byte-exact.
    let mut request = b"w 0 ".to_vec();
    request.extend_from_slice(&[0xf0, 0x28, 0x8c, 0x28]);
    assert_eq!(raw_roundtrip(&mut stream, &request), b"0");
    assert_eq!(
        raw_roundtrip(&mut stream, b"l 0 8"),
        [0xf0, 0x28, 0x8c, 0x28]
    );

    stream.write_all(b"f").expect("unmount");
    drop(stream);
    server.stop();
}

#[test]
#[serial]
fn dropped_connection_releases_its_session() {
    let server = start_server(2);

    let mut first = server.client();
    first.create("shared", Perm::READ, Perm::READ).expect("create");
    first.open("shared", Perm::READ).expect("open");
    // Drop without unmounting; the worker sees EOF and departs.
    drop(first);

    let mut second = server.client();
    let fd = second.open("shared", Perm::READ).expect("open after drop");
    assert_eq!(fd, 0);
    second.unmount().expect("unmount");
    server.stop();
}
