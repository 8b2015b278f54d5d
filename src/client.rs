// CLASSIFICATION: COMMUNITY
// Filename: client.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-26

//! Blocking wire client for the flatfs line protocol.
//!
//! One send and one receive per call, mirroring the daemon's frameless
//! transport. Used by the integration tests and by external tooling.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use thiserror::Error;

use crate::perm::Perm;
use crate::proto::MAX_LINE;

/// Errors reported by the wire client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The socket could not be used.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The server answered with a negative status code.
    #[error("server reported status {0}")]
    Status(i32),
    /// The response was not decodable.
    #[error("malformed server response")]
    Malformed,
}

impl ClientError {
    fn transport(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// A mounted connection to a flatfs daemon.
pub struct FlatClient {
    stream: UnixStream,
}

impl FlatClient {
    /// Connect to the daemon's socket.
    pub fn mount(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).map_err(ClientError::transport)?;
        Ok(Self { stream })
    }

    /// Send the unmount sentinel and close the connection.
    pub fn unmount(mut self) -> Result<(), ClientError> {
        self.stream
            .write_all(b"f")
            .map_err(ClientError::transport)
    }

    /// Create `name` with the given owner and other permissions.
    pub fn create(&mut self, name: &str, owner: Perm, other: Perm) -> Result<(), ClientError> {
        let cmd = format!("c {name} {}{}", owner.as_digit(), other.as_digit());
        self.expect_ok(&cmd)
    }

    /// Delete `name`; the caller must own it.
    pub fn delete(&mut self, name: &str) -> Result<(), ClientError> {
        self.expect_ok(&format!("d {name}"))
    }

    /// Move the binding of `old` to `new`.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), ClientError> {
        self.expect_ok(&format!("r {old} {new}"))
    }

    /// Open `name` and return the descriptor number.
    pub fn open(&mut self, name: &str, mode: Perm) -> Result<usize, ClientError> {
        let code = self.status(&format!("o {name} {}", mode.as_digit()))?;
        if code < 0 {
            return Err(ClientError::Status(code));
        }
        Ok(code as usize)
    }

    /// Close a descriptor.
    pub fn close_fd(&mut self, fd: usize) -> Result<(), ClientError> {
        self.expect_ok(&format!("x {fd}"))
    }

    /// Read up to `len` bytes through a descriptor.
    ///
    /// A response that parses as a negative integer is taken as a
    /// status code; content that happens to look like one is
    /// indistinguishable on this wire.
    pub fn read(&mut self, fd: usize, len: usize) -> Result<Vec<u8>, ClientError> {
        let raw = self.roundtrip(&format!("l {fd} {len}"))?;
        if let Ok(text) = std::str::from_utf8(&raw) {
            if let Ok(code) = text.trim().parse::<i32>() {
                if code < 0 {
                    return Err(ClientError::Status(code));
                }
            }
        }
        Ok(raw)
    }

    /// Write a payload through a descriptor.
    pub fn write(&mut self, fd: usize, data: &str) -> Result<(), ClientError> {
        self.expect_ok(&format!("w {fd} {data}"))
    }

    fn roundtrip(&mut self, cmd: &str) -> Result<Vec<u8>, ClientError> {
        self.stream
            .write_all(cmd.as_bytes())
            .map_err(ClientError::transport)?;
        let mut buf = [0u8; MAX_LINE];
        let n = self.stream.read(&mut buf).map_err(ClientError::transport)?;
        Ok(buf[..n].to_vec())
    }

    fn status(&mut self, cmd: &str) -> Result<i32, ClientError> {
        let raw = self.roundtrip(cmd)?;
        let text = std::str::from_utf8(&raw).map_err(|_| ClientError::Malformed)?;
        text.trim().parse().map_err(|_| ClientError::Malformed)
    }

    fn expect_ok(&mut self, cmd: &str) -> Result<(), ClientError> {
        match self.status(cmd)? {
            0 => Ok(()),
            code => Err(ClientError::Status(code)),
        }
    }
}
