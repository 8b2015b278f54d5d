// CLASSIFICATION: COMMUNITY
// Filename: proto.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-26

//! Wire protocol: request parsing and per-session dispatch.
//!
//! A request is one line: a one-character command tag and up to two
//! whitespace-delimited arguments (the write payload is everything after
//! the descriptor and may contain spaces or arbitrary non-UTF-8 bytes).
//! Every request yields exactly
//! one response line: a short status code, the descriptor number for
//! opens, or the raw bytes for reads. There is no length or delimiter
//! framing on the wire; one transport read is assumed to carry one
//! logical request.

use std::sync::Arc;

use log::warn;
use thiserror::Error;

use crate::namespace::{IndexError, RenameError};
use crate::perm::Perm;
use crate::server::ServerContext;
use crate::session::{Session, SessionError};

/// Maximum accepted request line, matching the fixed client buffer.
pub const MAX_LINE: usize = 100;

/// Parse failures. All of them end the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The line held no tokens.
    #[error("empty request")]
    Empty,
    /// The command tag is not recognized.
    #[error("unknown command tag {0:?}")]
    UnknownTag(char),
    /// The token count does not match the command's arity.
    #[error("wrong argument count for command {0:?}")]
    Arity(char),
    /// An argument failed to parse.
    #[error("malformed argument {0:?}")]
    BadArgument(String),
}

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `c name perm-pair`
    Create {
        /// Name to bind.
        name: String,
        /// Permission applied to the owner.
        owner_perm: Perm,
        /// Permission applied to everyone else.
        other_perm: Perm,
    },
    /// `d name`
    Delete {
        /// Name to unbind; the caller must own the record.
        name: String,
    },
    /// `r old new`
    Rename {
        /// Currently bound name.
        old: String,
        /// Name to move the binding to.
        new: String,
    },
    /// `o name mode`
    Open {
        /// Name to resolve.
        name: String,
        /// Requested access mode.
        mode: Perm,
    },
    /// `x fd`
    Close {
        /// Descriptor to free.
        fd: usize,
    },
    /// `l fd len`
    Read {
        /// Descriptor to read through.
        fd: usize,
        /// Maximum bytes to return.
        len: usize,
    },
    /// `w fd bytes`
    Write {
        /// Descriptor to write through.
        fd: usize,
        /// Payload, verbatim from the line.
        data: Vec<u8>,
    },
    /// `f` — unmount sentinel, ends the session.
    Unmount,
}

impl Request {
    /// Parse one request line, given as the raw bytes off the wire.
    ///
    /// Tags and arguments must be UTF-8; the write payload is kept as
    /// raw bytes so content never passes through lossy decoding.
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        let line = trim_line(line);
        let (tag_token, rest) = split_first_space(line);
        if tag_token.is_empty() {
            return Err(ParseError::Empty);
        }
        if tag_token.len() > 1 {
            return Err(ParseError::UnknownTag(tag_token[0] as char));
        }
        let tag = tag_token[0] as char;
        if tag == 'w' {
            // The payload is everything after the descriptor, spaces
            // and arbitrary bytes included, exactly as the line
            // carries them.
            let (fd_token, payload) = split_first_space(rest.unwrap_or(b""));
            if fd_token.is_empty() {
                return Err(ParseError::Arity('w'));
            }
            let data = payload.ok_or(ParseError::Arity('w'))?;
            return Ok(Request::Write {
                fd: parse_number(text(fd_token)?)?,
                data: data.to_vec(),
            });
        }
        let rest = text(rest.unwrap_or(b""))?;

        match tag {
            'f' => {
                if !rest.trim().is_empty() {
                    return Err(ParseError::Arity('f'));
                }
                Ok(Request::Unmount)
            }
            'c' => {
                let [name, pair] = fixed_args::<2>('c', rest)?;
                let (owner_perm, other_perm) = parse_perm_pair(pair)?;
                Ok(Request::Create {
                    name: name.to_string(),
                    owner_perm,
                    other_perm,
                })
            }
            'd' => {
                let [name] = fixed_args::<1>('d', rest)?;
                Ok(Request::Delete {
                    name: name.to_string(),
                })
            }
            'r' => {
                let [old, new] = fixed_args::<2>('r', rest)?;
                Ok(Request::Rename {
                    old: old.to_string(),
                    new: new.to_string(),
                })
            }
            'o' => {
                let [name, mode] = fixed_args::<2>('o', rest)?;
                Ok(Request::Open {
                    name: name.to_string(),
                    mode: parse_mode(mode)?,
                })
            }
            'x' => {
                let [fd] = fixed_args::<1>('x', rest)?;
                Ok(Request::Close {
                    fd: parse_number(fd)?,
                })
            }
            'l' => {
                let [fd, len] = fixed_args::<2>('l', rest)?;
                Ok(Request::Read {
                    fd: parse_number(fd)?,
                    len: parse_number(len)?,
                })
            }
            other => Err(ParseError::UnknownTag(other)),
        }
    }
}

/// Strip trailing terminator bytes a client buffer may carry.
fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], 0 | b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Split at the first space; `None` on the right means no space at all.
fn split_first_space(bytes: &[u8]) -> (&[u8], Option<&[u8]>) {
    match bytes.iter().position(|b| *b == b' ') {
        Some(i) => (&bytes[..i], Some(&bytes[i + 1..])),
        None => (bytes, None),
    }
}

fn text(token: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(token)
        .map_err(|_| ParseError::BadArgument(String::from_utf8_lossy(token).into_owned()))
}

fn fixed_args<const N: usize>(tag: char, rest: &str) -> Result<[&str; N], ParseError> {
    let mut out = [""; N];
    let mut tokens = rest.split_whitespace();
    for slot in &mut out {
        *slot = tokens.next().ok_or(ParseError::Arity(tag))?;
    }
    if tokens.next().is_some() {
        return Err(ParseError::Arity(tag));
    }
    Ok(out)
}

fn parse_number(token: &str) -> Result<usize, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::BadArgument(token.to_string()))
}

fn parse_mode(token: &str) -> Result<Perm, ParseError> {
    let mut chars = token.chars();
    let digit = chars.next().ok_or_else(|| ParseError::BadArgument(token.to_string()))?;
    if chars.next().is_some() {
        return Err(ParseError::BadArgument(token.to_string()));
    }
    Perm::from_digit(digit).ok_or_else(|| ParseError::BadArgument(token.to_string()))
}

fn parse_perm_pair(token: &str) -> Result<(Perm, Perm), ParseError> {
    let mut chars = token.chars();
    let bad = || ParseError::BadArgument(token.to_string());
    let owner = chars.next().and_then(Perm::from_digit).ok_or_else(bad)?;
    let other = chars.next().and_then(Perm::from_digit).ok_or_else(bad)?;
    if chars.next().is_some() {
        return Err(bad());
    }
    Ok((owner, other))
}

/// Result of dispatching one request line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// One response line to send back.
    Reply(Vec<u8>),
    /// Unmount sentinel: close the connection cleanly.
    Close,
    /// Protocol violation: drop the connection without a response.
    Drop,
}

fn status(code: i32) -> Outcome {
    Outcome::Reply(code.to_string().into_bytes())
}

const OK: i32 = 0;
const ERR_EXISTS: i32 = -4;
const ERR_NOT_FOUND: i32 = -5;
const ERR_DENIED: i32 = -6;
const ERR_STORE: i32 = -11;

fn session_code(err: &SessionError) -> i32 {
    match err {
        SessionError::NotFound => -5,
        SessionError::Denied => -6,
        SessionError::TableFull => -7,
        SessionError::BadDescriptor => -8,
        SessionError::AlreadyOpen => -9,
        SessionError::ReadDenied => -10,
        SessionError::Store | SessionError::Fatal(_) => -11,
    }
}

/// Per-connection dispatcher binding a session to the shared context.
pub struct Engine {
    ctx: Arc<ServerContext>,
    session: Session,
}

impl Engine {
    /// Build an engine for one connection.
    pub fn new(ctx: Arc<ServerContext>, uid: crate::store::Uid) -> Self {
        Self {
            session: Session::new(uid),
            ctx,
        }
    }

    /// Borrow the session, mainly for inspection in tests.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Release per-connection state at teardown.
    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Dispatch one raw request line into exactly one [`Outcome`].
    ///
    /// Namespace poisoning comes back as `Err` and is fatal to the
    /// process; everything else stays on the connection.
    pub fn handle_line(&mut self, line: &[u8]) -> Result<Outcome, IndexError> {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(err) => {
                warn!("protocol error, dropping connection: {err}");
                return Ok(Outcome::Drop);
            }
        };
        match request {
            Request::Create {
                name,
                owner_perm,
                other_perm,
            } => self.create(&name, owner_perm, other_perm),
            Request::Delete { name } => self.delete(&name),
            Request::Rename { old, new } => self.rename(&old, &new),
            Request::Open { name, mode } => {
                let namespace = &self.ctx.namespace;
                let store = &self.ctx.store;
                match self.session.open(namespace, store, &name, mode) {
                    Ok(slot) => Ok(Outcome::Reply(slot.to_string().into_bytes())),
                    Err(SessionError::Fatal(e)) => Err(e),
                    Err(err) => Ok(status(session_code(&err))),
                }
            }
            Request::Close { fd } => match self.session.close(fd) {
                Ok(()) => Ok(status(OK)),
                Err(err) => Ok(status(session_code(&err))),
            },
            Request::Read { fd, len } => match self.session.read(&self.ctx.store, fd, len) {
                Ok(bytes) => Ok(Outcome::Reply(bytes)),
                Err(err) => Ok(status(session_code(&err))),
            },
            Request::Write { fd, data } => {
                match self.session.write(&self.ctx.store, fd, &data) {
                    Ok(()) => Ok(status(OK)),
                    Err(err) => Ok(status(session_code(&err))),
                }
            }
            Request::Unmount => Ok(Outcome::Close),
        }
    }

    fn create(
        &mut self,
        name: &str,
        owner_perm: Perm,
        other_perm: Perm,
    ) -> Result<Outcome, IndexError> {
        // Advisory existence check; two racing creates of one name can
        // both pass it. The window is documented, not closed.
        if self.ctx.namespace.lookup(name)?.is_some() {
            return Ok(status(ERR_EXISTS));
        }
        let uid = self.session.uid();
        let Ok(inumber) = self.ctx.store.create(uid, owner_perm, other_perm) else {
            return Ok(status(ERR_STORE));
        };
        self.ctx.namespace.insert(name, inumber)?;
        Ok(status(OK))
    }

    fn delete(&mut self, name: &str) -> Result<Outcome, IndexError> {
        let Some(inumber) = self.ctx.namespace.lookup(name)? else {
            return Ok(status(ERR_NOT_FOUND));
        };
        let Ok(stat) = self.ctx.store.stat(inumber) else {
            return Ok(status(ERR_STORE));
        };
        if stat.owner != self.session.uid() {
            return Ok(status(ERR_DENIED));
        }
        if self.ctx.store.release(inumber).is_err() {
            return Ok(status(ERR_STORE));
        }
        self.ctx.namespace.remove(name)?;
        Ok(status(OK))
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<Outcome, IndexError> {
        // Wire quirk kept for compatibility: a missing rename source
        // reports -4 and an occupied target -5, the reverse of the
        // create/delete meanings of those codes.
        let Some(inumber) = self.ctx.namespace.lookup(old)? else {
            return Ok(status(ERR_EXISTS));
        };
        let Ok(stat) = self.ctx.store.stat(inumber) else {
            return Ok(status(ERR_STORE));
        };
        // Ownership is checked before the move so a denied rename leaves
        // the namespace untouched.
        if stat.owner != self.session.uid() {
            return Ok(status(ERR_DENIED));
        }
        match self.ctx.namespace.rename(old, new) {
            Ok(()) => Ok(status(OK)),
            Err(RenameError::SourceMissing) => Ok(status(ERR_EXISTS)),
            Err(RenameError::TargetExists) => Ok(status(ERR_NOT_FOUND)),
            Err(RenameError::Index(e)) => Err(e),
        }
    }
}
