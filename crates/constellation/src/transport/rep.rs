// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reply socket: the server end of the CSCP request/reply pattern.
//!
//! A satellite binds one reply socket on an ephemeral port and serves one
//! request at a time. Multiple controllers may stay connected; the socket
//! remembers which connection delivered the current request and routes the
//! reply there. `recv` has a bounded timeout so the owning loop stays
//! responsive to stop requests.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use crate::transport::frame::Multipart;
use crate::transport::stream::NetStream;
use crate::transport::NetworkError;

const LISTENER_TOKEN: Token = Token(0);
const CONNECTION_TOKEN_START: usize = 1;
const MAX_EVENTS: usize = 64;

/// How long a reply flush may take before the controller counts as gone.
const REPLY_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

struct Connection {
    stream: NetStream,
    inbox: VecDeque<Multipart>,
}

/// Server socket for request/reply exchanges.
pub struct RepSocket {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    port: u16,
    conns: HashMap<Token, Connection>,
    next_token: usize,
    /// Connection owed a reply for the request handed out by `recv`.
    reply_to: Option<Token>,
}

impl RepSocket {
    /// Bind to an ephemeral port on the wildcard address.
    pub fn bind() -> std::io::Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let mut listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok(RepSocket {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            listener,
            port,
            conns: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            reply_to: None,
        })
    }

    /// Port the socket is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait up to `timeout` for the next request.
    ///
    /// Returns `Ok(None)` on timeout. After a request is returned the caller
    /// must [`RepSocket::send`] exactly one reply before the next `recv`.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<Multipart>, NetworkError> {
        if let Some(unit) = self.pop_queued() {
            return Ok(Some(unit));
        }

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(None),
            Err(e) => return Err(NetworkError::Io(e)),
        }

        self.accept_pending()?;
        self.service_connections();

        Ok(self.pop_queued())
    }

    /// Send the reply for the request most recently returned by `recv`.
    pub fn send(&mut self, frames: &[Vec<u8>]) -> Result<(), NetworkError> {
        let token = self.reply_to.take().ok_or(NetworkError::NotConnected)?;
        let Some(conn) = self.conns.get_mut(&token) else {
            // Controller went away between request and reply
            return Err(NetworkError::Closed);
        };
        if let Err(e) = conn.stream.queue_unit(frames) {
            self.drop_connection(token);
            return Err(e);
        }

        // Flush synchronously; a controller that cannot take the reply
        // within the deadline is dropped.
        let deadline = Instant::now() + REPLY_FLUSH_TIMEOUT;
        loop {
            let Some(conn) = self.conns.get_mut(&token) else {
                return Err(NetworkError::Closed);
            };
            match conn.stream.flush() {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    if Instant::now() >= deadline {
                        self.drop_connection(token);
                        return Err(NetworkError::Timeout);
                    }
                    match self.poll.poll(&mut self.events, Some(Duration::from_millis(10))) {
                        Ok(()) | Err(_) => {}
                    }
                }
                Err(e) => {
                    self.drop_connection(token);
                    return Err(e);
                }
            }
        }
    }

    fn pop_queued(&mut self) -> Option<Multipart> {
        if self.reply_to.is_some() {
            // A request is already in flight; hold further ones back.
            return None;
        }
        // Deterministic order keeps one chatty controller from starving others.
        let mut tokens: Vec<Token> = self.conns.keys().copied().collect();
        tokens.sort_by_key(|t| t.0);
        for token in tokens {
            if let Some(conn) = self.conns.get_mut(&token) {
                if let Some(unit) = conn.inbox.pop_front() {
                    self.reply_to = Some(token);
                    return Some(unit);
                }
            }
        }
        None
    }

    fn accept_pending(&mut self) -> Result<(), NetworkError> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    let mut net = NetStream::new(stream);
                    if let Err(e) = self.poll.registry().register(
                        net.source(),
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        log::warn!("[rep] Failed to register connection from {addr}: {e}");
                        continue;
                    }
                    log::trace!("[rep] Accepted controller connection from {addr}");
                    self.conns.insert(token, Connection { stream: net, inbox: VecDeque::new() });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::Io(e)),
            }
        }
    }

    /// Read from and flush every connection, dropping the dead ones.
    fn service_connections(&mut self) {
        let mut dead = Vec::new();
        for (token, conn) in self.conns.iter_mut() {
            match conn.stream.read_units() {
                Ok(units) => conn.inbox.extend(units),
                Err(NetworkError::Closed) => {
                    dead.push(*token);
                    continue;
                }
                Err(e) => {
                    log::debug!("[rep] Dropping connection: {e}");
                    dead.push(*token);
                    continue;
                }
            }
            if conn.stream.want_write() {
                if let Err(e) = conn.stream.flush() {
                    log::debug!("[rep] Flush failed, dropping connection: {e}");
                    dead.push(*token);
                }
            }
        }
        for token in dead {
            self.drop_connection(token);
        }
    }

    fn drop_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(conn.stream.source());
        }
        if self.reply_to == Some(token) {
            self.reply_to = None;
        }
    }
}
