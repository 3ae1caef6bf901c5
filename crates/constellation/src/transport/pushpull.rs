// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Push and pull sockets for the CDTP data plane.
//!
//! A transmitting satellite binds a push socket; receivers connect pull
//! sockets to it. Sends distribute round-robin over the connected peers
//! (in practice a data run has exactly one receiver) and block up to the
//! caller's deadline: critical units (BOR, EOR) must reach the kernel
//! buffer before the call returns, so an unflushed queue counts as not
//! sent.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::transport::frame::Multipart;
use crate::transport::stream::NetStream;
use crate::transport::NetworkError;

const LISTENER_TOKEN: Token = Token(0);
const CONNECTION_TOKEN_START: usize = 1;
const MAX_EVENTS: usize = 64;

/// Data producer socket.
pub struct PushSocket {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    port: u16,
    conns: HashMap<Token, NetStream>,
    next_token: usize,
    round_robin: usize,
}

impl PushSocket {
    /// Bind to an ephemeral port on the wildcard address.
    pub fn bind() -> std::io::Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let mut listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok(PushSocket {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            listener,
            port,
            conns: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            round_robin: 0,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of connected pull peers.
    pub fn peer_count(&self) -> usize {
        self.conns.len()
    }

    /// Send one unit, waiting up to `timeout` for a peer to take it.
    ///
    /// Returns `Ok(false)` when no connected peer accepted and flushed the
    /// unit within the deadline. `Duration::ZERO` makes this a try-send.
    pub fn send(&mut self, frames: &[Vec<u8>], timeout: Duration) -> Result<bool, NetworkError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump(Duration::ZERO)?;

            if let Some(token) = self.pick_peer() {
                if self.conns.get_mut(&token).map(|c| c.queue_unit(frames).is_ok()).unwrap_or(false)
                {
                    return self.flush_until(token, deadline);
                }
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
            // Wait for a peer to connect or drain
            let wait = (deadline - Instant::now()).min(Duration::from_millis(50));
            self.pump(wait)?;
        }
    }

    /// Accept connections, reap dead peers and flush pending writes.
    pub fn pump(&mut self, timeout: Duration) -> Result<(), NetworkError> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(NetworkError::Io(e)),
        }
        self.accept_pending()?;

        let mut dead = Vec::new();
        for (token, stream) in self.conns.iter_mut() {
            // Pull peers never send payload; a read is only good for EOF
            match stream.read_units() {
                Ok(units) if units.is_empty() => {}
                Ok(_) => log::debug!("[push] Ignoring unexpected data from pull peer"),
                Err(NetworkError::Closed) => {
                    dead.push(*token);
                    continue;
                }
                Err(e) => {
                    log::debug!("[push] Dropping peer: {e}");
                    dead.push(*token);
                    continue;
                }
            }
            if stream.want_write() {
                if let Err(e) = stream.flush() {
                    log::debug!("[push] Flush failed, dropping peer: {e}");
                    dead.push(*token);
                }
            }
        }
        for token in dead {
            self.drop_connection(token);
        }
        Ok(())
    }

    /// Next peer with a drained queue, round-robin.
    fn pick_peer(&mut self) -> Option<Token> {
        let mut tokens: Vec<Token> = self.conns.keys().copied().collect();
        if tokens.is_empty() {
            return None;
        }
        tokens.sort_by_key(|t| t.0);
        self.round_robin = self.round_robin.wrapping_add(1);
        let start = self.round_robin % tokens.len();
        tokens
            .into_iter()
            .cycle()
            .skip(start)
            .take(self.conns.len())
            .find(|token| self.conns.get(token).map(|c| !c.want_write()).unwrap_or(false))
    }

    fn flush_until(&mut self, token: Token, deadline: Instant) -> Result<bool, NetworkError> {
        loop {
            let Some(conn) = self.conns.get_mut(&token) else {
                return Ok(false);
            };
            match conn.flush() {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    let wait = (deadline - Instant::now()).min(Duration::from_millis(10));
                    match self.poll.poll(&mut self.events, Some(wait)) {
                        Ok(()) | Err(_) => {}
                    }
                }
                Err(e) => {
                    log::debug!("[push] Peer failed during flush: {e}");
                    self.drop_connection(token);
                    return Ok(false);
                }
            }
        }
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
                        log::warn!("[push] Failed to register peer from {addr}: {e}");
                        continue;
                    }
                    log::debug!("[push] Pull peer connected from {addr}");
                    self.conns.insert(token, net);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::Io(e)),
            }
        }
    }

    fn drop_connection(&mut self, token: Token) {
        if let Some(mut stream) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(stream.source());
        }
    }
}

/// Data consumer socket, driven by a pool's poll loop.
pub struct PullSocket {
    stream: NetStream,
}

impl PullSocket {
    /// Start a non-blocking connect to a transmitter's push socket.
    pub fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(PullSocket { stream: NetStream::new(stream) })
    }

    /// The underlying mio stream, for poll registration.
    pub fn source(&mut self) -> &mut TcpStream {
        self.stream.source()
    }

    /// Read everything available, returning the decoded units.
    pub fn drain(&mut self) -> Result<Vec<Multipart>, NetworkError> {
        self.stream.read_units()
    }

    /// Nothing queued on the pull side; present for pool symmetry.
    pub fn flush(&mut self) -> Result<(), NetworkError> {
        let _ = self.stream.flush()?;
        Ok(())
    }
}
