// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher and subscriber sockets with topic prefix filtering.
//!
//! Filtering happens at the publisher, the way a proper pub/sub transport
//! does it: a subscriber sends single-frame control units (`0x01 topic` to
//! subscribe, `0x00 topic` to unsubscribe) and the publisher keeps one
//! prefix set per connection, dropping published units whose first frame
//! fails every prefix test. A subscriber with no subscriptions receives
//! nothing.
//!
//! Slow subscribers lose messages instead of blocking the publisher: once a
//! connection's send queue is full, published units are dropped for that
//! connection only.

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::transport::frame::Multipart;
use crate::transport::stream::NetStream;
use crate::transport::NetworkError;

const LISTENER_TOKEN: Token = Token(0);
const CONNECTION_TOKEN_START: usize = 1;
const MAX_EVENTS: usize = 64;

/// Subscribe control byte.
const CTRL_SUBSCRIBE: u8 = 0x01;
/// Unsubscribe control byte.
const CTRL_UNSUBSCRIBE: u8 = 0x00;

/// A subscription change observed by the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub subscribe: bool,
    pub topic: Vec<u8>,
}

struct PubConnection {
    stream: NetStream,
    prefixes: BTreeSet<Vec<u8>>,
}

/// Publishing socket with per-connection prefix filters.
pub struct PubSocket {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    port: u16,
    conns: HashMap<Token, PubConnection>,
    next_token: usize,
    sub_events: Vec<SubscriptionEvent>,
}

impl PubSocket {
    /// Bind to an ephemeral port on the wildcard address.
    pub fn bind() -> std::io::Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let mut listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok(PubSocket {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            listener,
            port,
            conns: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            sub_events: Vec::new(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.conns.len()
    }

    /// Accept connections, ingest control frames and flush pending writes.
    ///
    /// The owning thread calls this on its wake interval so subscriptions
    /// take effect within one tick even when nothing is being published.
    pub fn pump(&mut self, timeout: Duration) -> Result<(), NetworkError> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(NetworkError::Io(e)),
        }
        self.accept_pending()?;
        self.service_connections();
        Ok(())
    }

    /// Publish one unit to every connection whose prefix set matches the
    /// first frame.
    pub fn publish(&mut self, frames: &[Vec<u8>]) -> Result<(), NetworkError> {
        self.pump(Duration::ZERO)?;
        let topic: &[u8] = frames.first().map(Vec::as_slice).unwrap_or(&[]);
        let mut dead = Vec::new();
        for (token, conn) in self.conns.iter_mut() {
            if !conn.prefixes.iter().any(|prefix| topic.starts_with(prefix)) {
                continue;
            }
            if !conn.stream.queue_unit_lossy(frames) {
                log::debug!("[pub] Subscriber stalled, dropping message");
                continue;
            }
            if let Err(e) = conn.stream.flush() {
                log::debug!("[pub] Dropping subscriber: {e}");
                dead.push(*token);
            }
        }
        for token in dead {
            self.drop_connection(token);
        }
        Ok(())
    }

    /// Drain the subscription changes observed since the last call.
    pub fn take_subscription_events(&mut self) -> Vec<SubscriptionEvent> {
        std::mem::take(&mut self.sub_events)
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
                        log::warn!("[pub] Failed to register subscriber from {addr}: {e}");
                        continue;
                    }
                    log::trace!("[pub] Subscriber connected from {addr}");
                    self.conns
                        .insert(token, PubConnection { stream: net, prefixes: BTreeSet::new() });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::Io(e)),
            }
        }
    }

    fn service_connections(&mut self) {
        let mut dead = Vec::new();
        for (token, conn) in self.conns.iter_mut() {
            match conn.stream.read_units() {
                Ok(units) => {
                    for unit in units {
                        match parse_control(&unit) {
                            Some((true, topic)) => {
                                if conn.prefixes.insert(topic.clone()) {
                                    self.sub_events
                                        .push(SubscriptionEvent { subscribe: true, topic });
                                }
                            }
                            Some((false, topic)) => {
                                if conn.prefixes.remove(&topic) {
                                    self.sub_events
                                        .push(SubscriptionEvent { subscribe: false, topic });
                                }
                            }
                            None => {
                                log::debug!("[pub] Ignoring malformed control frame");
                            }
                        }
                    }
                }
                Err(NetworkError::Closed) => {
                    dead.push(*token);
                    continue;
                }
                Err(e) => {
                    log::debug!("[pub] Dropping subscriber: {e}");
                    dead.push(*token);
                    continue;
                }
            }
            if conn.stream.want_write() {
                if let Err(e) = conn.stream.flush() {
                    log::debug!("[pub] Flush failed, dropping subscriber: {e}");
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
    }
}

fn parse_control(unit: &Multipart) -> Option<(bool, Vec<u8>)> {
    if unit.len() != 1 {
        return None;
    }
    let frame = &unit[0];
    let (&flag, topic) = frame.split_first()?;
    match flag {
        CTRL_SUBSCRIBE => Some((true, topic.to_vec())),
        CTRL_UNSUBSCRIBE => Some((false, topic.to_vec())),
        _ => None,
    }
}

/// Subscribing socket, driven by a pool's poll loop.
pub struct SubSocket {
    stream: NetStream,
}

impl SubSocket {
    /// Start a non-blocking connect to a publisher.
    pub fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(SubSocket { stream: NetStream::new(stream) })
    }

    /// The underlying mio stream, for poll registration.
    pub fn source(&mut self) -> &mut TcpStream {
        self.stream.source()
    }

    /// Queue a subscribe control frame for `topic`.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), NetworkError> {
        self.send_control(CTRL_SUBSCRIBE, topic)
    }

    /// Queue an unsubscribe control frame for `topic`.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), NetworkError> {
        self.send_control(CTRL_UNSUBSCRIBE, topic)
    }

    fn send_control(&mut self, flag: u8, topic: &str) -> Result<(), NetworkError> {
        let mut frame = Vec::with_capacity(1 + topic.len());
        frame.push(flag);
        frame.extend_from_slice(topic.as_bytes());
        self.stream.queue_unit(&[frame])?;
        // Best effort; the poll loop finishes the job on the next writable
        let _ = self.stream.flush()?;
        Ok(())
    }

    /// Read everything available, returning the decoded units.
    pub fn drain(&mut self) -> Result<Vec<Multipart>, NetworkError> {
        if self.stream.want_write() {
            let _ = self.stream.flush()?;
        }
        self.stream.read_units()
    }

    /// Flush pending control frames (called on writable events).
    pub fn flush(&mut self) -> Result<(), NetworkError> {
        let _ = self.stream.flush()?;
        Ok(())
    }
}
