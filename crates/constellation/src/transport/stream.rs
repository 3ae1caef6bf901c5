// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking buffered stream shared by all socket patterns.
//!
//! [`NetStream`] wraps a `mio` TCP stream with the frame decoder on the
//! read side and a bounded unit queue on the write side. All operations are
//! non-blocking; callers drive progress from a poll loop and treat
//! [`NetworkError::Closed`] as the signal to drop the connection.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};

use mio::net::TcpStream;

use crate::transport::frame::{encode_unit, FrameDecoder, Multipart};
use crate::transport::NetworkError;

/// Upper bound of queued outgoing units before the peer counts as stalled.
pub const SEND_QUEUE_LIMIT: usize = 1000;

/// A framed, non-blocking TCP stream.
#[derive(Debug)]
pub struct NetStream {
    stream: TcpStream,
    decoder: FrameDecoder,
    /// Outgoing wire bytes; front entry may be partially written.
    send_queue: VecDeque<Vec<u8>>,
    /// Write offset into the front queue entry.
    send_offset: usize,
}

impl NetStream {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        NetStream { stream, decoder: FrameDecoder::new(), send_queue: VecDeque::new(), send_offset: 0 }
    }

    /// The underlying mio stream, for poll registration.
    pub fn source(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Read everything currently available and return the decoded units.
    ///
    /// Returns [`NetworkError::Closed`] on EOF; a decode failure also closes
    /// the connection since the stream position is lost.
    pub fn read_units(&mut self) -> Result<Vec<Multipart>, NetworkError> {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(NetworkError::Closed),
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // A connect still in progress reports NotConnected on Linux
                Err(e) if e.kind() == ErrorKind::NotConnected => break,
                Err(e) => return Err(NetworkError::Io(e)),
            }
        }
        let mut units = Vec::new();
        while let Some(unit) = self.decoder.next_unit()? {
            units.push(unit);
        }
        Ok(units)
    }

    /// Queue a unit for sending. Fails when the peer has stalled past the
    /// queue limit.
    pub fn queue_unit(&mut self, frames: &[Vec<u8>]) -> Result<(), NetworkError> {
        if self.send_queue.len() >= SEND_QUEUE_LIMIT {
            return Err(NetworkError::TooLarge {
                size: self.send_queue.len(),
                max: SEND_QUEUE_LIMIT,
            });
        }
        self.send_queue.push_back(encode_unit(frames));
        Ok(())
    }

    /// Queue a unit, silently dropping it when the peer has stalled.
    ///
    /// Publish paths use this: a slow subscriber loses messages instead of
    /// blocking the publisher.
    pub fn queue_unit_lossy(&mut self, frames: &[Vec<u8>]) -> bool {
        if self.send_queue.len() >= SEND_QUEUE_LIMIT {
            return false;
        }
        self.send_queue.push_back(encode_unit(frames));
        true
    }

    /// Write queued bytes until the kernel would block or the queue drains.
    ///
    /// Returns `true` when the queue is empty afterwards.
    pub fn flush(&mut self) -> Result<bool, NetworkError> {
        while let Some(front) = self.send_queue.front() {
            match self.stream.write(&front[self.send_offset..]) {
                Ok(0) => return Err(NetworkError::Closed),
                Ok(n) => {
                    self.send_offset += n;
                    if self.send_offset >= front.len() {
                        self.send_queue.pop_front();
                        self.send_offset = 0;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // A connect still in progress reports NotConnected on Linux
                Err(e) if e.kind() == ErrorKind::NotConnected => return Ok(false),
                Err(e) => return Err(NetworkError::Io(e)),
            }
        }
        Ok(true)
    }

    /// True when queued bytes are waiting for the socket to become writable.
    pub fn want_write(&self) -> bool {
        !self.send_queue.is_empty()
    }
}
