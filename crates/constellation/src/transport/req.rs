// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request socket: the blocking client end of the CSCP pattern.
//!
//! Controllers and tools are request-driven, so a plain blocking stream
//! with a read deadline is the simplest correct shape here. One request is
//! in flight at a time by construction.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::transport::frame::{encode_unit, FrameDecoder, Multipart};
use crate::transport::NetworkError;

/// Blocking client socket for request/reply exchanges.
pub struct ReqSocket {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl ReqSocket {
    /// Connect to a satellite's reply socket.
    pub fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(ReqSocket { stream, decoder: FrameDecoder::new() })
    }

    /// Send one request and wait up to `timeout` for the reply.
    pub fn request(
        &mut self,
        frames: &[Vec<u8>],
        timeout: Duration,
    ) -> Result<Multipart, NetworkError> {
        self.stream.write_all(&encode_unit(frames))?;

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            if let Some(unit) = self.decoder.next_unit()? {
                return Ok(unit);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(NetworkError::Timeout);
            }
            self.stream.set_read_timeout(Some(deadline - now))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(NetworkError::Closed),
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    return Err(NetworkError::Timeout)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::Io(e)),
            }
        }
    }
}
