// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP broadcast sockets for CHIRP datagrams.
//!
//! The receive socket binds the well-known CHIRP port with address and
//! port reuse enabled so several processes on one host can join the same
//! group. Receives use a bounded timeout so the manager loop stays
//! responsive to stop requests.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::protocol::{CHIRP_MESSAGE_LENGTH, CHIRP_PORT};

/// Datagram received from the network, with its source address.
#[derive(Debug, Clone)]
pub struct RawDatagram {
    pub content: Vec<u8>,
    pub address: Ipv4Addr,
}

/// Sender for CHIRP broadcast datagrams.
#[derive(Debug)]
pub struct BroadcastSend {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl BroadcastSend {
    /// Create a send socket broadcasting to `brd_address` on the CHIRP port.
    pub fn new(brd_address: Ipv4Addr) -> io::Result<Self> {
        BroadcastSend::with_port(brd_address, CHIRP_PORT)
    }

    /// Create a send socket with an explicit target port (tests use this).
    pub fn with_port(brd_address: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        let socket: UdpSocket = socket.into();
        Ok(BroadcastSend { socket, target: SocketAddrV4::new(brd_address, port) })
    }

    /// Send one datagram to the broadcast target.
    pub fn send(&self, content: &[u8]) -> io::Result<()> {
        self.socket.send_to(content, self.target)?;
        Ok(())
    }
}

/// Receiver for CHIRP broadcast datagrams.
#[derive(Debug)]
pub struct BroadcastRecv {
    socket: UdpSocket,
}

impl BroadcastRecv {
    /// Bind the CHIRP port on `any_address` with address/port reuse.
    pub fn new(any_address: Ipv4Addr) -> io::Result<Self> {
        BroadcastRecv::with_port(any_address, CHIRP_PORT)
    }

    /// Bind an explicit port (tests use this).
    pub fn with_port(any_address: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.bind(&SocketAddr::from(SocketAddrV4::new(any_address, port)).into())?;
        let socket: UdpSocket = socket.into();
        Ok(BroadcastRecv { socket })
    }

    /// Wait up to `timeout` for one datagram.
    ///
    /// Returns `None` on timeout or when the source is not IPv4. Oversized
    /// datagrams are truncated to slightly above the CHIRP length so the
    /// decoder rejects them by length.
    pub fn recv(&self, timeout: Duration) -> io::Result<Option<RawDatagram>> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; CHIRP_MESSAGE_LENGTH + 1];
        match self.socket.recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(from))) => {
                Ok(Some(RawDatagram { content: buf[..len].to_vec(), address: *from.ip() }))
            }
            Ok((_, SocketAddr::V6(_))) => Ok(None),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Enumerate broadcast addresses of the non-loopback IPv4 interfaces.
///
/// Used by the chirp-dump tool when no explicit broadcast address is given.
/// Falls back to the limited broadcast address when enumeration fails.
pub fn default_broadcast_addresses() -> Vec<Ipv4Addr> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[chirp] Failed to list network interfaces: {e}");
            return vec![Ipv4Addr::BROADCAST];
        }
    };

    let mut addrs = Vec::new();
    for (_name, ip) in interfaces {
        if let std::net::IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                // Without prefix information assume /24, the common case
                let octets = ipv4.octets();
                addrs.push(Ipv4Addr::new(octets[0], octets[1], octets[2], 255));
            }
        }
    }
    if addrs.is_empty() {
        addrs.push(Ipv4Addr::BROADCAST);
    }
    addrs
}
