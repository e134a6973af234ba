//! UDP transport implementation
//!
//! One datagram peer carries the byte stream; the framing layer tolerates
//! datagram boundaries since it scans for sync bytes. Used by the gateway to
//! reach the ground-station peer.

use super::Transport;
use crate::error::Result;
use std::net::UdpSocket;
use std::time::Duration;

/// UDP transport bound to one remote peer
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a local address and connect to the remote peer
    ///
    /// # Arguments
    /// * `bind` - Local bind address (e.g., "0.0.0.0:9000")
    /// * `peer` - Remote peer address (e.g., "192.168.1.5:9000")
    pub fn open(bind: &str, peer: &str) -> Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.connect(peer)?;
        socket.set_read_timeout(Some(Duration::from_millis(10)))?;

        log::info!("UDP transport: {} <-> {}", bind, peer);

        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.socket.recv(buffer) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.socket.send(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        // Datagrams are sent immediately
        Ok(())
    }
}
