//! Network sample source

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

#[cfg(not(test))]
use log::debug;

#[cfg(test)]
use std::println as debug;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

/// Largest datagram we accept
pub const MAX_DATAGRAM_LEN: usize = 65536;

/// Receives sample datagrams from a UDP multicast group
///
/// Reads block for at most the configured timeout, after which
/// [`recv()`](#method.recv) returns `Ok(None)` so the caller's
/// loop regains control. The group is left and the socket
/// closed when the source is dropped.
///
/// Unicast addresses are accepted too; no group is joined.
#[derive(Debug)]
pub struct MulticastSource {
    socket: UdpSocket,
    group: Option<(Ipv4Addr, Ipv4Addr)>,
    buf: Vec<u8>,
}

impl MulticastSource {
    /// Bind to `addr:port`
    ///
    /// If `addr` is a multicast group, the group is joined on
    /// the interface with address `iface`. Use
    /// `Ipv4Addr::UNSPECIFIED` to let the OS choose.
    pub fn bind(
        addr: Ipv4Addr,
        port: u16,
        iface: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(SourceError::Socket)?;
        socket
            .set_reuse_address(true)
            .map_err(SourceError::Socket)?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(SourceError::Socket)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(addr, port));
        socket
            .bind(&bind_addr.into())
            .map_err(|e| SourceError::Bind(bind_addr, e))?;

        let group = if addr.is_multicast() {
            socket
                .join_multicast_v4(&addr, &iface)
                .map_err(|e| SourceError::Join(addr, e))?;
            Some((addr, iface))
        } else {
            None
        };

        socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(SourceError::Socket)?;

        let socket: UdpSocket = socket.into();
        debug!(
            "listening on {} (group: {:?})",
            socket.local_addr().map_err(SourceError::Socket)?,
            group
        );
        Ok(Self {
            socket,
            group,
            buf: vec![0u8; MAX_DATAGRAM_LEN],
        })
    }

    /// Local socket address
    pub fn local_addr(&self) -> Result<SocketAddr, SourceError> {
        self.socket.local_addr().map_err(SourceError::Socket)
    }

    /// Receive one datagram
    ///
    /// Returns `Ok(None)` if the read timeout expires first.
    pub fn recv(&mut self) -> Result<Option<&[u8]>, SourceError> {
        match self.socket.recv(&mut self.buf) {
            Ok(len) => Ok(Some(&self.buf[..len])),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(SourceError::Recv(e)),
        }
    }
}

impl Drop for MulticastSource {
    fn drop(&mut self) {
        if let Some((group, iface)) = self.group {
            let _ = self.socket.leave_multicast_v4(&group, &iface);
        }
    }
}

/// Network source failure
#[derive(Error, Debug)]
pub enum SourceError {
    /// Socket could not be created or configured
    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    /// Address in use or not available
    #[error("unable to bind {0}: {1}")]
    Bind(SocketAddr, #[source] io::Error),

    /// Multicast join failed
    #[error("unable to join multicast group {0}: {1}")]
    Join(Ipv4Addr, #[source] io::Error),

    /// Receive failed for a reason other than a timeout
    #[error("receive error: {0}")]
    Recv(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_recv_and_timeout() {
        let mut src = MulticastSource::bind(
            Ipv4Addr::LOCALHOST,
            0,
            Ipv4Addr::UNSPECIFIED,
            Duration::from_millis(50),
        )
        .expect("bind");
        let dest = src.local_addr().expect("addr");

        let tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind tx");
        tx.send_to(&[1, 2, 3, 4], dest).expect("send");

        let got = src.recv().expect("recv").map(|b| b.to_vec());
        assert_eq!(Some(vec![1, 2, 3, 4]), got);

        // nothing else is coming
        assert!(src.recv().expect("recv").is_none());
    }
}
