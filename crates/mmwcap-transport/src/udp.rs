use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{DatagramSource, Recv};

/// A bound UDP socket with a bounded receive timeout.
///
/// Used both for the capture board's command channel (with a peer set) and
/// for its one-way ADC data stream. The socket is owned exclusively and
/// closed when the link is dropped.
pub struct UdpLink {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
    recv_timeout: Duration,
}

impl UdpLink {
    /// Bind to `addr` and set the receive timeout.
    ///
    /// A zero timeout is rejected by the OS, so it is clamped to 1 ms.
    pub fn bind(addr: SocketAddr, recv_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|e| TransportError::Bind { addr, source: e })?;
        let recv_timeout = recv_timeout.max(Duration::from_millis(1));
        socket
            .set_read_timeout(Some(recv_timeout))
            .map_err(|e| TransportError::Bind { addr, source: e })?;
        let local_addr = socket.local_addr()?;

        info!(%local_addr, ?recv_timeout, "bound udp socket");

        Ok(Self {
            socket,
            local_addr,
            peer: None,
            recv_timeout,
        })
    }

    /// Set the address that [`UdpLink::send`] delivers to.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Send one datagram to the configured peer.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let peer = self.peer.ok_or(TransportError::NoPeer)?;
        let sent = self.socket.send_to(data, peer)?;
        debug!(%peer, len = sent, "sent datagram");
        Ok(sent)
    }

    /// Receive one datagram, waiting at most the receive timeout.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Recv<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Recv::Data((len, from))),
            // Unix reports an expired SO_RCVTIMEO as WouldBlock, Windows as TimedOut.
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(Recv::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Change the receive timeout.
    pub fn set_recv_timeout(&mut self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;
        self.recv_timeout = timeout;
        Ok(())
    }

    /// Request a kernel receive buffer of `bytes` (`SO_RCVBUF`).
    ///
    /// The ADC stream arrives in bursts far larger than the default buffer;
    /// the kernel may grant less than requested. Returns the granted size.
    #[cfg(unix)]
    pub fn set_recv_buffer_size(&self, bytes: usize) -> Result<usize> {
        use std::os::fd::AsRawFd;

        let fd = self.socket.as_raw_fd();
        let requested = libc::c_int::try_from(bytes).unwrap_or(libc::c_int::MAX);
        let len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

        // SAFETY: `requested` is a valid readable c_int for the provided length,
        // and `fd` is an open UDP socket descriptor owned by this link.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                (&requested as *const libc::c_int).cast::<libc::c_void>(),
                len,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let mut granted: libc::c_int = 0;
        let mut granted_len = len;
        // SAFETY: `granted` and `granted_len` are valid writable pointers for the
        // provided sizes, and `fd` is still the open socket from above.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                (&mut granted as *mut libc::c_int).cast::<libc::c_void>(),
                &mut granted_len,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let granted = usize::try_from(granted).unwrap_or(0);
        debug!(local_addr = %self.local_addr, requested = bytes, granted, "set receive buffer");
        Ok(granted)
    }

    /// Request a kernel receive buffer of `bytes`.
    ///
    /// Not supported on this platform; reports the request unchanged.
    #[cfg(not(unix))]
    pub fn set_recv_buffer_size(&self, bytes: usize) -> Result<usize> {
        Ok(bytes)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "udp"
    }
}

impl DatagramSource for UdpLink {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Recv<usize>> {
        Ok(match self.recv(buf)? {
            Recv::Data((len, _from)) => Recv::Data(len),
            Recv::Timeout => Recv::Timeout,
        })
    }
}

impl std::fmt::Debug for UdpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpLink")
            .field("local_addr", &self.local_addr)
            .field("peer", &self.peer)
            .field("recv_timeout", &self.recv_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_send_and_receive_between_links() {
        let rx = UdpLink::bind(loopback(), Duration::from_millis(500)).unwrap();
        let tx = UdpLink::bind(loopback(), Duration::from_millis(500))
            .unwrap()
            .with_peer(rx.local_addr());

        tx.send(b"chirp").unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = rx.recv(&mut buf).unwrap().data().unwrap();
        assert_eq!(&buf[..len], b"chirp");
        assert_eq!(from, tx.local_addr());
    }

    #[test]
    fn test_recv_times_out_within_bound() {
        let mut link = UdpLink::bind(loopback(), Duration::from_millis(30)).unwrap();
        let mut buf = [0u8; 16];

        let started = Instant::now();
        let outcome = link.recv_datagram(&mut buf).unwrap();
        assert!(outcome.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_send_without_peer_fails() {
        let link = UdpLink::bind(loopback(), Duration::from_millis(10)).unwrap();
        assert!(matches!(link.send(b"x"), Err(TransportError::NoPeer)));
    }

    #[test]
    fn test_bind_conflict_reports_address() {
        let first = UdpLink::bind(loopback(), Duration::from_millis(10)).unwrap();
        let result = UdpLink::bind(first.local_addr(), Duration::from_millis(10));
        match result {
            Err(TransportError::Bind { addr, .. }) => assert_eq!(addr, first.local_addr()),
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_recv_buffer_size_is_granted() {
        let link = UdpLink::bind(loopback(), Duration::from_millis(10)).unwrap();
        let granted = link.set_recv_buffer_size(256 * 1024).unwrap();
        assert!(granted > 0);
    }
}
