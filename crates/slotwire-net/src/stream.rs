//! Non-blocking TCP frame socket
//!
//! Wraps a `std::net::TcpStream` switched to non-blocking mode. Readable
//! byte counts come from `FIONREAD`; a read that would block reports zero
//! bytes instead of an error, which is what the framing loop expects.

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use slotwire_core::FrameSocket;

nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);

/// TCP stream implementing [`FrameSocket`]
#[derive(Debug)]
pub struct TcpFrameSocket {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpFrameSocket {
    /// Take over an accepted or connected stream: non-blocking, no Nagle.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }

    /// Remote address, if it was known when the socket was wrapped.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[inline]
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl FrameSocket for TcpFrameSocket {
    fn available(&self) -> io::Result<usize> {
        let mut n: libc::c_int = 0;
        // Safety: `n` outlives the call and the fd is owned by `self.stream`
        unsafe { fionread(self.stream.as_raw_fd(), &mut n) }.map_err(io::Error::from)?;
        Ok(n.max(0) as usize)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // Peer already gone
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl AsFd for TcpFrameSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for TcpFrameSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
