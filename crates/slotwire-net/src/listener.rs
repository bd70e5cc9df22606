//! Listening socket setup and accept draining

use std::io;
use std::net::{SocketAddrV4, TcpListener};
use std::os::fd::FromRawFd;

use slotwire_core::{ConnectionRef, WireError};
use tracing::{debug, warn};

use crate::stream::TcpFrameSocket;
use crate::table::ConnectionTable;

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 4096;

/// Create a non-blocking IPv4 listener with SO_REUSEADDR and SO_REUSEPORT.
pub fn bind_listener(addr: SocketAddrV4, backlog: i32) -> io::Result<TcpListener> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Owns the fd from here on; closes it on every error path
    let listener = unsafe { TcpListener::from_raw_fd(fd) };

    let opt: libc::c_int = 1;
    for name in [libc::SO_REUSEADDR, libc::SO_REUSEPORT] {
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                name,
                &opt as *const _ as *const libc::c_void,
                std::mem::size_of_val(&opt) as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr.s_addr = u32::from(*addr.ip()).to_be();

    let ret = unsafe {
        libc::bind(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            std::mem::size_of_val(&sin) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::listen(fd, backlog) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(listener)
}

/// Accept every pending client into `table`.
///
/// Clients that arrive while the table is full are closed immediately.
/// Returns the references of the connections that were started.
pub fn accept_pending(
    listener: &TcpListener,
    table: &mut ConnectionTable<TcpFrameSocket>,
) -> io::Result<Vec<ConnectionRef>> {
    let mut accepted = Vec::new();
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(accepted),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let socket = TcpFrameSocket::new(stream)?;
        match table.accept(socket) {
            Ok(reference) => {
                debug!(connection = %reference, %peer, "client accepted");
                accepted.push(reference);
            }
            Err(WireError::NoConnectionSlots { capacity }) => {
                warn!(%peer, capacity, "connection table full, dropping client");
            }
            Err(e) => warn!(%peer, error = %e, "failed to start connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotwire_core::{ConnectionConfig, SlotPool};
    use std::net::{Ipv4Addr, TcpStream};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_bind_and_accept_until_full() {
        let listener = bind_listener(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 16).unwrap();
        let addr = listener.local_addr().unwrap();

        let pool = SlotPool::with_slots(4, 64).unwrap();
        let mut table = ConnectionTable::new(pool, 2, &ConnectionConfig::new()).unwrap();

        let clients: Vec<TcpStream> = (0..3).map(|_| TcpStream::connect(addr).unwrap()).collect();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut accepted = vec![];
        while accepted.len() < 2 && Instant::now() < deadline {
            accepted.extend(accept_pending(&listener, &mut table).unwrap());
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(accepted.len(), 2);
        assert_eq!(table.len(), 2);
        assert_ne!(accepted[0], accepted[1]);
        drop(clients);
    }
}
