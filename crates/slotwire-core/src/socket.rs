//! Socket collaborator
//!
//! The connection state machine only needs four things from a socket: how
//! many bytes can be read without blocking, a read into a caller-supplied
//! region, a read of the fixed-size length prefix, and close. Platform
//! crates implement [`FrameSocket`] over real file descriptors; tests use
//! scripted in-memory sockets.

use std::io;

/// Width of the frame length prefix on the wire
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Non-blocking byte source feeding one connection
pub trait FrameSocket {
    /// Bytes that can be read right now without blocking.
    fn available(&self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes. Returns the number of bytes read; 0
    /// means nothing was ready.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Read one native-order length prefix.
    ///
    /// Only called once `available()` reported at least
    /// [`LENGTH_PREFIX_SIZE`] bytes.
    fn receive_length(&mut self) -> io::Result<i32> {
        let mut raw = [0u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_SIZE {
            match self.receive(&mut raw[filled..])? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "length prefix truncated",
                    ))
                }
                n => filled += n,
            }
        }
        Ok(i32::from_ne_bytes(raw))
    }

    /// Shut the socket down. Called once, from `Disconnect`.
    fn close(&mut self) -> io::Result<()>;
}

/// Encode a payload length the way it travels on the wire.
#[inline]
pub fn length_prefix(len: usize) -> [u8; LENGTH_PREFIX_SIZE] {
    (len as i32).to_ne_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out one byte per receive call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl FrameSocket for Trickle {
        fn available(&self) -> io::Result<usize> {
            Ok(self.data.len() - self.pos)
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_receive_length_gathers_short_reads() {
        let mut sock = Trickle {
            data: length_prefix(300).to_vec(),
            pos: 0,
        };
        assert_eq!(sock.receive_length().unwrap(), 300);
        assert_eq!(sock.available().unwrap(), 0);
    }

    #[test]
    fn test_receive_length_truncated() {
        let mut sock = Trickle {
            data: vec![1, 0],
            pos: 0,
        };
        let err = sock.receive_length().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
