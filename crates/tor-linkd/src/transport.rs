//! A plain TCP [`Transport`].

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use tor_link::Transport;

/// A non-blocking TCP stream to another relay.
///
/// There's no TLS here, so the binding material is just the pair of
/// socket addresses: enough for both ends to agree, but no protection
/// against anybody who can see or relay the stream.
pub(crate) struct TcpTransport {
    /// The underlying socket.
    stream: TcpStream,
    /// Value for [`Transport::binding_material`].
    binding: Vec<u8>,
}

impl TcpTransport {
    /// Wrap `stream`, making it non-blocking.
    pub(crate) fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let binding = binding_for(stream.local_addr()?, stream.peer_addr()?);
        Ok(TcpTransport { stream, binding })
    }
}

/// Return the binding material for a stream between `a` and `b`.
///
/// The result doesn't depend on which end is which.
fn binding_for(a: SocketAddr, b: SocketAddr) -> Vec<u8> {
    let mut addrs = [a.to_string(), b.to_string()];
    addrs.sort();
    addrs.join(" ").into_bytes()
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn binding_material(&self) -> Vec<u8> {
        self.binding.clone()
    }
}
