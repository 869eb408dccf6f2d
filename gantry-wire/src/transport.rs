//! Byte-stream transports: TCP and (unix) IPC.
//!
//! # Safety
//!
//! Setting TCP_NODELAY borrows the raw socket through `socket2`, which needs
//! unsafe fd/handle access. The borrowed socket is forgotten so the
//! descriptor stays owned by the compio stream.

#![allow(unsafe_code)]

use std::io;

use compio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use compio::net::{UnixListener, UnixStream};
use gantry_core::endpoint::Endpoint;

/// An established connection of either transport.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Ipc(UnixStream),
}

/// A bound listener of either transport.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc(UnixListener),
}

impl Listener {
    /// Bind and return the resolved endpoint (the real port for `:0`).
    pub async fn bind(endpoint: &Endpoint) -> io::Result<(Self, Endpoint)> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(*addr).await?;
                let local = listener.local_addr()?;
                Ok((Self::Tcp(listener), Endpoint::from(local)))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                // A stale socket file from a previous run blocks the bind.
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path).await?;
                Ok((Self::Ipc(listener), endpoint.clone()))
            }
        }
    }

    pub async fn accept(&self) -> io::Result<Stream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                enable_tcp_nodelay(&stream)?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            Self::Ipc(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Stream::Ipc(stream))
            }
        }
    }
}

/// Open a connection to `endpoint`.
pub async fn connect(endpoint: &Endpoint) -> io::Result<Stream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(*addr).await?;
            enable_tcp_nodelay(&stream)?;
            Ok(Stream::Tcp(stream))
        }
        #[cfg(unix)]
        Endpoint::Ipc(path) => Ok(Stream::Ipc(UnixStream::connect(path).await?)),
    }
}

/// Disable Nagle's algorithm; request/reply traffic is latency bound.
#[inline]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        let res = sock.set_nodelay(true);
        std::mem::forget(sock); // Don't close the fd
        res
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let raw = stream.as_raw_socket();
        let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
        let res = sock.set_nodelay(true);
        std::mem::forget(sock); // Don't close the socket
        res
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn bind_resolves_ephemeral_port() {
        let ep = Endpoint::parse("tcp://127.0.0.1:0").unwrap();
        let (listener, bound) = Listener::bind(&ep).await.unwrap();
        let Endpoint::Tcp(addr) = bound.clone() else {
            panic!("expected tcp endpoint");
        };
        assert_ne!(addr.port(), 0);

        let (accepted, client) = futures::join!(listener.accept(), connect(&bound));
        assert!(matches!(accepted, Ok(Stream::Tcp(_))));
        assert!(matches!(client, Ok(Stream::Tcp(_))));
    }
}
