use bytes::BytesMut;
use std::{
    io,
    task::{Context, Poll},
};

/// an either `TcpStream` or `UnixStream`, with non-blocking read and write.
///
/// None of the `try_*` method blocks, they return [`io::ErrorKind::WouldBlock`]
/// instead, caller should then wait for readiness with `poll_*_ready`.
///
/// require `tokio` feature, otherwise panic at runtime
pub struct Socket {
    kind: Kind,
}

enum Kind {
    #[cfg(feature = "tokio")]
    TokioTcp(tokio::net::TcpStream),
    #[cfg(all(feature = "tokio", unix))]
    TokioUnixSocket(tokio::net::UnixStream),
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $body:expr) => {
        match $self.kind {
            #[cfg(feature = "tokio")]
            Kind::TokioTcp(ref $s) => $body,
            #[cfg(all(feature = "tokio", unix))]
            Kind::TokioUnixSocket(ref $s) => $body,
        }
    };
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        #[cfg(feature = "tokio")]
        {
            let socket = tokio::net::TcpStream::connect((host,port)).await?;
            socket.set_nodelay(true)?;
            Ok(Socket { kind: Kind::TokioTcp(socket) })
        }

        #[cfg(not(feature = "tokio"))]
        {
            let _ = (host,port);
            panic!("runtime disabled")
        }
    }

    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        #[cfg(all(feature = "tokio", unix))]
        {
            let socket = tokio::net::UnixStream::connect(path).await?;
            Ok(Socket { kind: Kind::TokioUnixSocket(socket) })
        }

        #[cfg(not(all(feature = "tokio", unix)))]
        {
            let _ = path;
            Err(io::Error::new(io::ErrorKind::Unsupported, "unix domain socket unsupported"))
        }
    }

    /// Read available bytes into the spare capacity of `buf`.
    ///
    /// `Ok(0)` means the peer closed the connection.
    pub fn try_read_buf(&self, buf: &mut BytesMut) -> io::Result<usize> {
        let _ = &buf;
        dispatch!(self, s => s.try_read_buf(buf))
    }

    /// Write as many bytes as possible without blocking.
    pub fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let _ = buf;
        dispatch!(self, s => s.try_write(buf))
    }

    pub fn poll_read_ready(&self, cx: &mut Context) -> Poll<io::Result<()>> {
        let _ = &cx;
        dispatch!(self, s => s.poll_read_ready(cx))
    }

    pub fn poll_write_ready(&self, cx: &mut Context) -> Poll<io::Result<()>> {
        let _ = &cx;
        dispatch!(self, s => s.poll_write_ready(cx))
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        dispatch!(self, s => std::fmt::Debug::fmt(s, _f))
    }
}
