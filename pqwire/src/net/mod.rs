//! Byte-stream socket to the backend.
use std::{future::Future, io, pin::Pin};

use crate::common::ByteStr;

mod socket;

pub use socket::Socket;

/// Boxed socket connect future, polled by non-blocking connection establishment.
pub(crate) type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<Socket>> + Send>>;

/// Resolved address of the backend.
#[derive(Debug, Clone)]
pub enum ConnectTarget {
    Tcp { host: ByteStr, port: u16 },
    Unix { path: String },
}

impl ConnectTarget {
    pub async fn connect(self) -> io::Result<Socket> {
        match self {
            Self::Tcp { host, port } => Socket::connect_tcp(&host, port).await,
            Self::Unix { path } => Socket::connect_socket(&path).await,
        }
    }

    pub(crate) fn connect_boxed(self) -> ConnectFuture {
        Box::pin(self.connect())
    }
}

impl std::fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix { path } => f.write_str(path),
        }
    }
}
