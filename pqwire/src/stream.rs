//! Buffered, framed stream to the backend.
use bytes::{Buf, Bytes, BytesMut};
use std::{
    io,
    task::{Context, Poll, ready},
};

use crate::{
    common::verbose,
    net::Socket,
    postgres::{FrontendProtocol, ProtocolError, frontend},
};

const DEFAULT_BUF_CAPACITY: usize = 8 * 1024;

/// Buffered connection to postgres.
///
/// Outgoing messages are buffered in `write_buf` until flushed, incoming bytes
/// are buffered in `read_buf` until a complete frame is available.
#[derive(Debug)]
pub struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl PgStream {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    /// Buffer a frontend message.
    pub fn send<F: FrontendProtocol>(&mut self, message: F) {
        verbose!(msgtype = %(F::MSGTYPE as char), "send");
        frontend::write(message, &mut self.write_buf);
    }

    pub fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    pub fn send_ssl_request(&mut self) {
        frontend::SslRequest.write(&mut self.write_buf);
    }

    pub fn send_cancel_request(&mut self, request: frontend::CancelRequest) {
        request.write(&mut self.write_buf);
    }

    /// Number of bytes buffered but not yet written.
    pub fn pending_write(&self) -> usize {
        self.write_buf.len()
    }

    /// Write buffered bytes without blocking.
    ///
    /// Returns `true` when everything is written.
    pub fn try_flush(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            match self.socket.try_write(&self.write_buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.write_buf.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Poll to write every buffered bytes.
    pub fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        loop {
            if self.try_flush()? {
                return Poll::Ready(Ok(()));
            }
            ready!(self.socket.poll_write_ready(cx))?;
        }
    }

    /// Write every buffered bytes.
    pub fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    /// Read whatever is available without blocking.
    ///
    /// Returns number of bytes read, zero if nothing is available yet.
    ///
    /// Eof is reported once every byte before it is returned.
    pub fn try_fill(&mut self) -> io::Result<usize> {
        let mut total = 0;
        loop {
            self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            match self.socket.try_read_buf(&mut self.read_buf) {
                Ok(0) if total == 0 => return Err(closed()),
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(err) => return Err(err),
            }
        }
    }

    /// Poll to read at least one byte.
    pub fn poll_fill(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        loop {
            if self.try_fill()? > 0 {
                return Poll::Ready(Ok(()));
            }
            ready!(self.socket.poll_read_ready(cx))?;
        }
    }

    /// Message type of the next frame, if it is completely buffered.
    pub fn peek_frame(&self) -> Result<Option<u8>, ProtocolError> {
        let Some(mut header) = self.read_buf.get(..5) else {
            return Ok(None);
        };

        let msgtype = header.get_u8();
        let len = header.get_i32();

        if len < 4 {
            return Err(ProtocolError::InvalidLength { len });
        }

        if self.read_buf.len() - 1/*msgtype*/ < len as usize {
            return Ok(None);
        }

        Ok(Some(msgtype))
    }

    /// Split the next frame off the read buffer, if it is completely buffered.
    pub fn next_frame(&mut self) -> Result<Option<(u8, Bytes)>, ProtocolError> {
        let Some(msgtype) = self.peek_frame()? else {
            return Ok(None);
        };

        let len = (&self.read_buf[1..5]).get_i32() as usize;
        self.read_buf.advance(5);
        let body = self.read_buf.split_to(len - 4).freeze();

        verbose!(msgtype = crate::postgres::BackendMessage::message_name(msgtype), len, "recv");

        Ok(Some((msgtype, body)))
    }

    /// Take single byte response, used for `SSLRequest` answer.
    pub fn take_byte(&mut self) -> Option<u8> {
        match self.read_buf.is_empty() {
            true => None,
            false => Some(self.read_buf.get_u8()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "server closed the connection unexpectedly",
    )
}

/// Stream eof, as returned by [`PgStream::try_fill`].
pub fn is_closed(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}
