//! `COPY` data transfer.
//!
//! After a command result reports [`ExecStatus::CopyIn`][crate::ExecStatus::CopyIn],
//! data is sent with [`put_copy_data`][Connection::put_copy_data] and
//! terminated with [`put_copy_end`][Connection::put_copy_end]. After
//! [`ExecStatus::CopyOut`][crate::ExecStatus::CopyOut], data is read with
//! [`get_copy_data`][Connection::get_copy_data] until it returns `None`.
//!
//! Either way, the command outcome is then retrieved with
//! [`get_result`][Connection::get_result].
use bytes::Bytes;
use futures_core::Stream;
use std::{
    future::poll_fn,
    pin::Pin,
    task::{Context, Poll},
};

use crate::{
    Connection, Result,
    connection::AsyncStatus,
    error::ErrorKind,
    postgres::frontend,
    query::QueryClass,
};

/// Outgoing buffer size above which buffered data is written before accepting more.
const OUTBUF_THRESHOLD: usize = 8 * 1024;

/// Outcome of a non-blocking copy read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyRead {
    /// A single data row.
    Data(Bytes),
    /// No complete row is buffered yet.
    WouldBlock,
    /// Copy out is complete, retrieve the outcome with `get_result`.
    Done,
}

impl Connection {
    /// Send data during `COPY FROM STDIN`.
    ///
    /// In nonblocking mode, returns `false` if the data could not be queued
    /// because the outgoing buffer is full, retry after the socket is writable.
    pub async fn put_copy_data(&mut self, data: &[u8]) -> Result<bool> {
        self.copy_in_start()?;

        let nonblocking = self.nonblocking;
        let stream = self.stream_mut()?;

        if nonblocking && stream.pending_write() + data.len() > OUTBUF_THRESHOLD {
            if let Err(err) = stream.try_flush() {
                return Err(self.fail(err));
            }
            // a large row is still accepted into an empty buffer
            if stream.pending_write() > 0 && stream.pending_write() + data.len() > OUTBUF_THRESHOLD {
                return Ok(false);
            }
        }

        let stream = self.stream_mut()?;
        stream.send(frontend::CopyData { data });

        if stream.pending_write() > OUTBUF_THRESHOLD {
            match nonblocking {
                true => {
                    self.try_flush()?;
                },
                false => self.flush().await?,
            }
        }

        Ok(true)
    }

    /// End `COPY FROM STDIN`, or abort it with given error message.
    ///
    /// Aborting makes the command fail with an error result.
    pub async fn put_copy_end(&mut self, error: Option<&str>) -> Result<bool> {
        self.copy_in_start()?;

        let extended = !matches!(self.query_class, QueryClass::Simple);
        let stream = self.stream_mut()?;
        match error {
            Some(message) => stream.send(frontend::CopyFail { message }),
            None => stream.send(frontend::CopyDone),
        }
        if extended {
            stream.send(frontend::Sync);
        }

        self.async_status = match self.async_status {
            AsyncStatus::CopyBoth => AsyncStatus::CopyOut,
            _ => AsyncStatus::Active,
        };

        match self.nonblocking {
            true => {
                self.try_flush()?;
            },
            false => self.flush().await?,
        }

        Ok(true)
    }

    /// Process pending input, then require copy in state.
    fn copy_in_start(&mut self) -> Result<()> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        // an error from the server ends copy state
        if let Err(err) = self.parse_input() {
            return Err(self.fail(err));
        }
        match self.async_status {
            AsyncStatus::CopyIn | AsyncStatus::CopyBoth => Ok(()),
            _ => Err(ErrorKind::NotInCopy.into()),
        }
    }

    /// Receive a single row during `COPY TO STDOUT`.
    ///
    /// Returns `None` when copy is complete.
    pub async fn get_copy_data(&mut self) -> Result<Option<Bytes>> {
        poll_fn(|cx| self.poll_get_copy_data(cx)).await
    }

    /// Receive a buffered row without blocking.
    pub fn try_get_copy_data(&mut self) -> Result<CopyRead> {
        match self.read_copy_message()? {
            CopyRead::WouldBlock => {
                let stream = self.stream_mut()?;
                if let Err(err) = stream.try_fill() {
                    return Err(self.fail(err));
                }
                self.read_copy_message()
            },
            read => Ok(read),
        }
    }

    pub fn poll_get_copy_data(&mut self, cx: &mut Context) -> Poll<Result<Option<Bytes>>> {
        loop {
            match self.read_copy_message() {
                Ok(CopyRead::Data(data)) => return Poll::Ready(Ok(Some(data))),
                Ok(CopyRead::Done) => return Poll::Ready(Ok(None)),
                Ok(CopyRead::WouldBlock) => {},
                Err(err) => return Poll::Ready(Err(err)),
            }

            let stream = match self.stream_mut() {
                Ok(stream) => stream,
                Err(err) => return Poll::Ready(Err(err)),
            };
            let poll = match stream.poll_flush(cx) {
                Poll::Ready(Ok(())) => stream.poll_fill(cx),
                poll => poll,
            };
            match poll {
                Poll::Ready(Ok(())) => {},
                Poll::Ready(Err(err)) => return Poll::Ready(Err(self.fail(err))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn read_copy_message(&mut self) -> Result<CopyRead> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if !matches!(self.async_status, AsyncStatus::CopyOut | AsyncStatus::CopyBoth) {
            return Err(ErrorKind::NotInCopy.into());
        }

        loop {
            if !matches!(self.async_status, AsyncStatus::CopyOut | AsyncStatus::CopyBoth) {
                return Ok(CopyRead::Done);
            }

            let stream = self.stream_mut()?;
            let msgtype = match stream.peek_frame() {
                Ok(Some(msgtype)) => msgtype,
                Ok(None) => return Ok(CopyRead::WouldBlock),
                Err(err) => return Err(self.fail(err)),
            };

            match msgtype {
                b'd' | b'c' => {
                    let body = match stream.next_frame() {
                        Ok(Some((_, body))) => body,
                        Ok(None) => return Ok(CopyRead::WouldBlock),
                        Err(err) => return Err(self.fail(err)),
                    };
                    if msgtype == b'd' {
                        return Ok(CopyRead::Data(body));
                    }
                    self.async_status = match self.async_status {
                        AsyncStatus::CopyBoth => AsyncStatus::CopyIn,
                        _ => AsyncStatus::Active,
                    };
                    return Ok(CopyRead::Done);
                },
                // notice, error and others are processed as usual
                _ => {
                    if let Err(err) = self.parse_input() {
                        return Err(self.fail(err));
                    }
                },
            }
        }
    }

    /// Stream of `COPY TO STDOUT` rows.
    pub fn copy_out_stream(&mut self) -> CopyOutStream<'_> {
        CopyOutStream { conn: self, done: false }
    }
}

/// Stream of `COPY TO STDOUT` rows, created by [`Connection::copy_out_stream`].
#[derive(Debug)]
pub struct CopyOutStream<'a> {
    conn: &'a mut Connection,
    done: bool,
}

impl Stream for CopyOutStream<'_> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        if me.done {
            return Poll::Ready(None);
        }
        match me.conn.poll_get_copy_data(cx) {
            Poll::Ready(Ok(Some(data))) => Poll::Ready(Some(Ok(data))),
            Poll::Ready(Ok(None)) => {
                me.done = true;
                Poll::Ready(None)
            },
            Poll::Ready(Err(err)) => {
                me.done = true;
                Poll::Ready(Some(Err(err)))
            },
            Poll::Pending => Poll::Pending,
        }
    }
}
