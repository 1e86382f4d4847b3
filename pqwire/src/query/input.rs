//! Incoming message processing.
use std::{
    future::poll_fn,
    task::{Context, Poll},
};

use super::QueryClass;
use crate::{
    Connection, Result,
    common::verbose,
    connection::AsyncStatus,
    notify::Notification,
    postgres::{BackendMessage, BackendProtocol, ProtocolError, frontend},
    result::{ExecStatus, PgResult, ResultBuilder},
};

impl Connection {
    /// Process every complete frame in the read buffer.
    ///
    /// In `CopyOut` state, `CopyData` and `CopyDone` are left for
    /// [`get_copy_data`][Connection::get_copy_data].
    pub(crate) fn parse_input(&mut self) -> Result<(), ProtocolError> {
        loop {
            let copy_out = matches!(self.async_status, AsyncStatus::CopyOut | AsyncStatus::CopyBoth);
            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };
            let Some(msgtype) = stream.peek_frame()? else {
                return Ok(());
            };
            if copy_out && matches!(msgtype, b'd' | b'c') {
                return Ok(());
            }
            let Some((msgtype, body)) = stream.next_frame()? else {
                return Ok(());
            };
            let message = BackendMessage::decode(msgtype, body)?;
            self.process_message(message)?;
        }
    }

    fn process_message(&mut self, message: BackendMessage) -> Result<(), ProtocolError> {
        use BackendMessage::*;

        // accepted in any state
        let message = match message {
            NoticeResponse(notice) => {
                (self.notice_handler)(&notice.notice);
                return Ok(());
            },
            NotificationResponse(notify) => {
                verbose!(channel = %notify.channel, "notification");
                self.notifies.push_back(Notification {
                    process_id: notify.process_id,
                    channel: notify.channel,
                    payload: notify.payload,
                });
                return Ok(());
            },
            ParameterStatus(param) => {
                self.params.insert(param.name, param.value);
                return Ok(());
            },
            BackendKeyData(key) => {
                self.backend_key = Some((key.process_id, key.secret_key));
                return Ok(());
            },
            message => message,
        };

        if matches!(self.async_status, AsyncStatus::Idle) {
            return match message {
                // e.g. the backend is shutting down, the socket will be closed next
                ErrorResponse(err) => {
                    self.error_message = err.error.to_string();
                    (self.notice_handler)(&err.error);
                    Ok(())
                },
                message => Err(ProtocolError::unexpected_phase(message.msgtype(), "idle")),
            };
        }

        match message {
            CommandComplete(complete) => {
                let builder = self.builder.take().unwrap_or_else(ResultBuilder::new);
                let status = match builder.has_description() {
                    true => ExecStatus::TuplesOk,
                    false => ExecStatus::CommandOk,
                };
                self.push_result(builder.finish(status, Some(complete.tag)));
            },
            ErrorResponse(err) => {
                self.builder = None;
                let result = PgResult::error(err.error);
                self.error_message = result.error_message().to_owned();
                self.push_result(result);
                if self.async_status.is_copy() {
                    self.async_status = AsyncStatus::Active;
                }
            },
            EmptyQueryResponse(_) => {
                self.builder = None;
                self.push_result(PgResult::empty(ExecStatus::EmptyQuery));
            },
            ReadyForQuery(ready) => {
                self.tx_indicator = ready.tx_status;
                self.async_status = AsyncStatus::Idle;
                self.builder = None;
                self.single_row = false;
                if std::mem::take(&mut self.rollback_pending) {
                    self.send_rollback();
                }
            },
            ParseComplete(_) => {
                if matches!(self.query_class, QueryClass::Prepare) {
                    self.push_result(PgResult::empty(ExecStatus::CommandOk));
                }
            },
            CloseComplete(_) => {
                if matches!(self.query_class, QueryClass::Close) {
                    self.push_result(PgResult::empty(ExecStatus::CommandOk));
                }
            },
            BindComplete(_) => {},
            ParameterDescription(desc) => {
                self.builder
                    .get_or_insert_with(ResultBuilder::new)
                    .set_param_types(desc.oids);
            },
            RowDescription(desc) => {
                let builder = self.builder.get_or_insert_with(ResultBuilder::new);
                builder.set_columns(desc.fields);
                if matches!(self.query_class, QueryClass::Describe) {
                    self.finish_describe();
                }
            },
            NoData(_) => {
                if matches!(self.query_class, QueryClass::Describe) {
                    self.finish_describe();
                }
            },
            DataRow(row) => {
                let Some(builder) = self.builder.as_mut() else {
                    return Err(ProtocolError::malformed(b'D', "row without description"));
                };
                match self.single_row {
                    true => {
                        let result = builder.single_row(row)?;
                        self.push_result(result);
                    },
                    false => builder.add_row(row)?,
                }
            },
            PortalSuspended(_) => {
                let builder = self.builder.take().unwrap_or_else(ResultBuilder::new);
                self.push_result(builder.finish(ExecStatus::TuplesOk, None));
            },
            CopyInResponse(copy) => {
                self.builder = None;
                self.push_result(ResultBuilder::copy(ExecStatus::CopyIn, copy.column_formats));
                self.async_status = AsyncStatus::CopyIn;
            },
            CopyOutResponse(copy) => {
                self.builder = None;
                self.push_result(ResultBuilder::copy(ExecStatus::CopyOut, copy.column_formats));
                self.async_status = AsyncStatus::CopyOut;
            },
            CopyBothResponse(copy) => {
                self.builder = None;
                self.push_result(ResultBuilder::copy(ExecStatus::CopyBoth, copy.column_formats));
                self.async_status = AsyncStatus::CopyBoth;
            },
            message => return Err(ProtocolError::unexpected_phase(message.msgtype(), "query")),
        }

        Ok(())
    }

    fn push_result(&mut self, result: PgResult) {
        if !matches!(self.query_class, QueryClass::Rollback) {
            self.results.push_back(result);
        }
    }

    /// Queue `ROLLBACK` of a dropped transaction.
    ///
    /// Its results are discarded, [`get_result`][Connection::get_result] only
    /// waits for it to complete.
    pub(crate) fn send_rollback(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        verbose!("rollback dropped transaction");
        stream.send(frontend::Query { sql: "ROLLBACK" });
        self.query_class = QueryClass::Rollback;
        self.async_status = AsyncStatus::Active;
    }

    fn finish_describe(&mut self) {
        let builder = self.builder.take().unwrap_or_else(ResultBuilder::new);
        self.push_result(builder.finish(ExecStatus::CommandOk, None));
    }

    /// Poll for the next result of the command in flight.
    ///
    /// Returns `None` when the command is complete, or the connection entered
    /// COPY state and every result announcing it is taken.
    pub fn poll_get_result(&mut self, cx: &mut Context) -> Poll<Result<Option<PgResult>>> {
        loop {
            if let Some(err) = self.pending_error.take() {
                return Poll::Ready(Err(err));
            }
            if let Err(err) = self.parse_input() {
                return Poll::Ready(Err(self.fail(err)));
            }
            if let Some(result) = self.results.pop_front() {
                return Poll::Ready(Ok(Some(result)));
            }
            if !matches!(self.async_status, AsyncStatus::Active) {
                return Poll::Ready(Ok(None));
            }

            let Some(stream) = self.stream.as_mut() else {
                return Poll::Ready(Ok(None));
            };
            match stream.poll_flush(cx) {
                Poll::Ready(Ok(())) => {},
                Poll::Ready(Err(err)) => return Poll::Ready(Err(self.fail(err))),
                Poll::Pending => return Poll::Pending,
            }
            match stream.poll_fill(cx) {
                Poll::Ready(Ok(())) => {},
                Poll::Ready(Err(err)) => return Poll::Ready(Err(self.fail(err))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Wait for the next result of the command in flight.
    ///
    /// See [`poll_get_result`][Connection::poll_get_result].
    pub async fn get_result(&mut self) -> Result<Option<PgResult>> {
        poll_fn(|cx| self.poll_get_result(cx)).await
    }

    /// Read whatever the socket has available without blocking, and process it.
    pub fn consume_input(&mut self) -> Result<()> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        let stream = self.stream_mut()?;
        if let Err(err) = stream.try_fill() {
            return Err(self.fail(err));
        }
        if let Err(err) = self.parse_input() {
            return Err(self.fail(err));
        }
        Ok(())
    }

    /// Whether [`get_result`][Connection::get_result] would wait for input.
    ///
    /// Only buffered input is processed, call [`consume_input`][Connection::consume_input]
    /// to read the socket.
    pub fn is_busy(&mut self) -> bool {
        if let Err(err) = self.parse_input() {
            self.fail_later(err);
        }
        self.pending_error.is_none()
            && self.results.is_empty()
            && matches!(self.async_status, AsyncStatus::Active)
    }

    /// Write pending outgoing bytes without blocking.
    ///
    /// Returns `true` when everything is written.
    pub fn try_flush(&mut self) -> Result<bool> {
        let stream = self.stream_mut()?;
        match stream.try_flush() {
            Ok(done) => Ok(done),
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn poll_flush(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        let stream = match self.stream_mut() {
            Ok(stream) => stream,
            Err(err) => return Poll::Ready(Err(err)),
        };
        match stream.poll_flush(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(self.fail(err))),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Write every pending outgoing bytes.
    pub async fn flush(&mut self) -> Result<()> {
        poll_fn(|cx| self.poll_flush(cx)).await
    }
}
