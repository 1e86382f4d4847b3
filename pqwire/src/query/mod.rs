//! Query execution.
//!
//! Every `send_*` operation buffers the request and attempts a non-blocking
//! write, then returns. Results are retrieved with
//! [`get_result`][Connection::get_result] until it returns `None`.
//!
//! The `exec*` family combine both, returning exactly one result.
//!
//! # Example
//!
//! ```no_run
//! # async fn app(mut conn: pqwire::Connection) -> pqwire::Result<()> {
//! conn.send_query("SELECT 1; SELECT 2")?;
//!
//! while let Some(result) = conn.get_result().await? {
//!     println!("{:?}", result.get_str(0, 0));
//! }
//! # Ok(())
//! # }
//! ```
use crate::{
    Connection, Result,
    common::verbose,
    connection::AsyncStatus,
    error::ErrorKind,
    postgres::{Oid, PgFormat, frontend},
};

mod param;
mod input;
mod exec;

pub use param::Param;

/// Kind of the request in flight, decides which messages produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryClass {
    Simple,
    Extended,
    Prepare,
    Describe,
    Close,
    /// `ROLLBACK` of a dropped transaction, its results are discarded.
    Rollback,
}

const UNNAMED: &str = "";

/// Parameter count is a 16 bit integer on the wire.
fn check_nparams(nparams: usize) -> Result<()> {
    match nparams > usize::from(u16::MAX) {
        true => Err(ErrorKind::TooManyParams(nparams).into()),
        false => Ok(()),
    }
}

impl Connection {
    fn send_start(&mut self) -> Result<()> {
        if !self.status.is_ok() {
            return Err(ErrorKind::ConnectionBad.into());
        }
        if self.async_status.is_copy() {
            return Err(ErrorKind::CopyInProgress.into());
        }
        if !matches!(self.async_status, AsyncStatus::Idle) || !self.results.is_empty() {
            return Err(ErrorKind::CommandInProgress.into());
        }
        self.error_message.clear();
        Ok(())
    }

    fn send_finish(&mut self, class: QueryClass) -> Result<()> {
        self.query_class = class;
        self.async_status = AsyncStatus::Active;
        self.builder = None;

        let stream = self.stream_mut()?;
        if let Err(err) = stream.try_flush() {
            return Err(self.fail(err));
        }
        Ok(())
    }

    /// Submit a simple query, which may contain multiple statements.
    pub fn send_query(&mut self, sql: &str) -> Result<()> {
        self.send_start()?;
        verbose!(sql, "send_query");
        self.single_row_armed = false;
        self.single_row = false;
        self.stream_mut()?.send(frontend::Query { sql });
        self.send_finish(QueryClass::Simple)
    }

    /// Submit a single statement with parameters, using the unnamed statement and portal.
    ///
    /// Parameter types are taken from [`Param::oid`], zero lets the server infer them.
    pub fn send_query_params(&mut self, sql: &str, params: &[Param], result_format: PgFormat) -> Result<()> {
        self.send_start()?;
        check_nparams(params.len())?;
        verbose!(sql, nparams = params.len(), "send_query_params");
        let oids = params.iter().map(Param::oid).collect::<Vec<_>>();
        let stream = self.stream_mut()?;
        stream.send(frontend::Parse { prepare_name: UNNAMED, sql, oids: &oids });
        self.send_execute(UNNAMED, params, result_format)
    }

    /// Submit a request to create a named prepared statement.
    pub fn send_prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> Result<()> {
        self.send_start()?;
        check_nparams(param_types.len())?;
        verbose!(name, sql, "send_prepare");
        let stream = self.stream_mut()?;
        stream.send(frontend::Parse { prepare_name: name, sql, oids: param_types });
        stream.send(frontend::Sync);
        self.send_finish(QueryClass::Prepare)
    }

    /// Submit execution of a prepared statement.
    pub fn send_query_prepared(&mut self, name: &str, params: &[Param], result_format: PgFormat) -> Result<()> {
        self.send_start()?;
        check_nparams(params.len())?;
        verbose!(name, nparams = params.len(), "send_query_prepared");
        self.send_execute(name, params, result_format)
    }

    fn send_execute(&mut self, stmt_name: &str, params: &[Param], result_format: PgFormat) -> Result<()> {
        self.single_row = std::mem::take(&mut self.single_row_armed);
        let stream = self.stream_mut()?;
        stream.send(frontend::Bind {
            portal_name: UNNAMED,
            stmt_name,
            params,
            result_format,
        });
        stream.send(frontend::Describe { kind: b'P', name: UNNAMED });
        stream.send(frontend::Execute { portal_name: UNNAMED, max_row: 0 });
        stream.send(frontend::Sync);
        self.send_finish(QueryClass::Extended)
    }

    /// Submit a request to describe a prepared statement.
    pub fn send_describe_prepared(&mut self, name: &str) -> Result<()> {
        self.send_describe(b'S', name)
    }

    /// Submit a request to describe a portal.
    pub fn send_describe_portal(&mut self, name: &str) -> Result<()> {
        self.send_describe(b'P', name)
    }

    fn send_describe(&mut self, kind: u8, name: &str) -> Result<()> {
        self.send_start()?;
        let stream = self.stream_mut()?;
        stream.send(frontend::Describe { kind, name });
        stream.send(frontend::Sync);
        self.send_finish(QueryClass::Describe)
    }

    /// Submit a request to close a prepared statement.
    pub fn send_close_prepared(&mut self, name: &str) -> Result<()> {
        self.send_close(b'S', name)
    }

    /// Submit a request to close a portal.
    pub fn send_close_portal(&mut self, name: &str) -> Result<()> {
        self.send_close(b'P', name)
    }

    fn send_close(&mut self, variant: u8, name: &str) -> Result<()> {
        self.send_start()?;
        let stream = self.stream_mut()?;
        stream.send(frontend::Close { variant, name });
        stream.send(frontend::Sync);
        self.send_finish(QueryClass::Close)
    }

    /// Deliver rows of the next extended query one at a time.
    ///
    /// Must be called before [`send_query_params`][Connection::send_query_params]
    /// or [`send_query_prepared`][Connection::send_query_prepared]. Each row
    /// then arrive as [`ExecStatus::SingleTuple`][crate::ExecStatus::SingleTuple]
    /// result, followed by a zero row [`ExecStatus::TuplesOk`][crate::ExecStatus::TuplesOk].
    pub fn set_single_row_mode(&mut self) -> Result<()> {
        if !matches!(self.async_status, AsyncStatus::Idle) || !self.results.is_empty() {
            return Err(ErrorKind::CommandInProgress.into());
        }
        self.single_row_armed = true;
        Ok(())
    }
}
