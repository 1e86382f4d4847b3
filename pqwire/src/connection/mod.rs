//! Postgres Connection
//!
//! A [`Connection`] is established either at once with [`Connection::connect`],
//! or step by step with [`Connection::connect_start`] and
//! [`Connection::connect_poll`].
use std::collections::{HashMap, VecDeque};

use crate::{
    Error, Result,
    common::{ByteStr, verbose},
    error::ErrorKind,
    net::ConnectFuture,
    notify::{NoticeHandler, Notification, default_notice_handler},
    postgres::{DbError, frontend},
    query::QueryClass,
    result::{PgResult, ResultBuilder},
    stream::PgStream,
};

mod config;
mod status;
mod auth;
mod scram;
mod startup;

pub use config::{Config, ConnOption, ParseError, SslMode, CONNECT_ARGUMENT_ORDER, conndefaults, quote_connstr};
pub use status::{AsyncStatus, ConnStatus, PollingStatus, TransactionStatus};
pub use auth::{SaslError, SaslFactory, SaslMechanism, UnsupportedAuth, md5_password};
pub use scram::ScramSha256;
pub use startup::ConnectError;

/// Postgres connection.
///
/// At most one command is in flight at a time. Results are retrieved with
/// [`get_result`][Connection::get_result] in the order the backend produce them.
pub struct Connection {
    pub(crate) config: Config,
    pub(crate) stream: Option<PgStream>,
    pub(crate) status: ConnStatus,
    connecting: Option<ConnectFuture>,
    sasl: Option<Box<dyn SaslMechanism>>,

    pub(crate) params: HashMap<ByteStr, ByteStr>,
    pub(crate) backend_key: Option<(u32, u32)>,
    pub(crate) tx_indicator: u8,
    pub(crate) error_message: String,
    /// Error waiting to be returned by the next result retrieval.
    pub(crate) pending_error: Option<Error>,

    pub(crate) async_status: AsyncStatus,
    pub(crate) query_class: QueryClass,
    pub(crate) results: VecDeque<PgResult>,
    pub(crate) builder: Option<ResultBuilder>,
    pub(crate) nonblocking: bool,
    pub(crate) single_row_armed: bool,
    pub(crate) single_row: bool,
    /// `ROLLBACK` of a dropped transaction, sent once the command in flight completes.
    pub(crate) rollback_pending: bool,

    pub(crate) notice_handler: NoticeHandler,
    pub(crate) notifies: VecDeque<Notification>,

    password_needed: bool,
    password_used: bool,
}

impl Connection {
    fn new(config: Config) -> Connection {
        Connection {
            config,
            stream: None,
            status: ConnStatus::NeedsAddress,
            connecting: None,
            sasl: None,
            params: HashMap::new(),
            backend_key: None,
            tx_indicator: b'I',
            error_message: String::new(),
            pending_error: None,
            async_status: AsyncStatus::Idle,
            query_class: QueryClass::Simple,
            results: VecDeque::new(),
            builder: None,
            nonblocking: false,
            single_row_armed: false,
            single_row: false,
            rollback_pending: false,
            notice_handler: Box::new(default_notice_handler),
            notifies: VecDeque::new(),
            password_needed: false,
            password_used: false,
        }
    }

    /// Clear session state, keeping config, notice handler and nonblocking flag.
    fn clear_session(&mut self) {
        self.stream = None;
        self.connecting = None;
        self.sasl = None;
        self.params.clear();
        self.backend_key = None;
        self.tx_indicator = b'I';
        self.error_message.clear();
        self.pending_error = None;
        self.async_status = AsyncStatus::Idle;
        self.query_class = QueryClass::Simple;
        self.results.clear();
        self.builder = None;
        self.single_row_armed = false;
        self.single_row = false;
        self.rollback_pending = false;
        self.notifies.clear();
        self.password_needed = false;
        self.password_used = false;
    }

    pub(crate) fn stream_mut(&mut self) -> Result<&mut PgStream> {
        match self.stream.as_mut() {
            Some(stream) if self.status.is_ok() => Ok(stream),
            _ => Err(ErrorKind::ConnectionBad.into()),
        }
    }

    /// Mark connection as bad, returns the error back.
    ///
    /// Any failure of the transport or the protocol is fatal.
    pub(crate) fn fail(&mut self, err: impl Into<Error>) -> Error {
        let err = err.into();
        crate::common::log_warn!("connection failed: {}", err.kind());
        self.error_message = err.kind().to_string();
        self.status = ConnStatus::Bad;
        self.async_status = AsyncStatus::Idle;
        self.stream = None;
        self.connecting = None;
        self.builder = None;
        err
    }

    /// Mark connection as bad, the error is returned by next result retrieval.
    pub(crate) fn fail_later(&mut self, err: impl Into<Error>) {
        let err = self.fail(err);
        self.pending_error = Some(err);
    }

    pub(crate) fn take_error(&mut self) -> Error {
        self.pending_error
            .take()
            .unwrap_or_else(|| ErrorKind::ConnectionBad.into())
    }

    /// Close the connection.
    ///
    /// `Terminate` is sent if the connection is usable, afterward every
    /// operation returns [`ErrorKind::ConnectionBad`].
    pub async fn close(&mut self) -> Result<()> {
        let result = match (self.status, self.stream.as_mut()) {
            (ConnStatus::Ready, Some(stream)) => {
                stream.send(frontend::Terminate);
                stream.flush().await.map_err(Error::from)
            },
            _ => Ok(()),
        };
        self.clear_session();
        self.status = ConnStatus::Closed;
        verbose!("connection closed");
        result
    }

    /// Whether [`close`][Connection::close] is called.
    pub fn is_closed(&self) -> bool {
        matches!(self.status, ConnStatus::Closed)
    }

    pub fn status(&self) -> ConnStatus {
        self.status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current transaction status.
    ///
    /// [`TransactionStatus::Active`] is returned while a command is in flight.
    pub fn transaction_status(&self) -> TransactionStatus {
        if !self.status.is_ok() {
            return TransactionStatus::Unknown;
        }
        if !matches!(self.async_status, AsyncStatus::Idle) {
            return TransactionStatus::Active;
        }
        TransactionStatus::from_indicator(self.tx_indicator)
    }

    /// Server parameter reported by `ParameterStatus`, e.g. `server_version`.
    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(ByteStr::as_str)
    }

    /// Every server parameter reported so far.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Message of the most recent failure, empty if none.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Process id of the backend serving this connection.
    pub fn backend_pid(&self) -> Option<u32> {
        self.backend_key.map(|(pid, _)| pid)
    }

    /// Frontend/backend protocol major version, zero if not connected.
    pub fn protocol_version(&self) -> u32 {
        match self.status {
            ConnStatus::Ready => 3,
            _ => 0,
        }
    }

    /// Server version as integer, e.g. `160002` for `16.2`, zero if unknown.
    pub fn server_version(&self) -> u32 {
        self.parameter_status("server_version")
            .map(parse_server_version)
            .unwrap_or(0)
    }

    /// Client encoding name, `SQL_ASCII` if the server never reported one.
    pub fn client_encoding(&self) -> &str {
        self.parameter_status("client_encoding").unwrap_or("SQL_ASCII")
    }

    /// Whether `standard_conforming_strings` is on, affecting string escaping.
    pub fn standard_conforming_strings(&self) -> bool {
        self.parameter_status("standard_conforming_strings") != Some("off")
    }

    /// Server asked for a password but none is configured.
    pub fn connection_needs_password(&self) -> bool {
        self.password_needed
    }

    /// A password is sent during authentication.
    pub fn connection_used_password(&self) -> bool {
        self.password_used
    }

    pub fn dbname(&self) -> &str {
        self.config.dbname()
    }

    pub fn user(&self) -> &str {
        self.config.user()
    }

    pub fn password(&self) -> Option<&str> {
        self.config.password()
    }

    pub fn host(&self) -> &str {
        self.config.host()
    }

    pub fn port(&self) -> u16 {
        self.config.port()
    }

    pub fn options(&self) -> Option<&str> {
        self.config.options()
    }

    /// Whether the connection is in nonblocking mode.
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// In nonblocking mode, [`put_copy_data`][Connection::put_copy_data]
    /// never wait for the socket and report a full buffer instead.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking;
    }

    /// Replace the notice handler, returning the previous one.
    pub fn set_notice_handler<F>(&mut self, handler: F) -> NoticeHandler
    where
        F: FnMut(&DbError) + Send + 'static,
    {
        std::mem::replace(&mut self.notice_handler, Box::new(handler))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let (ConnStatus::Ready, Some(stream)) = (self.status, self.stream.as_mut()) {
            stream.send(frontend::Terminate);
            let _ = stream.try_flush();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("status", &self.status)
            .field("async_status", &self.async_status)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// `"16.2"` to `160002`, `"9.6.24"` to `90624`.
fn parse_server_version(version: &str) -> u32 {
    let numeric = version
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .next()
        .unwrap_or_default();

    let mut parts = numeric.split('.').map(|e| e.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);

    let version = major.saturating_mul(10000);
    match major >= 10 {
        true => version.saturating_add(minor),
        false => version.saturating_add(minor.saturating_mul(100)).saturating_add(patch),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_version() {
        assert_eq!(parse_server_version("16.2"), 160002);
        assert_eq!(parse_server_version("17beta1"), 170000);
        assert_eq!(parse_server_version("9.6.24"), 90624);
        assert_eq!(parse_server_version("15.4 (Debian 15.4-1.pgdg120+1)"), 150004);
        assert_eq!(parse_server_version(""), 0);
        assert_eq!(parse_server_version("4294967295.1"), u32::MAX);
    }

    #[test]
    fn unconnected_state() {
        let conn = Connection::connect_start(Config::new());
        assert_eq!(conn.status(), ConnStatus::NeedsAddress);
        assert_eq!(conn.transaction_status(), TransactionStatus::Unknown);
        assert_eq!(conn.protocol_version(), 0);
        assert_eq!(conn.server_version(), 0);
        assert_eq!(conn.client_encoding(), "SQL_ASCII");
        assert_eq!(conn.dbname(), "postgres");
    }
}
