//! Connection establishment.
//!
//! ```text
//! NeedsAddress -> Connecting -> [SslStartup] -> SendingStartup -> AwaitingResponse
//!     -> AuthOk -> NegotiatingParameters -> Ready
//! ```
//!
//! Any failure leads to `Bad`.
use std::{
    borrow::Cow,
    fmt,
    future::poll_fn,
    task::{Context, Poll},
};

use super::{
    Config, Connection, SslMode,
    auth::{SaslMechanism, UnsupportedAuth, md5_password},
    scram::ScramSha256,
    status::{ConnStatus, PollingStatus},
};
use crate::{
    Result,
    common::{log_warn, span, verbose},
    postgres::{
        BackendMessage, BackendProtocol, ProtocolError,
        backend::Authentication,
        frontend::{PasswordMessage, SaslInitialResponse, SaslResponse},
    },
    result::PgResult,
    stream::PgStream,
};

impl Connection {
    /// Connect with config parsed from url or conninfo string.
    pub async fn connect(url: &str) -> Result<Connection> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect with config from environment variable.
    ///
    /// See [`Config::from_env`] for variables read.
    pub async fn connect_env() -> Result<Connection> {
        Self::connect_with(Config::from_env()).await
    }

    /// Connect with given config.
    pub async fn connect_with(config: Config) -> Result<Connection> {
        let mut conn = Self::connect_start(config);
        conn.establish().await?;
        Ok(conn)
    }

    /// Begin non-blocking connection establishment.
    ///
    /// No I/O is performed until [`connect_poll`][Connection::connect_poll] is called.
    pub fn connect_start(config: Config) -> Connection {
        Connection::new(config)
    }

    /// Advance connection establishment.
    ///
    /// Returns [`PollingStatus::Reading`] or [`PollingStatus::Writing`] when the
    /// socket is not ready, the waker in `cx` is registered for it.
    ///
    /// On [`PollingStatus::Failed`], the reason is in [`error_message`][Connection::error_message].
    pub fn connect_poll(&mut self, cx: &mut Context) -> PollingStatus {
        match self.poll_establish(cx) {
            Ok(status) => status,
            Err(err) => {
                self.fail_later(err);
                PollingStatus::Failed
            },
        }
    }

    /// Close the transport and establish it again with the same config.
    pub async fn reset(&mut self) -> Result<()> {
        self.reset_start();
        self.establish().await
    }

    /// Begin non-blocking reset, poll with [`reset_poll`][Connection::reset_poll].
    pub fn reset_start(&mut self) {
        if let (ConnStatus::Ready, Some(stream)) = (self.status, self.stream.as_mut()) {
            stream.send(crate::postgres::frontend::Terminate);
            let _ = stream.try_flush();
        }
        self.clear_session();
        self.status = ConnStatus::NeedsAddress;
    }

    /// Advance non-blocking reset, same as [`connect_poll`][Connection::connect_poll].
    pub fn reset_poll(&mut self, cx: &mut Context) -> PollingStatus {
        self.connect_poll(cx)
    }

    async fn establish(&mut self) -> Result<()> {
        let timeout = self.config.connect_timeout;
        let ready = poll_fn(|cx| match self.connect_poll(cx) {
            PollingStatus::Ok => Poll::Ready(true),
            PollingStatus::Failed => Poll::Ready(false),
            PollingStatus::Reading | PollingStatus::Writing => Poll::Pending,
        });

        let ready = match timeout {
            #[cfg(feature = "tokio")]
            Some(timeout) => tokio::time::timeout(timeout, ready).await.ok(),
            _ => Some(ready.await),
        };

        let err = match ready {
            Some(true) => return Ok(()),
            Some(false) => self.take_error(),
            None => self.fail(ConnectError::new("timeout expired")),
        };
        Err(err.with_context(format!("connect to {}", self.config.target())))
    }

    fn poll_establish(&mut self, cx: &mut Context) -> Result<PollingStatus> {
        span!("establish");
        loop {
            match self.status {
                ConnStatus::Ready => return Ok(PollingStatus::Ok),
                ConnStatus::Bad | ConnStatus::Closed => return Ok(PollingStatus::Failed),
                ConnStatus::NeedsAddress => {
                    let target = self.config.target();
                    verbose!(%target, "connecting");
                    self.connecting = Some(target.connect_boxed());
                    self.status = ConnStatus::Connecting;
                },
                ConnStatus::Connecting => {
                    let Some(connecting) = self.connecting.as_mut() else {
                        return Err(ConnectError::new("connect requested without address").into());
                    };
                    let socket = match connecting.as_mut().poll(cx) {
                        Poll::Ready(Ok(socket)) => socket,
                        Poll::Ready(Err(err)) => {
                            let target = self.config.target();
                            return Err(ConnectError::new(format!(
                                "could not connect to server at \"{target}\": {err}"
                            )).into());
                        },
                        Poll::Pending => return Ok(PollingStatus::Writing),
                    };
                    self.connecting = None;

                    let mut stream = PgStream::new(socket);
                    match self.config.sslmode {
                        SslMode::Disable => {
                            stream.send_startup(self.config.startup());
                            self.status = ConnStatus::SendingStartup;
                        },
                        SslMode::Prefer | SslMode::Require => {
                            stream.send_ssl_request();
                            self.status = ConnStatus::SslStartup;
                        },
                    }
                    self.stream = Some(stream);
                },
                ConnStatus::SslStartup => {
                    let stream = self.establishing_stream()?;
                    if stream.poll_flush(cx)?.is_pending() {
                        return Ok(PollingStatus::Writing);
                    }
                    let Some(answer) = stream.take_byte() else {
                        if stream.poll_fill(cx)?.is_pending() {
                            return Ok(PollingStatus::Reading);
                        }
                        continue;
                    };
                    match answer {
                        b'S' => {
                            return Err(ConnectError::new("server accepted SSL, but TLS is not supported").into());
                        },
                        b'N' if matches!(self.config.sslmode, SslMode::Require) => {
                            return Err(ConnectError::new("server does not support SSL, but SSL was required").into());
                        },
                        b'N' => {
                            let startup = self.config.startup();
                            let Some(stream) = self.stream.as_mut() else {
                                return Err(ConnectError::new("connection lost").into());
                            };
                            stream.send_startup(startup);
                            self.status = ConnStatus::SendingStartup;
                        },
                        // pre 7.0 server would answer with ErrorResponse
                        b'E' => return Err(ConnectError::new("server rejected SSL negotiation").into()),
                        found => return Err(ProtocolError::unexpected_phase(found, "ssl negotiation").into()),
                    }
                },
                ConnStatus::SendingStartup => {
                    if self.establishing_stream()?.poll_flush(cx)?.is_pending() {
                        return Ok(PollingStatus::Writing);
                    }
                    self.status = ConnStatus::AwaitingResponse;
                },
                ConnStatus::AwaitingResponse => {
                    let Some((msgtype, body)) = self.poll_startup_frame(cx)? else {
                        return Ok(self.waiting_for());
                    };
                    match BackendMessage::decode(msgtype, body)? {
                        BackendMessage::Authentication(auth) => self.authenticate(auth)?,
                        BackendMessage::ErrorResponse(err) => return Err(PgResult::error(err.error).into()),
                        BackendMessage::NoticeResponse(notice) => (self.notice_handler)(&notice.notice),
                        BackendMessage::NegotiateProtocolVersion(_nego) => {
                            log_warn!("server does not support protocol extensions: {:?}", _nego.options);
                        },
                        msg => return Err(ProtocolError::unexpected_phase(msg.msgtype(), "authentication").into()),
                    }
                },
                ConnStatus::AuthOk => {
                    self.sasl = None;
                    self.status = ConnStatus::NegotiatingParameters;
                },
                ConnStatus::NegotiatingParameters => {
                    let Some((msgtype, body)) = self.poll_startup_frame(cx)? else {
                        return Ok(self.waiting_for());
                    };
                    match BackendMessage::decode(msgtype, body)? {
                        BackendMessage::ParameterStatus(param) => {
                            self.params.insert(param.name, param.value);
                        },
                        BackendMessage::BackendKeyData(key) => {
                            self.backend_key = Some((key.process_id, key.secret_key));
                        },
                        BackendMessage::ReadyForQuery(ready) => {
                            self.tx_indicator = ready.tx_status;
                            self.status = ConnStatus::Ready;
                            verbose!(pid = self.backend_pid(), "connection ready");
                        },
                        BackendMessage::ErrorResponse(err) => return Err(PgResult::error(err.error).into()),
                        BackendMessage::NoticeResponse(notice) => (self.notice_handler)(&notice.notice),
                        BackendMessage::NegotiateProtocolVersion(_) => {},
                        msg => return Err(ProtocolError::unexpected_phase(msg.msgtype(), "startup").into()),
                    }
                },
            }
        }
    }

    fn establishing_stream(&mut self) -> Result<&mut PgStream> {
        match self.stream.as_mut() {
            Some(stream) if self.status.is_establishing() => Ok(stream),
            _ => Err(ConnectError::new("connection lost").into()),
        }
    }

    /// Flush pending responses and read the next frame, `None` if the socket is not ready.
    fn poll_startup_frame(&mut self, cx: &mut Context) -> Result<Option<(u8, bytes::Bytes)>> {
        let stream = self.establishing_stream()?;
        if stream.poll_flush(cx)?.is_pending() {
            return Ok(None);
        }
        loop {
            if let Some(frame) = stream.next_frame()? {
                return Ok(Some(frame));
            }
            if stream.poll_fill(cx)?.is_pending() {
                return Ok(None);
            }
        }
    }

    fn waiting_for(&self) -> PollingStatus {
        match self.stream.as_ref().map(PgStream::pending_write) {
            Some(1..) => PollingStatus::Writing,
            _ => PollingStatus::Reading,
        }
    }

    fn authenticate(&mut self, auth: Authentication) -> Result<()> {
        verbose!(method = auth.method_name(), "authentication request");

        match auth {
            Authentication::Ok => {
                self.status = ConnStatus::AuthOk;
            },
            Authentication::CleartextPassword => {
                let password = self.require_password()?;
                self.send_auth(PasswordMessage { password: &password })?;
            },
            Authentication::MD5Password { salt } => {
                let password = self.require_password()?;
                let hashed = md5_password(self.config.user(), &password, salt);
                self.send_auth(PasswordMessage { password: &hashed })?;
            },
            Authentication::SASL { mechanisms } => {
                let registered = mechanisms.iter().find_map(|e| self.config.sasl_factory(e.as_str()));
                let mut mechanism: Box<dyn SaslMechanism> = match registered {
                    Some(factory) => factory(&self.config),
                    None if mechanisms.iter().any(|e| e == ScramSha256::NAME) => {
                        let password = self.require_password()?;
                        Box::new(ScramSha256::new(&password))
                    },
                    None => {
                        let offered = mechanisms.iter().map(|e| e.as_str()).collect::<Vec<_>>().join(", ");
                        return Err(UnsupportedAuth::new(format!("SASL ({offered})")).into());
                    },
                };
                let data = mechanism.client_first();
                self.send_auth(SaslInitialResponse { mechanism: mechanism.name(), data: &data })?;
                self.sasl = Some(mechanism);
            },
            Authentication::SASLContinue { data } => {
                let Some(mechanism) = self.sasl.as_mut() else {
                    return Err(ProtocolError::unexpected_phase(Authentication::MSGTYPE, "SASL continue without initial response").into());
                };
                let data = mechanism.client_final(&data)?;
                self.send_auth(SaslResponse { data: &data })?;
            },
            Authentication::SASLFinal { data } => {
                let Some(mechanism) = self.sasl.as_mut() else {
                    return Err(ProtocolError::unexpected_phase(Authentication::MSGTYPE, "SASL final without initial response").into());
                };
                mechanism.verify(&data)?;
            },
            auth @ (Authentication::KerberosV5
            | Authentication::GSS
            | Authentication::GSSContinue { .. }
            | Authentication::SSPI) => {
                return Err(UnsupportedAuth::new(auth.method_name()).into());
            },
            Authentication::Unknown { code } => {
                return Err(UnsupportedAuth::new(format!("method {code}")).into());
            },
        }

        Ok(())
    }

    fn require_password(&mut self) -> Result<String> {
        match self.config.password() {
            Some(password) => {
                self.password_used = true;
                Ok(password.to_owned())
            },
            None => {
                self.password_needed = true;
                Err(ConnectError::new("password is required but none is supplied").into())
            },
        }
    }

    fn send_auth<F: crate::postgres::FrontendProtocol>(&mut self, message: F) -> Result<()> {
        self.establishing_stream()?.send(message);
        Ok(())
    }
}

/// Connection could not be established.
pub struct ConnectError {
    reason: Cow<'static, str>,
}

impl ConnectError {
    pub(crate) fn new(reason: impl Into<Cow<'static, str>>) -> ConnectError {
        ConnectError { reason: reason.into() }
    }
}

impl std::error::Error for ConnectError { }

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl fmt::Debug for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
