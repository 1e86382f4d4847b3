use std::fmt;

/// Connection establishment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Socket is not yet requested.
    NeedsAddress,
    /// Waiting for the socket to connect.
    Connecting,
    /// `SSLRequest` sent, waiting for single byte answer.
    SslStartup,
    /// Startup message buffered, waiting to be written.
    SendingStartup,
    /// Waiting for authentication request or outcome.
    AwaitingResponse,
    /// Authenticated, waiting for backend startup.
    AuthOk,
    /// Receiving `ParameterStatus` and `BackendKeyData`.
    NegotiatingParameters,
    /// Connection is usable.
    Ready,
    /// Connection failed, `reset` to retry.
    Bad,
    /// Connection is closed by the user.
    Closed,
}

impl ConnStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub(crate) fn is_establishing(&self) -> bool {
        !matches!(self, Self::Ready | Self::Bad | Self::Closed)
    }
}

/// Transaction status as reported by the backend in `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    Idle,
    /// A command is in progress.
    Active,
    /// In a transaction block.
    InTrans,
    /// In a failed transaction block.
    InError,
    /// Connection is bad.
    Unknown,
}

impl TransactionStatus {
    pub(crate) fn from_indicator(indicator: u8) -> Self {
        match indicator {
            b'I' => Self::Idle,
            b'T' => Self::InTrans,
            b'E' => Self::InError,
            _ => Self::Unknown,
        }
    }
}

/// Outcome of a single non-blocking establishment step.
///
/// `Reading` and `Writing` tell which socket readiness the caller should
/// wait for before polling again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    Reading,
    Writing,
    Ok,
    Failed,
}

/// State of the command in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsyncStatus {
    /// No command in flight.
    #[default]
    Idle,
    /// Waiting for results of a command.
    Active,
    /// Server expect `CopyData` from client.
    CopyIn,
    /// Client reading `CopyData` from server.
    CopyOut,
    /// Both direction, used by replication.
    CopyBoth,
}

impl AsyncStatus {
    pub fn is_copy(&self) -> bool {
        matches!(self, Self::CopyIn | Self::CopyOut | Self::CopyBoth)
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NeedsAddress => "CONNECTION_NEEDED",
            Self::Connecting => "CONNECTION_STARTED",
            Self::SslStartup => "CONNECTION_SSL_STARTUP",
            Self::SendingStartup => "CONNECTION_MADE",
            Self::AwaitingResponse => "CONNECTION_AWAITING_RESPONSE",
            Self::AuthOk => "CONNECTION_AUTH_OK",
            Self::NegotiatingParameters => "CONNECTION_SETENV",
            Self::Ready => "CONNECTION_OK",
            Self::Bad => "CONNECTION_BAD",
            Self::Closed => "CONNECTION_CLOSED",
        };
        f.write_str(name)
    }
}
