//! `pqwire` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    connection::{ConnectError, ParseError, SaslError, UnsupportedAuth},
    postgres::{DbError, ProtocolError},
    result::PgResult,
};

/// A specialized [`Result`] type for `pqwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pqwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The operation which produced this error, may be empty.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub(crate) fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// The failed result, if this error is reported by the server while executing a command.
    pub fn result(&self) -> Option<&PgResult> {
        match &self.kind {
            ErrorKind::Database(result) => Some(result),
            _ => None,
        }
    }

    /// The server reported error fields, if any.
    pub fn db_error(&self) -> Option<&DbError> {
        match &self.kind {
            ErrorKind::Database(result) => result.db_error(),
            _ => None,
        }
    }
}

/// All possible error kind from `pqwire` library.
pub enum ErrorKind {
    /// Invalid connection parameter.
    Config(ParseError),
    /// Connection could not be established.
    Connect(ConnectError),
    /// Server requested authentication method which is not supported.
    UnsupportedAuth(UnsupportedAuth),
    /// SASL exchange failed.
    Sasl(SaslError),
    /// Malformed or unexpected message, the connection is now bad.
    Protocol(ProtocolError),
    /// Server reported an error while executing a command.
    Database(Box<PgResult>),
    /// Another command is already in flight.
    CommandInProgress,
    /// Connection is in COPY state.
    CopyInProgress,
    /// COPY operation requested outside COPY state.
    NotInCopy,
    /// More parameters than a message can carry, nothing was sent.
    TooManyParams(usize),
    /// Connection is closed or bad, `reset` it first.
    ConnectionBad,
    /// Transport failure, the connection is now bad.
    Io(io::Error),
    /// Cancel request could not be delivered.
    CancelFailed(io::Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ConnectError>e => ErrorKind::Connect(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<SaslError>e => ErrorKind::Sasl(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<std::io::Error>e => ErrorKind::Io(e));
from!(<PgResult>e => ErrorKind::Database(Box::new(e)));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Connect(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Sasl(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Database(e) => f.write_str(e.error_message()),
            Self::CommandInProgress => f.write_str("another command is already in progress"),
            Self::CopyInProgress => f.write_str("COPY is in progress"),
            Self::NotInCopy => f.write_str("no COPY in progress"),
            Self::TooManyParams(n) => write!(f, "number of parameters must be at most {}, got {n}", u16::MAX),
            Self::ConnectionBad => f.write_str("connection is closed or bad"),
            Self::Io(e) => e.fmt(f),
            Self::CancelFailed(e) => write!(f, "could not send cancel request: {e}"),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
