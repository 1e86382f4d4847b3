//! Fields of `ErrorResponse` and `NoticeResponse`.
//!
//! <https://www.postgresql.org/docs/current/protocol-error-fields.html>
use bytes::{Buf, Bytes};
use std::fmt;

use super::ProtocolError;
use crate::{common::ByteStr, ext::BytesExt};

/// Error or notice reported by the backend.
///
/// Fields are kept in the order the backend sent them, unrecognized field
/// codes are kept as well and can be read with [`DbError::field`].
#[derive(Clone, PartialEq, Eq)]
pub struct DbError {
    fields: Vec<(u8, ByteStr)>,
}

macro_rules! fields {
    ($(
        $(#[$doc:meta])* $konst:ident, $code:literal, $getter:ident;
    )*) => {
        impl DbError {
            $(
                $(#[$doc])*
                pub const $konst: u8 = $code;
            )*

            $(
                $(#[$doc])*
                pub fn $getter(&self) -> Option<&str> {
                    self.field($code)
                }
            )*
        }
    };
}

fields! {
    /// Severity, localized, e.g. `ERROR`, `FATAL`, `NOTICE`.
    SEVERITY, b'S', severity_localized;
    /// Severity, never localized.
    SEVERITY_NONLOCALIZED, b'V', severity_nonlocalized;
    /// The SQLSTATE code for the error.
    SQLSTATE, b'C', code_opt;
    /// The primary human-readable error message.
    MESSAGE, b'M', message_opt;
    /// An optional secondary error message carrying more detail about the problem.
    DETAIL, b'D', detail;
    /// An optional suggestion what to do about the problem.
    HINT, b'H', hint;
    /// Cursor position into the original query string, as decimal ASCII.
    POSITION, b'P', position_str;
    /// Cursor position into an internally generated command.
    INTERNAL_POSITION, b'p', internal_position_str;
    /// The text of a failed internally-generated command.
    INTERNAL_QUERY, b'q', internal_query;
    /// The context in which the error occurred.
    WHERE, b'W', where_;
    /// Schema name associated with the error.
    SCHEMA, b's', schema;
    /// Table name associated with the error.
    TABLE, b't', table;
    /// Column name associated with the error.
    COLUMN, b'c', column;
    /// Data type name associated with the error.
    DATATYPE, b'd', datatype;
    /// Constraint name associated with the error.
    CONSTRAINT, b'n', constraint;
    /// The file name of the source-code location where the error was reported.
    FILE, b'F', file;
    /// The line number of the source-code location where the error was reported.
    LINE, b'L', line;
    /// The name of the source-code routine reporting the error.
    ROUTINE, b'R', routine;
}

impl DbError {
    /// Parse the body of `ErrorResponse` or `NoticeResponse`.
    pub fn parse(msgtype: u8, mut body: Bytes) -> Result<DbError, ProtocolError> {
        let mut fields = vec![];

        loop {
            let Ok(code) = body.try_get_u8() else {
                return Err(ProtocolError::malformed(msgtype, "missing fields terminator"));
            };
            if code == b'\0' {
                break;
            }
            let value = body
                .get_nul_bytestr()
                .map_err(|reason| ProtocolError::malformed(msgtype, reason))?;
            fields.push((code, value));
        }

        Ok(DbError { fields })
    }

    /// Create an error which did not come from the backend.
    pub(crate) fn client(severity: &'static str, message: impl Into<String>) -> DbError {
        DbError {
            fields: vec![
                (Self::SEVERITY, ByteStr::from_static(severity)),
                (Self::SEVERITY_NONLOCALIZED, ByteStr::from_static(severity)),
                (Self::MESSAGE, ByteStr::from(message.into())),
            ],
        }
    }

    /// Returns the value of field with given code.
    pub fn field(&self, code: u8) -> Option<&str> {
        self.fields.iter().find(|(c, _)| *c == code).map(|(_, v)| v.as_str())
    }

    /// Iterate all field codes and values.
    pub fn fields(&self) -> impl Iterator<Item = (u8, &str)> {
        self.fields.iter().map(|(c, v)| (*c, v.as_str()))
    }

    /// Severity, defaults to `ERROR`.
    pub fn severity(&self) -> &str {
        self.severity_localized()
            .or(self.severity_nonlocalized())
            .unwrap_or("ERROR")
    }

    /// The SQLSTATE code, empty if not reported.
    pub fn code(&self) -> &str {
        self.code_opt().unwrap_or_default()
    }

    /// The primary message, empty if not reported.
    pub fn message(&self) -> &str {
        self.message_opt().unwrap_or_default()
    }

    /// Cursor position into the original query string, 1-based, in characters.
    pub fn position(&self) -> Option<u32> {
        self.position_str()?.parse().ok()
    }

    pub fn internal_position(&self) -> Option<u32> {
        self.internal_position_str()?.parse().ok()
    }

    /// Whether this is an error that terminates the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity_nonlocalized().unwrap_or(self.severity()), "FATAL" | "PANIC")
    }
}

impl std::error::Error for DbError { }

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:  {}", self.severity(), self.message())?;
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL:  {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT:  {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("DbError");
        f.field("severity", &self.severity());
        f.field("code", &self.code());
        f.field("message", &self.message());
        if let Some(detail) = self.detail() {
            f.field("detail", &detail);
        }
        if let Some(hint) = self.hint() {
            f.field("hint", &hint);
        }
        if let Some(position) = self.position() {
            f.field("position", &position);
        }
        f.finish()
    }
}
