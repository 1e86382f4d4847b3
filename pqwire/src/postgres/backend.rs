//! Postgres Backend Messages
//!
//! Every decoder validate the body length, a truncated body returns [`ProtocolError`]
//! instead of panicking.
use bytes::{Buf, Bytes};

use super::{DbError, Oid, PgFormat, ProtocolError};
use crate::{common::ByteStr, ext::BytesExt};

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError>;
}

/// Postgres backend messages
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    CopyBothResponse(CopyBothResponse),
    CopyData(CopyData),
    CopyDone(CopyDone),
    CopyInResponse(CopyInResponse),
    CopyOutResponse(CopyOutResponse),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyBothResponse,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE,$typ))
        }
    };
}

/// Read from body or bail with malformed message error.
macro_rules! get {
    ($body:ident.$method:ident()) => {
        $body.$method().map_err(|_|ProtocolError::malformed(Self::MSGTYPE, "body too short"))?
    };
    (nul $body:ident) => {
        $body.get_nul_bytestr().map_err(|reason|ProtocolError::malformed(Self::MSGTYPE, reason))?
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8;4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
    /// Specifies that SASL authentication is required.
    SASL {
        /// List of SASL authentication mechanisms, in the server's order of preference.
        mechanisms: Vec<ByteStr>,
    },
    /// Specifies that this message contains a SASL challenge.
    SASLContinue {
        /// SASL data, specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SASLFinal {
        /// SASL outcome "additional data", specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// A request code this client does not know, such as SCM credential (6).
    Unknown {
        code: u32,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Name of the method, for diagnostic.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::KerberosV5 => "KerberosV5",
            Self::CleartextPassword => "cleartext password",
            Self::MD5Password { .. } => "MD5 password",
            Self::GSS | Self::GSSContinue { .. } => "GSSAPI",
            Self::SSPI => "SSPI",
            Self::SASL { .. } | Self::SASLContinue { .. } | Self::SASLFinal { .. } => "SASL",
            Self::Unknown { .. } => "unknown",
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let auth = match get!(body.try_get_u32()) {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => Authentication::MD5Password { salt: get!(body.try_get_u32()).to_be_bytes(), },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => {
                let mut mechanisms = vec![];
                loop {
                    let name = get!(nul body);
                    if name.is_empty() {
                        break;
                    }
                    mechanisms.push(name);
                }
                Authentication::SASL { mechanisms }
            },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            code => Authentication::Unknown { code },
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: get!(body.try_get_u32()),
            secret_key: get!(body.try_get_u32()),
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: get!(nul body),
            value: get!(nul body),
        })
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse {
    pub notice: DbError,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { notice: DbError::parse(msgtype, body)? })
    }
}

/// Identifies the message as an error
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: DbError,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { error: DbError::parse(msgtype, body)? })
    }
}

/// Identifies the message as a notification response.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: u32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The “payload” string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: get!(body.try_get_u32()),
            channel: get!(nul body),
            payload: get!(nul body),
        })
    }
}

/// A single field in [`RowDescription`].
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table, the object ID of the table;
    /// otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table, the attribute number of the column;
    /// otherwise zero.
    pub column_id: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see pg_type.typlen). Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see pg_attribute.atttypmod). The meaning of the modifier is type-specific.
    pub type_modifier: i32,
    /// The format code being used for the field.
    ///
    /// In a RowDescription returned from the statement variant of Describe,
    /// the format code is not yet known and will always be zero.
    pub format: PgFormat,
}

/// Identifies the message as a row description
#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = get!(body.try_get_u16());
        let mut fields = Vec::with_capacity(len as usize);

        for _ in 0..len {
            let name = get!(nul body);
            let table_oid = get!(body.try_get_u32());
            let column_id = get!(body.try_get_i16());
            let type_oid = get!(body.try_get_u32());
            let type_size = get!(body.try_get_i16());
            let type_modifier = get!(body.try_get_i32());
            let Some(format) = PgFormat::from_code(get!(body.try_get_u16())) else {
                return Err(ProtocolError::malformed(Self::MSGTYPE, "unknown format code"));
            };
            fields.push(FieldDescription { name, table_oid, column_id, type_oid, type_size, type_modifier, format });
        }

        Ok(Self { fields })
    }
}

/// Identifies the message as a data row.
///
/// Values are sliced from the message body without copying, `None` is SQL NULL.
#[derive(Debug)]
pub struct DataRow {
    pub values: Vec<Option<Bytes>>,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = get!(body.try_get_u16());
        let mut values = Vec::with_capacity(len as usize);

        for _ in 0..len {
            // -1 indicates a NULL column value
            let size = get!(body.try_get_i32());
            if size == -1 {
                values.push(None);
                continue;
            }
            let Ok(size) = usize::try_from(size) else {
                return Err(ProtocolError::malformed(Self::MSGTYPE, "negative value length"));
            };
            if body.remaining() < size {
                return Err(ProtocolError::malformed(Self::MSGTYPE, "value exceeds body"));
            }
            values.push(Some(body.split_to(size)));
        }

        Ok(Self { values })
    }
}

/// Identifies the message as a command-completed response
///
/// For an INSERT command, the tag is INSERT oid rows, where rows is the number of rows inserted.
///
/// For a DELETE, UPDATE, MERGE, SELECT, MOVE, FETCH or COPY command, the tag is the command
/// name followed by the number of rows affected.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: get!(nul body),
        })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major protocol version requested by the client.
    pub minor: u32,
    /// Protocol options not recognized by the server.
    pub options: Vec<ByteStr>,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let minor = get!(body.try_get_u32());
        let len = get!(body.try_get_u32());
        let mut options = vec![];
        for _ in 0..len {
            options.push(get!(nul body));
        }
        Ok(Self { minor, options })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// Specifies the object ID of each parameter data type.
    pub oids: Vec<Oid>,
}

impl ParameterDescription  {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let len = get!(body.try_get_u16());
        let mut oids = Vec::with_capacity(len as usize);
        for _ in 0..len {
            oids.push(get!(body.try_get_u32()));
        }
        Ok(Self { oids })
    }
}

/// Identifies the message as the transaction status indicator.
///
/// ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    ///
    /// Possible values are 'I' if idle (not in a transaction block);
    /// 'T' if in a transaction block; or 'E' if in a failed transaction block
    /// (queries will be rejected until block is ended).
    pub tx_status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { tx_status: get!(body.try_get_u8()) })
    }
}

/// Identifies the message as COPY data.
#[derive(Debug)]
pub struct CopyData {
    /// Data that forms part of a COPY data stream.
    pub data: Bytes,
}

impl CopyData {
    pub const MSGTYPE: u8 = b'd';
}

impl BackendProtocol for CopyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { data: body })
    }
}

macro_rules! copy_response {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            /// Overall COPY format, textual or binary.
            pub format: PgFormat,
            /// The format codes to be used for each column.
            pub column_formats: Vec<PgFormat>,
        }

        impl $name {
            pub const MSGTYPE: u8 = $ty;
        }

        impl BackendProtocol for $name {
            fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
                assert_msgtype!(msgtype);
                let Some(format) = PgFormat::from_code(get!(body.try_get_u8()).into()) else {
                    return Err(ProtocolError::malformed(Self::MSGTYPE, "unknown format code"));
                };
                let len = get!(body.try_get_u16());
                let mut column_formats = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    let Some(format) = PgFormat::from_code(get!(body.try_get_u16())) else {
                        return Err(ProtocolError::malformed(Self::MSGTYPE, "unknown format code"));
                    };
                    column_formats.push(format);
                }
                Ok(Self { format, column_formats })
            }
        }
    )*};
}

copy_response! {
    /// Identifies the message as a Start Copy In response.
    ///
    /// The frontend must now send copy-in data.
    struct CopyInResponse, b'G';

    /// Identifies the message as a Start Copy Out response.
    ///
    /// This message will be followed by copy-out data.
    struct CopyOutResponse, b'H';

    /// Identifies the message as a Start Copy Both response.
    ///
    /// This message is used only for Streaming Replication.
    struct CopyBothResponse, b'W';
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    assert_msgtype!(msgtype);
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;

    fn decode(msgtype: u8, body: &[u8]) -> Result<BackendMessage, ProtocolError> {
        BackendMessage::decode(msgtype, Bytes::copy_from_slice(body))
    }

    #[test]
    fn data_row_null_and_empty() {
        let mut body = BytesMut::new();
        body.put_u16(3);
        body.put_i32(1);
        body.put_u8(b'1');
        body.put_i32(-1);
        body.put_i32(0);

        let Ok(BackendMessage::DataRow(row)) = decode(b'D', &body) else {
            panic!("expected DataRow")
        };
        assert_eq!(row.values.len(), 3);
        assert_eq!(row.values[0].as_deref(), Some(&b"1"[..]));
        assert_eq!(row.values[1], None);
        assert_eq!(row.values[2].as_deref(), Some(&b""[..]));
    }

    #[test]
    fn data_row_truncated() {
        let mut body = BytesMut::new();
        body.put_u16(1);
        body.put_i32(8);
        body.put_u8(b'1');
        assert!(decode(b'D', &body).is_err());
    }

    #[test]
    fn row_description() {
        let mut body = BytesMut::new();
        body.put_u16(1);
        body.put_slice(b"int4\0");
        body.put_u32(0);
        body.put_i16(0);
        body.put_u32(23);
        body.put_i16(4);
        body.put_i32(-1);
        body.put_u16(1);

        let Ok(BackendMessage::RowDescription(desc)) = decode(b'T', &body) else {
            panic!("expected RowDescription")
        };
        let field = &desc.fields[0];
        assert_eq!(field.name, "int4");
        assert_eq!(field.type_oid, 23);
        assert_eq!(field.type_size, 4);
        assert_eq!(field.type_modifier, -1);
        assert_eq!(field.format, PgFormat::Binary);
    }

    #[test]
    fn sasl_mechanisms() {
        let Ok(BackendMessage::Authentication(Authentication::SASL { mechanisms })) =
            decode(b'R', b"\0\0\0\x0aSCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0")
        else {
            panic!("expected SASL")
        };
        assert_eq!(mechanisms, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
    }

    #[test]
    fn md5_salt() {
        let Ok(BackendMessage::Authentication(Authentication::MD5Password { salt })) =
            decode(b'R', b"\0\0\0\x05\x01\x02\x03\x04")
        else {
            panic!("expected MD5Password")
        };
        assert_eq!(salt, [1, 2, 3, 4]);
    }

    #[test]
    fn copy_in_response() {
        let Ok(BackendMessage::CopyInResponse(copy)) = decode(b'G', b"\0\0\x02\0\0\0\0") else {
            panic!("expected CopyInResponse")
        };
        assert_eq!(copy.format, PgFormat::Text);
        assert_eq!(copy.column_formats, [PgFormat::Text, PgFormat::Text]);
    }

    #[test]
    fn notification() {
        let Ok(BackendMessage::NotificationResponse(n)) = decode(b'A', b"\0\0\0\x07jobs\0run\0") else {
            panic!("expected NotificationResponse")
        };
        assert_eq!(n.process_id, 7);
        assert_eq!(n.channel, "jobs");
        assert_eq!(n.payload, "run");
    }

    #[test]
    fn unknown_auth_code() {
        let Ok(BackendMessage::Authentication(Authentication::Unknown { code })) = decode(b'R', b"\0\0\0\x06")
        else {
            panic!("expected unknown authentication")
        };
        assert_eq!(code, 6);
    }

    #[test]
    fn invalid_utf8_string() {
        let err = decode(b'C', b"SELECT \xff\xfe\0").unwrap_err();
        assert!(err.to_string().contains("utf8"));
        assert!(decode(b'C', b"SELECT 1").is_err());
    }

    #[test]
    fn unknown_message() {
        assert!(decode(b'?', b"").is_err());
        assert_eq!(BackendMessage::message_name(b'Z'), "ReadyForQuery");
    }
}
