use bytes::Bytes;

use crate::{
    ext::BindParams,
    postgres::{INVALID_OID, Oid, PgFormat, PgType},
};

/// A bind parameter: value, type oid and format.
///
/// Text parameters are sent with unspecified type by default, letting the
/// server infer it from the statement.
///
/// ```
/// use pqwire::Param;
///
/// let params = [Param::from("alice"), Param::from(42i32), Param::null()];
/// assert!(params[2].is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    oid: Oid,
    value: Option<Bytes>,
    format: PgFormat,
}

impl Param {
    /// Text format value.
    pub fn text(value: impl Into<String>) -> Param {
        Param {
            oid: INVALID_OID,
            value: Some(Bytes::from(value.into())),
            format: PgFormat::Text,
        }
    }

    /// Binary format value, encoded by the caller.
    pub fn binary(value: impl Into<Bytes>) -> Param {
        Param {
            oid: INVALID_OID,
            value: Some(value.into()),
            format: PgFormat::Binary,
        }
    }

    /// SQL `NULL`.
    pub fn null() -> Param {
        Param {
            oid: INVALID_OID,
            value: None,
            format: PgFormat::Text,
        }
    }

    /// Specify the parameter type, zero leave it to the server.
    pub fn with_type(mut self, oid: Oid) -> Param {
        self.oid = oid;
        self
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

impl BindParams for Param {
    fn format(&self) -> PgFormat {
        self.format
    }

    fn size(&self) -> i32 {
        match &self.value {
            Some(value) => value.len() as i32,
            None => -1,
        }
    }

    fn value(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::text(value)
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::text(value)
    }
}

impl From<&[u8]> for Param {
    fn from(value: &[u8]) -> Self {
        Param::binary(Bytes::copy_from_slice(value)).with_type(<[u8]>::OID)
    }
}

impl From<Vec<u8>> for Param {
    fn from(value: Vec<u8>) -> Self {
        Param::binary(value).with_type(<[u8]>::OID)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Param::null)
    }
}

macro_rules! binary_param {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Param {
            fn from(value: $ty) -> Self {
                Param::binary(Bytes::copy_from_slice(&value.to_be_bytes())).with_type(<$ty>::OID)
            }
        }
    )*};
}

binary_param!(i16, i32, i64, f32, f64);

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::binary(Bytes::copy_from_slice(&[value as u8])).with_type(bool::OID)
    }
}
