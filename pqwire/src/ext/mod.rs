use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, postgres::PgFormat};

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// length is usize in rust, while sometime postgres want u32,
    /// this will panic when overflow instead of wrapping
    fn to_u32(self) -> u32;
    /// length is usize in rust, while sometime postgres want u16,
    /// this will panic when overflow instead of wrapping
    fn to_u16(self) -> u16;
}

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

pub trait StrExt {
    /// postgres String must be nul terminated
    fn nul_string_len(&self) -> u32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1/* nul */
    }
}

pub trait BufMutExt {
    /// postgres String must be nul terminated
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

pub trait BytesExt: Sized {
    /// Split a nul terminated string, returns `None` if no terminator found.
    fn get_nul_bytes(&mut self) -> Option<Self>;

    /// Split a nul terminated utf8 string.
    ///
    /// The error is the reason the string is malformed.
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, &'static str>;
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self) -> Option<Self> {
        let end = self.iter().position(|e| matches!(e, b'\0'))?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Some(me)
    }

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, &'static str> {
        let bytes = self.get_nul_bytes().ok_or("string not nul terminated")?;
        ByteStr::from_utf8(bytes).map_err(|_| "string is not valid utf8")
    }
}

/// A bind parameter as written in the `Bind` message.
pub trait BindParams {
    /// The format of the value.
    fn format(&self) -> PgFormat;

    /// The length of the parameter value, in bytes (this count does not include itself).
    ///
    /// Can be zero. As a special case, -1 indicates a NULL parameter value.
    /// No value bytes follow in the NULL case.
    fn size(&self) -> i32;

    /// The value bytes, empty for NULL.
    fn value(&self) -> &[u8];
}
