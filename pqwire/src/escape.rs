//! String escaping for SQL text.
//!
//! Prefer parameters over escaping, escaping is for building statements which
//! can not be parameterized, e.g. identifiers.
use crate::Connection;

/// Escape string for use within a single quoted SQL literal.
///
/// Single quotes are doubled, backslashes are doubled too when
/// `standard_conforming_strings` is off.
pub fn escape_string(value: &str, standard_conforming_strings: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if !standard_conforming_strings => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

/// Quote value as a SQL string literal, including the surrounding quotes.
///
/// Value containing backslash is written with `E''` syntax, which works
/// regardless of `standard_conforming_strings`.
pub fn escape_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 4);
    if has_backslash {
        out.push_str(" E");
    }
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Quote value as a SQL identifier, including the surrounding double quotes.
pub fn escape_identifier(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote a possibly qualified name, each part quoted with [`escape_identifier`].
///
/// ```
/// assert_eq!(pqwire::escape::quote_ident(&["public", "user"]), r#""public"."user""#);
/// ```
pub fn quote_ident(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|e| escape_identifier(e))
        .collect::<Vec<_>>()
        .join(".")
}

/// Encode binary data as `bytea` hex format text, e.g. `\x0a0b`.
pub fn escape_bytea(data: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("\\x");
    for byte in data {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0xf) as usize] as char);
    }
    out
}

/// Decode `bytea` text output, either hex format or escape format.
///
/// Malformed escape sequence are kept as is.
pub fn unescape_bytea(text: &[u8]) -> Vec<u8> {
    if let Some(hex) = text.strip_prefix(b"\\x") {
        let digits = hex.iter().filter_map(|e| (*e as char).to_digit(16)).collect::<Vec<_>>();
        return digits
            .chunks_exact(2)
            .map(|pair| (pair[0] * 16 + pair[1]) as u8)
            .collect();
    }

    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        match &text[i..] {
            [b'\\', b'\\', ..] => {
                out.push(b'\\');
                i += 2;
            },
            [b'\\', a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', ..] => {
                out.push((a - b'0') * 64 + (b - b'0') * 8 + (c - b'0'));
                i += 4;
            },
            [byte, ..] => {
                out.push(*byte);
                i += 1;
            },
            [] => break,
        }
    }
    out
}

/// Hash password in `md5` form accepted by `ALTER ROLE .. PASSWORD`.
pub fn encrypt_password(password: &str, user: &str) -> String {
    format!("md5{}", md5_hex(&[password.as_bytes(), user.as_bytes()].concat()))
}

fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    format!("{:x}", Md5::digest(data))
}

impl Connection {
    /// Escape string according to the connection `standard_conforming_strings`.
    pub fn escape_string(&self, value: &str) -> String {
        escape_string(value, self.standard_conforming_strings())
    }

    pub fn escape_literal(&self, value: &str) -> String {
        escape_literal(value)
    }

    pub fn escape_identifier(&self, value: &str) -> String {
        escape_identifier(value)
    }

    pub fn escape_bytea(&self, data: &[u8]) -> String {
        escape_bytea(data)
    }
}
