//! Password and SASL authentication.
use md5::{Digest, Md5};
use std::{borrow::Cow, fmt, sync::Arc};

use super::Config;

/// Creates a [`SaslMechanism`] for one authentication exchange.
pub type SaslFactory = Arc<dyn Fn(&Config) -> Box<dyn SaslMechanism> + Send + Sync>;

/// A SASL mechanism driven by the connection during authentication.
pub trait SaslMechanism: Send {
    /// Mechanism name as advertised by the server.
    fn name(&self) -> &'static str;

    /// Initial client response, sent in `SASLInitialResponse`.
    fn client_first(&mut self) -> Vec<u8>;

    /// Respond to the server challenge from `AuthenticationSASLContinue`.
    fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, SaslError>;

    /// Verify the outcome from `AuthenticationSASLFinal`.
    fn verify(&mut self, server_final: &[u8]) -> Result<(), SaslError>;
}

/// Hash password as requested by `AuthenticationMD5Password`.
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Server requested authentication method which is not supported.
pub struct UnsupportedAuth {
    pub(crate) method: Cow<'static, str>,
}

impl UnsupportedAuth {
    pub(crate) fn new(method: impl Into<Cow<'static, str>>) -> Self {
        Self { method: method.into() }
    }

    /// The requested method name.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication method not supported: {}", self.method)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// SASL exchange failed.
pub struct SaslError {
    reason: Cow<'static, str>,
}

impl SaslError {
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for SaslError { }

impl fmt::Display for SaslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SASL authentication failed: {}", self.reason)
    }
}

impl fmt::Debug for SaslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_hash() {
        let mut hasher = Md5::new();
        hasher.update(b"secretalice");
        let inner = format!("{:x}", hasher.finalize());
        let mut hasher = Md5::new();
        hasher.update(inner.as_bytes());
        hasher.update([1, 2, 3, 4]);
        let expected = format!("md5{:x}", hasher.finalize());

        let hashed = md5_password("alice", "secret", [1, 2, 3, 4]);
        assert_eq!(hashed, expected);
        assert_eq!(hashed.len(), 35);
        assert!(hashed.starts_with("md5"));
    }

    #[test]
    fn md5_salt_matters() {
        let hashed = md5_password("postgres", "postgres", [0, 0, 0, 0]);
        assert_ne!(hashed, md5_password("postgres", "postgres", [0, 0, 0, 1]));
        assert!(hashed[3..].bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
