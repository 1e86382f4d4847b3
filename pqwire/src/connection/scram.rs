//! `SCRAM-SHA-256` SASL mechanism, without channel binding.
//!
//! <https://www.postgresql.org/docs/17/sasl-authentication.html>
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::mem;

use super::auth::{SaslError, SaslMechanism};

const NONCE_LENGTH: usize = 18;

/// `SCRAM-SHA-256` client state.
pub struct ScramSha256 {
    password: Vec<u8>,
    nonce: String,
    client_first_bare: String,
    state: State,
}

enum State {
    Initial,
    Continue {
        salted_password: [u8; 32],
        auth_message: String,
    },
    Done,
}

impl ScramSha256 {
    pub const NAME: &'static str = "SCRAM-SHA-256";

    /// Create new exchange with random nonce.
    pub fn new(password: &str) -> ScramSha256 {
        let mut raw = [0u8; NONCE_LENGTH];
        rand::rng().fill(&mut raw);
        Self::with_nonce(password, "", STANDARD.encode(raw))
    }

    /// Postgres ignores the SASL user name, the startup user is used instead.
    fn with_nonce(password: &str, user: &str, nonce: String) -> ScramSha256 {
        ScramSha256 {
            password: normalize(password),
            client_first_bare: format!("n={user},r={nonce}"),
            nonce,
            state: State::Initial,
        }
    }
}

impl SaslMechanism for ScramSha256 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn client_first(&mut self) -> Vec<u8> {
        // gs2 header without channel binding
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, SaslError> {
        if !matches!(self.state, State::Initial) {
            return Err(SaslError::new("unexpected SASL challenge"));
        }

        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| SaslError::new("server-first-message is not utf8"))?;

        let ServerFirst { nonce, salt, iterations } = ServerFirst::parse(server_first)?;

        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(SaslError::new("server nonce does not extend client nonce"));
        }

        let salt = STANDARD
            .decode(salt)
            .map_err(|_| SaslError::new("invalid salt encoding"))?;

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(client_key);

        // "biws" is base64 of "n,,"
        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof = client_key
            .iter()
            .zip(client_signature)
            .map(|(key, sig)| key ^ sig)
            .collect::<Vec<_>>();

        self.state = State::Continue { salted_password, auth_message };

        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)).into_bytes())
    }

    fn verify(&mut self, server_final: &[u8]) -> Result<(), SaslError> {
        let State::Continue { salted_password, auth_message } = mem::replace(&mut self.state, State::Done) else {
            return Err(SaslError::new("unexpected SASL outcome"));
        };

        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| SaslError::new("server-final-message is not utf8"))?;

        let attr = server_final.split(',').next().unwrap_or_default();

        if let Some(error) = attr.strip_prefix("e=") {
            return Err(SaslError::new(format!("server error: {error}")));
        }

        let Some(verifier) = attr.strip_prefix("v=") else {
            return Err(SaslError::new("missing server verifier"));
        };

        let signature = STANDARD
            .decode(verifier)
            .map_err(|_| SaslError::new("invalid server verifier encoding"))?;

        let server_key = hmac(&salted_password, b"Server Key");
        let mut mac = Hmac::<Sha256>::new_from_slice(&server_key)
            .expect("HMAC is able to accept all key sizes");
        mac.update(auth_message.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SaslError::new("server signature mismatch"))
    }
}

struct ServerFirst<'a> {
    nonce: &'a str,
    salt: &'a str,
    iterations: u32,
}

impl<'a> ServerFirst<'a> {
    fn parse(message: &'a str) -> Result<Self, SaslError> {
        let mut parts = message.split(',');

        let mut next = |key: &str| {
            parts
                .next()
                .and_then(|e| e.strip_prefix(key))
                .ok_or_else(|| SaslError::new(format!("invalid server-first-message, expected `{key}`")))
        };

        let nonce = next("r=")?;
        let salt = next("s=")?;
        let iterations = next("i=")?
            .parse()
            .ok()
            .filter(|e| *e > 0)
            .ok_or_else(|| SaslError::new("invalid iteration count"))?;

        Ok(Self { nonce, salt, iterations })
    }
}

/// Password is normalized with SASLprep, non-conforming password is used as is.
fn normalize(password: &str) -> Vec<u8> {
    match stringprep::saslprep(password) {
        Ok(password) => password.into_owned().into_bytes(),
        Err(_) => password.as_bytes().to_vec(),
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .expect("HMAC is able to accept all key sizes");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// PBKDF2 with HMAC-SHA-256, single block.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(password)
        .expect("HMAC is able to accept all key sizes");
    mac.update(salt);
    mac.update(&[0, 0, 0, 1]);
    let mut prev: [u8; 32] = mac.finalize().into_bytes().into();
    let mut hi = prev;

    for _ in 1..iterations {
        prev = hmac(password, &prev);
        for (hi, prev) in hi.iter_mut().zip(prev) {
            *hi ^= prev;
        }
    }

    hi
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 7677 section 3
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    fn scram() -> ScramSha256 {
        ScramSha256::with_nonce("pencil", "user", NONCE.to_owned())
    }

    #[test]
    fn rfc7677_exchange() {
        let mut scram = scram();
        assert_eq!(scram.client_first(), b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let client_final = scram.client_final(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(std::str::from_utf8(&client_final).unwrap(), CLIENT_FINAL);

        scram.verify(SERVER_FINAL.as_bytes()).unwrap();
    }

    #[test]
    fn reject_bad_signature() {
        let mut scram = scram();
        scram.client_final(SERVER_FIRST.as_bytes()).unwrap();
        let err = scram.verify(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert!(err.is_err());
    }

    #[test]
    fn reject_foreign_nonce() {
        let mut scram = scram();
        let err = scram.client_final(b"r=someoneelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096");
        assert!(err.is_err());
    }

    #[test]
    fn reject_server_error() {
        let mut scram = scram();
        scram.client_final(SERVER_FIRST.as_bytes()).unwrap();
        assert!(scram.verify(b"e=invalid-proof").is_err());
    }

    #[test]
    fn random_nonce() {
        let mut scram = ScramSha256::new("secret");
        let first = String::from_utf8(scram.client_first()).unwrap();
        let nonce = first.strip_prefix("n,,n=,r=").unwrap();
        assert_eq!(nonce.len(), 24);
    }
}
