//! Out-of-band query cancellation.
use std::future::poll_fn;

use crate::{
    Connection, Error, Result,
    common::verbose,
    error::ErrorKind,
    net::ConnectTarget,
    postgres::frontend::CancelRequest,
    stream::{PgStream, is_closed},
};

/// Handle to request cancellation of the command in flight on a connection.
///
/// The request is sent on a fresh connection, thus can be used from another
/// task while the original connection is waiting for results. Successful
/// delivery does not guarantee the command is canceled.
///
/// ```no_run
/// # async fn app(mut conn: pqwire::Connection) -> pqwire::Result<()> {
/// let token = conn.cancel_token().unwrap();
/// conn.send_query("SELECT pg_sleep(60)")?;
/// token.cancel().await?;
/// let result = conn.get_result().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CancelToken {
    target: ConnectTarget,
    process_id: u32,
    secret_key: u32,
}

impl CancelToken {
    pub async fn cancel(&self) -> Result<()> {
        verbose!(pid = self.process_id, "cancel request");

        let socket = self.target.clone().connect().await.map_err(cancel_failed)?;
        let mut stream = PgStream::new(socket);
        stream.send_cancel_request(CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        });
        stream.flush().await.map_err(cancel_failed)?;

        // the server closes the socket once the request is processed
        loop {
            match poll_fn(|cx| stream.poll_fill(cx)).await {
                Ok(()) => continue,
                Err(err) if is_closed(&err) => return Ok(()),
                Err(err) => return Err(cancel_failed(err)),
            }
        }
    }

    /// Process id of the target backend.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }
}

fn cancel_failed(err: std::io::Error) -> Error {
    ErrorKind::CancelFailed(err).into()
}

impl Connection {
    /// Create a [`CancelToken`], `None` if the backend did not send its key.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        let (process_id, secret_key) = self.backend_key?;
        Some(CancelToken {
            target: self.config.target(),
            process_id,
            secret_key,
        })
    }

    /// Request cancellation of the command in flight.
    pub async fn cancel(&self) -> Result<()> {
        match self.cancel_token() {
            Some(token) => token.cancel().await,
            None => Err(ErrorKind::ConnectionBad.into()),
        }
    }
}
