use std::{env::var, future::poll_fn, task::Poll};
use pqwire::{Config, ConnStatus, Connection, PollingStatus, Result};

pub async fn main() -> Result<()> {

    let mut conn = Connection::connect(&var("DATABASE_URL").unwrap()).await?;
    conn.exec("SELECT 1").await?;
    conn.close().await?;

    let mut conn = Connection::connect_env().await?;
    tracing::info!(
        pid = conn.backend_pid(),
        server_version = conn.server_version(),
        encoding = conn.client_encoding(),
        "connected"
    );
    conn.close().await?;

    // step by step
    let mut conn = Connection::connect_start(Config::from_env());
    let status = poll_fn(|cx| match conn.connect_poll(cx) {
        PollingStatus::Reading | PollingStatus::Writing => Poll::Pending,
        status => Poll::Ready(status),
    })
    .await;
    assert_eq!(status, PollingStatus::Ok, "{}", conn.error_message());

    conn.reset().await?;
    assert_eq!(conn.status(), ConnStatus::Ready);
    conn.close().await?;

    Ok(())
}
