use std::time::Duration;
use pqwire::{Connection, ExecStatus, Result};

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;
    let token = conn.cancel_token().unwrap();

    conn.send_query("SELECT pg_sleep(30)")?;

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel().await
    });

    let res = conn.get_result().await?.unwrap();
    assert_eq!(res.status(), ExecStatus::FatalError);
    tracing::info!(code = res.error_field(b'C'), "canceled");
    while conn.get_result().await?.is_some() { }

    // notification to self
    conn.exec("LISTEN pqwire").await?;
    conn.exec("NOTIFY pqwire, 'hello'").await?;
    let notify = conn.wait_for_notify(Some(Duration::from_secs(1))).await?.unwrap();
    assert_eq!(notify.payload, "hello");

    conn.close().await
}
