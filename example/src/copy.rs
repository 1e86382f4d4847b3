use futures::StreamExt;
use pqwire::{Connection, ExecStatus, Result};

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    conn.exec("CREATE TEMP TABLE post(id int, name text)").await?;

    let res = conn.exec("COPY post FROM STDIN").await?;
    assert_eq!(res.status(), ExecStatus::CopyIn);

    for id in 0..24 {
        conn.put_copy_data(format!("{id}\tthread{id}\n").as_bytes()).await?;
    }
    conn.put_copy_end(None).await?;

    let res = conn.get_last_result().await?.unwrap();
    assert_eq!(res.cmd_tuples(), Some(24));

    conn.exec("COPY post TO STDOUT").await?;

    let mut rows = 0;
    let mut stream = conn.copy_out_stream();
    while let Some(row) = stream.next().await {
        let _line = row?;
        rows += 1;
    }
    assert_eq!(rows, 24);

    conn.get_last_result().await?;
    conn.close().await
}
