use pqwire::{Connection, ExecStatus, Param, PgFormat, Result};

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    // Execute

    conn.exec("CREATE TEMP TABLE pqwire(id serial, name text)").await?;

    let res = conn
        .exec_params("INSERT INTO pqwire(name) VALUES($1)", &[Param::from("Deez")], PgFormat::Text)
        .await?;

    assert_eq!(res.cmd_tuples(), Some(1));

    conn.exec("INSERT INTO pqwire(name) VALUES('Foo')").await?;

    // Queries

    let res = conn.exec("SELECT id, name FROM pqwire ORDER BY id").await?;

    assert_eq!(res.ntuples(), 2);
    assert_eq!(res.get_str(0, 1), Some("Deez"));

    for row in res.rows() {
        tracing::info!(id = row.get_str(0), name = row.get_str(1), "row");
    }

    // Prepared

    conn.prepare("by_name", "SELECT id FROM pqwire WHERE name = $1", &[]).await?;
    let res = conn.exec_prepared("by_name", &[Param::from("Foo")], PgFormat::Text).await?;
    assert_eq!(res.ntuples(), 1);
    conn.close_prepared("by_name").await?;

    // Asynchronous

    conn.send_query("SELECT 1; SELECT 2")?;
    while let Some(res) = conn.get_result().await? {
        assert_eq!(res.status(), ExecStatus::TuplesOk);
    }

    conn.set_single_row_mode()?;
    conn.send_query_params("SELECT generate_series(1, 4)", &[], PgFormat::Text)?;
    while let Some(res) = conn.get_result().await? {
        if res.status() == ExecStatus::SingleTuple {
            tracing::info!(value = res.get_str(0, 0), "single row");
        }
    }

    // Transaction

    let mut tx = conn.transaction().await?;
    tx.exec("INSERT INTO pqwire(name) VALUES('Bar')").await?;
    tx.commit().await?;

    // Error case

    let err = conn.exec("SELECT foo").await.unwrap_err();
    tracing::info!(code = err.db_error().map(|e| e.code()), "{err}");

    let res = conn.exec("").await?;
    assert_eq!(res.status(), ExecStatus::EmptyQuery);

    conn.close().await
}
