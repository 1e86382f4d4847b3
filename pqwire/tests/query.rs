use std::sync::{Arc, Mutex};

use pqwire::{ConnStatus, ErrorKind, ExecStatus, Param, PgFormat, TransactionStatus};

mod common;

use common::{get_nul, serve};

#[tokio::test]
async fn simple_query() {
    let (mut conn, backend) = serve(|mut b| async move {
        let mut body = b.expect(b'Q').await;
        assert_eq!(get_nul(&mut body), "SELECT 1");
        b.row_description(&[("?column?", 23)])
            .data_row(&[Some("1")])
            .command_complete("SELECT 1")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec("SELECT 1").await.unwrap();
    assert_eq!(res.status(), ExecStatus::TuplesOk);
    assert_eq!(res.ntuples(), 1);
    assert_eq!(res.nfields(), 1);
    assert_eq!(res.fname(0), Some("?column?"));
    assert_eq!(res.fnumber("?column?"), Some(0));
    assert_eq!(res.ftype(0), Some(23));
    assert_eq!(res.get_str(0, 0), Some("1"));
    assert_eq!(res.cmd_status(), "SELECT 1");
    assert_eq!(res.cmd_tuples(), Some(1));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    backend.await.unwrap();
}

#[tokio::test]
async fn query_params() {
    let (mut conn, backend) = serve(|mut b| async move {
        let messages = b.read_until_sync().await;
        let types = messages.iter().map(|(t, _)| *t).collect::<Vec<_>>();
        assert_eq!(types, b"PBDES");

        let bind = &messages[1].1;
        assert!(bind.contains(&b'5'));

        b.parse_complete()
            .bind_complete()
            .row_description(&[("?column?", 23)])
            .data_row(&[Some("6")])
            .command_complete("SELECT 1")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn
        .exec_params("SELECT $1::int + 1", &[Param::from("5")], PgFormat::Text)
        .await
        .unwrap();
    assert_eq!(res.status(), ExecStatus::TuplesOk);
    assert_eq!(res.get_str(0, 0), Some("6"));

    backend.await.unwrap();
}

#[tokio::test]
async fn command_in_progress() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.command_complete("SELECT 0").ready(b'I');
        b.flush().await;
    })
    .await;

    conn.send_query("SELECT pg_sleep(1)").unwrap();
    let err = conn.send_query("SELECT 2").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CommandInProgress));
    assert_eq!(conn.transaction_status(), TransactionStatus::Active);

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.status(), ExecStatus::CommandOk);
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn multiple_statements() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.row_description(&[("a", 23)])
            .data_row(&[Some("1")])
            .command_complete("SELECT 1")
            .row_description(&[("b", 23)])
            .data_row(&[Some("2")])
            .command_complete("SELECT 1")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    conn.send_query("SELECT 1 AS a; SELECT 2 AS b").unwrap();

    let first = conn.get_result().await.unwrap().unwrap();
    assert_eq!(first.fname(0), Some("a"));
    assert_eq!(first.get_str(0, 0), Some("1"));

    let second = conn.get_result().await.unwrap().unwrap();
    assert_eq!(second.fname(0), Some("b"));
    assert_eq!(second.get_str(0, 0), Some("2"));

    assert!(conn.get_result().await.unwrap().is_none());
    assert!(conn.get_result().await.unwrap().is_none());
    assert!(!conn.is_busy());

    backend.await.unwrap();
}

#[tokio::test]
async fn empty_query() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.empty_query().ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec("").await.unwrap();
    assert_eq!(res.status(), ExecStatus::EmptyQuery);
    assert_eq!(res.ntuples(), 0);

    backend.await.unwrap();
}

#[tokio::test]
async fn null_and_empty_value() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.row_description(&[("a", 25), ("b", 25)])
            .data_row(&[None, Some("")])
            .command_complete("SELECT 1")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec("SELECT NULL::text, ''").await.unwrap();
    assert!(res.get_is_null(0, 0));
    assert_eq!(res.get_value(0, 0), None);
    assert!(!res.get_is_null(0, 1));
    assert_eq!(res.get_str(0, 1), Some(""));
    assert_eq!(res.get_length(0, 1), 0);

    let row = res.row(0).unwrap();
    assert!(row.is_null(0));
    assert_eq!(row.get_by_name("b"), Some(&b""[..]));

    backend.await.unwrap();
}

#[tokio::test]
async fn error_result() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.error("42P01", "relation \"nope\" does not exist").ready(b'I');
        b.flush().await;
    })
    .await;

    let err = conn.exec("SELECT * FROM nope").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Database(_)));

    let res = err.result().unwrap();
    assert_eq!(res.status(), ExecStatus::FatalError);
    assert_eq!(res.error_field(b'C'), Some("42P01"));
    assert_eq!(err.db_error().unwrap().code(), "42P01");
    assert!(conn.error_message().contains("nope"));

    // connection is still usable
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    backend.await.unwrap();
}

#[tokio::test]
async fn first_error_wins() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.command_complete("CREATE TABLE")
            .error("42601", "syntax error")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let err = conn.exec("CREATE TABLE t(); bad").await.unwrap_err();
    assert_eq!(err.db_error().unwrap().code(), "42601");

    backend.await.unwrap();
}

#[tokio::test]
async fn single_row_mode() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.read_until_sync().await;
        b.parse_complete()
            .bind_complete()
            .row_description(&[("n", 23)])
            .data_row(&[Some("1")])
            .data_row(&[Some("2")])
            .command_complete("SELECT 2")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    conn.set_single_row_mode().unwrap();
    conn.send_query_params("SELECT generate_series(1, 2)", &[], PgFormat::Text).unwrap();

    for expected in ["1", "2"] {
        let res = conn.get_result().await.unwrap().unwrap();
        assert_eq!(res.status(), ExecStatus::SingleTuple);
        assert_eq!(res.ntuples(), 1);
        assert_eq!(res.get_str(0, 0), Some(expected));
    }

    let last = conn.get_result().await.unwrap().unwrap();
    assert_eq!(last.status(), ExecStatus::TuplesOk);
    assert_eq!(last.ntuples(), 0);
    assert_eq!(last.nfields(), 1);
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn prepare_and_describe() {
    let (mut conn, backend) = serve(|mut b| async move {
        let messages = b.read_until_sync().await;
        let mut parse = messages[0].1.clone();
        assert_eq!(get_nul(&mut parse), "stmt");
        b.parse_complete().ready(b'I');
        b.flush().await;

        let messages = b.read_until_sync().await;
        assert_eq!(messages[0].0, b'D');
        b.parameter_description(&[23])
            .row_description(&[("int4", 23)])
            .ready(b'I');
        b.flush().await;

        let messages = b.read_until_sync().await;
        let types = messages.iter().map(|(t, _)| *t).collect::<Vec<_>>();
        assert_eq!(types, b"BDES");
        b.bind_complete()
            .row_description(&[("int4", 23)])
            .data_row(&[Some("7")])
            .command_complete("SELECT 1")
            .ready(b'I');
        b.flush().await;

        let messages = b.read_until_sync().await;
        assert_eq!(messages[0].0, b'C');
        b.send(b'3', &[]).ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.prepare("stmt", "SELECT $1::int", &[23]).await.unwrap();
    assert_eq!(res.status(), ExecStatus::CommandOk);

    let desc = conn.describe_prepared("stmt").await.unwrap();
    assert_eq!(desc.nparams(), 1);
    assert_eq!(desc.param_type(0), Some(23));
    assert_eq!(desc.nfields(), 1);
    assert_eq!(desc.ntuples(), 0);

    let res = conn.exec_prepared("stmt", &[Param::from(7i32)], PgFormat::Text).await.unwrap();
    assert_eq!(res.get_str(0, 0), Some("7"));

    let res = conn.close_prepared("stmt").await.unwrap();
    assert_eq!(res.status(), ExecStatus::CommandOk);

    backend.await.unwrap();
}

#[tokio::test]
async fn notice_handler() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.notice("table \"t\" does not exist, skipping")
            .command_complete("DROP TABLE")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let notices = Arc::new(Mutex::new(vec![]));
    let sink = notices.clone();
    conn.set_notice_handler(move |notice| {
        sink.lock().unwrap().push(notice.message().to_owned());
    });

    conn.exec("DROP TABLE IF EXISTS t").await.unwrap();
    assert_eq!(*notices.lock().unwrap(), ["table \"t\" does not exist, skipping"]);

    backend.await.unwrap();
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let (mut conn, backend) = serve(|mut b| async move {
        let mut body = b.expect(b'Q').await;
        assert_eq!(get_nul(&mut body), "BEGIN");
        b.command_complete("BEGIN").ready(b'T');
        b.flush().await;

        let mut body = b.expect(b'Q').await;
        assert_eq!(get_nul(&mut body), "ROLLBACK");
        b.command_complete("ROLLBACK").ready(b'I');
        b.flush().await;
    })
    .await;

    {
        let tx = conn.transaction().await.unwrap();
        assert_eq!(tx.transaction_status(), TransactionStatus::InTrans);
    }

    // the rollback is awaited, but its result is not handed out
    assert!(conn.get_result().await.unwrap().is_none());
    assert!(!conn.is_busy());
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    backend.await.unwrap();
}

#[tokio::test]
async fn transaction_dropped_mid_command() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.command_complete("BEGIN").ready(b'T');
        b.flush().await;

        b.expect(b'Q').await;
        b.row_description(&[("n", 23)])
            .data_row(&[Some("1")])
            .command_complete("SELECT 1")
            .ready(b'T');
        b.flush().await;

        let mut body = b.expect(b'Q').await;
        assert_eq!(get_nul(&mut body), "ROLLBACK");
        b.command_complete("ROLLBACK").ready(b'I');
        b.flush().await;

        b.expect(b'Q').await;
        b.command_complete("SELECT 0").ready(b'I');
        b.flush().await;
    })
    .await;

    {
        let mut tx = conn.transaction().await.unwrap();
        tx.send_query("SELECT 1").unwrap();
    }

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.cmd_status(), "SELECT 1");
    assert!(conn.get_result().await.unwrap().is_none());
    assert!(conn.get_result().await.unwrap().is_none());
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    let res = conn.exec("SELECT").await.unwrap();
    assert_eq!(res.cmd_status(), "SELECT 0");

    backend.await.unwrap();
}

#[tokio::test]
async fn committed_transaction() {
    let (mut conn, backend) = serve(|mut b| async move {
        for (tag, status) in [("BEGIN", b'T'), ("INSERT 0 1", b'T'), ("COMMIT", b'I')] {
            b.expect(b'Q').await;
            b.command_complete(tag).ready(status);
            b.flush().await;
        }
    })
    .await;

    let mut tx = conn.transaction().await.unwrap();
    let res = tx.exec("INSERT INTO t VALUES (1)").await.unwrap();
    assert_eq!(res.cmd_tuples(), Some(1));
    assert_eq!(res.oid_value(), None);
    tx.commit().await.unwrap();

    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    backend.await.unwrap();
}

#[tokio::test]
async fn session_messages_mid_command() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.row_description(&[("n", 23)])
            .parameter_status("application_name", "reports")
            .data_row(&[Some("1")])
            .key_data_with(7, 8)
            .data_row(&[Some("2")])
            .command_complete("SELECT 2")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec("SELECT generate_series(1, 2) AS n").await.unwrap();
    assert_eq!(res.status(), ExecStatus::TuplesOk);
    assert_eq!(res.ntuples(), 2);
    assert_eq!(res.get_str(1, 0), Some("2"));
    assert_eq!(conn.parameter_status("application_name"), Some("reports"));
    assert_eq!(conn.backend_pid(), Some(7));
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn binary_result() {
    let (mut conn, backend) = serve(|mut b| async move {
        let messages = b.read_until_sync().await;
        let bind = &messages[1].1;
        // one result format code, binary
        assert_eq!(&bind[bind.len() - 4..], [0, 1, 0, 1]);

        b.parse_complete()
            .bind_complete()
            .row_description_format(&[("int4", 23)], 1)
            .data_row_bytes(&[Some(&[0u8, 0, 0, 1][..])])
            .command_complete("SELECT 1")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec_params("SELECT 1::int4", &[], PgFormat::Binary).await.unwrap();
    assert_eq!(res.status(), ExecStatus::TuplesOk);
    assert_eq!(res.ntuples(), 1);
    assert_eq!(res.nfields(), 1);
    assert_eq!(res.fformat(0), Some(PgFormat::Binary));
    assert_eq!(res.get_value(0, 0), Some(&[0, 0, 0, 1][..]));
    assert_eq!(res.get_length(0, 0), 4);

    backend.await.unwrap();
}

#[tokio::test]
async fn too_many_params() {
    let (mut conn, backend) = serve(|mut b| async move {
        // nothing of the rejected requests reaches the server
        let mut body = b.expect(b'Q').await;
        assert_eq!(get_nul(&mut body), "SELECT 1");
        b.command_complete("SELECT 1").ready(b'I');
        b.flush().await;
    })
    .await;

    let params = vec![Param::from("1"); 70_000];
    let err = conn.send_query_params("SELECT 1", &params, PgFormat::Text).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TooManyParams(70_000)));

    let err = conn.send_query_prepared("stmt", &params, PgFormat::Text).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TooManyParams(_)));

    let err = conn.send_prepare("stmt", "SELECT 1", &vec![0; 65_536]).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TooManyParams(65_536)));

    assert!(!conn.is_busy());
    conn.exec("SELECT 1").await.unwrap();

    backend.await.unwrap();
}

#[tokio::test]
async fn invalid_utf8_in_message() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.send(b'C', b"SELECT \xff\xfe\0").ready(b'I');
        b.flush().await;
    })
    .await;

    let err = conn.exec("SELECT").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
    assert_eq!(conn.status(), ConnStatus::Bad);

    backend.await.unwrap();
}
