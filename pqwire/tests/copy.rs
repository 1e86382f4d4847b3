use std::{future::poll_fn, pin::Pin};

use futures_core::Stream;
use pqwire::{CopyRead, ErrorKind, ExecStatus};

mod common;

use common::{get_nul, serve};

#[tokio::test]
async fn copy_in() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_in_response(1);
        b.flush().await;

        let mut received = vec![];
        loop {
            match b.read_message().await {
                (b'd', data) => received.extend_from_slice(&data),
                (b'c', _) => break,
                (found, _) => panic!("unexpected message {:?}", found as char),
            }
        }
        assert_eq!(received, b"foo\nbar\nbaz\n");

        b.command_complete("COPY 3").ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec("COPY post(name) FROM STDIN").await.unwrap();
    assert_eq!(res.status(), ExecStatus::CopyIn);
    assert_eq!(res.nfields(), 1);

    let err = conn.send_query("SELECT 1").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CopyInProgress));
    let err = conn.get_copy_data().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotInCopy));

    for row in ["foo\n", "bar\n", "baz\n"] {
        assert!(conn.put_copy_data(row.as_bytes()).await.unwrap());
    }
    assert!(conn.put_copy_end(None).await.unwrap());

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.status(), ExecStatus::CommandOk);
    assert_eq!(res.cmd_tuples(), Some(3));
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn copy_in_abort() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_in_response(1);
        b.flush().await;

        b.expect(b'd').await;
        let mut body = b.expect(b'f').await;
        assert_eq!(get_nul(&mut body), "client gave up");

        b.error("57014", "COPY from stdin failed: client gave up").ready(b'I');
        b.flush().await;
    })
    .await;

    conn.exec("COPY post(name) FROM STDIN").await.unwrap();
    conn.put_copy_data(b"foo\n").await.unwrap();
    conn.put_copy_end(Some("client gave up")).await.unwrap();

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.status(), ExecStatus::FatalError);
    assert_eq!(res.error_field(b'C'), Some("57014"));
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn copy_out() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_out_response(2)
            .copy_data(b"1\tfoo\n")
            .copy_data(b"2\tbar\n")
            .copy_done()
            .command_complete("COPY 2")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec("COPY post TO STDOUT").await.unwrap();
    assert_eq!(res.status(), ExecStatus::CopyOut);
    assert_eq!(res.nfields(), 2);

    let err = conn.put_copy_data(b"nope").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotInCopy));

    assert_eq!(conn.get_copy_data().await.unwrap().as_deref(), Some(&b"1\tfoo\n"[..]));
    assert_eq!(conn.get_copy_data().await.unwrap().as_deref(), Some(&b"2\tbar\n"[..]));
    assert_eq!(conn.get_copy_data().await.unwrap(), None);

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.cmd_tuples(), Some(2));
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn copy_out_stream() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_out_response(1)
            .copy_data(b"a\n")
            .copy_data(b"b\n")
            .copy_data(b"c\n")
            .copy_done()
            .command_complete("COPY 3")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    conn.exec("COPY post(name) TO STDOUT").await.unwrap();

    let mut rows = vec![];
    let mut stream = conn.copy_out_stream();
    while let Some(row) = poll_fn(|cx| Pin::new(&mut stream).poll_next(cx)).await {
        rows.push(row.unwrap());
    }
    assert_eq!(rows, [&b"a\n"[..], b"b\n", b"c\n"]);

    let res = conn.get_last_result().await.unwrap().unwrap();
    assert_eq!(res.cmd_tuples(), Some(3));

    backend.await.unwrap();
}

#[tokio::test]
async fn try_get_copy_data() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_out_response(1).copy_data(b"x\n");
        b.flush().await;

        // the rest arrive later
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        b.copy_done().command_complete("COPY 1").ready(b'I');
        b.flush().await;
    })
    .await;

    conn.exec("COPY post(name) TO STDOUT").await.unwrap();

    assert_eq!(conn.get_copy_data().await.unwrap().as_deref(), Some(&b"x\n"[..]));
    assert_eq!(conn.try_get_copy_data().unwrap(), CopyRead::WouldBlock);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(conn.try_get_copy_data().unwrap(), CopyRead::Done);

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.cmd_tuples(), Some(1));

    backend.await.unwrap();
}

#[tokio::test]
async fn error_during_copy_out() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_out_response(1)
            .copy_data(b"x\n")
            .error("57014", "canceling statement due to user request")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    conn.exec("COPY post(name) TO STDOUT").await.unwrap();
    assert!(conn.get_copy_data().await.unwrap().is_some());
    assert_eq!(conn.get_copy_data().await.unwrap(), None);

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.status(), ExecStatus::FatalError);
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn copy_both_client_done_first() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_both_response(1).copy_data(b"from server");
        b.flush().await;

        assert_eq!(&b.expect(b'd').await[..], b"to server");
        b.expect(b'c').await;

        b.copy_data(b"last").copy_done().command_complete("COPY 0").ready(b'I');
        b.flush().await;
    })
    .await;

    let res = conn.exec("START_REPLICATION").await.unwrap();
    assert_eq!(res.status(), ExecStatus::CopyBoth);

    assert_eq!(conn.get_copy_data().await.unwrap().as_deref(), Some(&b"from server"[..]));
    assert!(conn.put_copy_data(b"to server").await.unwrap());
    conn.put_copy_end(None).await.unwrap();

    // only the server side remains open
    let err = conn.put_copy_data(b"more").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotInCopy));
    assert_eq!(conn.get_copy_data().await.unwrap().as_deref(), Some(&b"last"[..]));
    assert_eq!(conn.get_copy_data().await.unwrap(), None);

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.status(), ExecStatus::CommandOk);
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn copy_both_server_done_first() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_both_response(1).copy_done();
        b.flush().await;

        assert_eq!(&b.expect(b'd').await[..], b"late");
        b.expect(b'c').await;
        b.command_complete("COPY 0").ready(b'I');
        b.flush().await;
    })
    .await;

    conn.exec("START_REPLICATION").await.unwrap();
    assert_eq!(conn.get_copy_data().await.unwrap(), None);

    // only the client side remains open
    let err = conn.get_copy_data().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotInCopy));
    assert!(conn.put_copy_data(b"late").await.unwrap());
    conn.put_copy_end(None).await.unwrap();

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.status(), ExecStatus::CommandOk);
    assert!(conn.get_result().await.unwrap().is_none());

    backend.await.unwrap();
}

#[tokio::test]
async fn nonblocking_copy_in_buffer_full() {
    const CHUNK: usize = 64 * 1024;

    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_in_response(1);
        b.flush().await;

        // leave the socket unread until the client buffer fills up
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let mut received = 0;
        loop {
            match b.read_message().await {
                (b'd', data) => received += data.len(),
                (b'c', _) => break,
                (found, _) => panic!("unexpected message {:?}", found as char),
            }
        }
        assert_eq!(received % CHUNK, 0);

        b.command_complete("COPY 1").ready(b'I');
        b.flush().await;
    })
    .await;

    conn.exec("COPY post(name) FROM STDIN").await.unwrap();
    conn.set_nonblocking(true);

    let chunk = vec![b'x'; CHUNK];
    let mut rejected = false;
    for _ in 0..4096 {
        if !conn.put_copy_data(&chunk).await.unwrap() {
            rejected = true;
            break;
        }
    }
    assert!(rejected);

    conn.set_nonblocking(false);
    assert!(conn.put_copy_end(None).await.unwrap());

    let res = conn.get_result().await.unwrap().unwrap();
    assert_eq!(res.status(), ExecStatus::CommandOk);

    backend.await.unwrap();
}

#[tokio::test]
async fn query_during_copy_out() {
    let (mut conn, backend) = serve(|mut b| async move {
        b.expect(b'Q').await;
        b.copy_out_response(1)
            .copy_data(b"x\n")
            .copy_done()
            .command_complete("COPY 1")
            .ready(b'I');
        b.flush().await;
    })
    .await;

    conn.exec("COPY post(name) TO STDOUT").await.unwrap();

    let err = conn.send_query_params("SELECT 1", &[], pqwire::PgFormat::Text).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CopyInProgress));
    let err = conn.exec("SELECT 1").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CopyInProgress));

    assert!(conn.get_copy_data().await.unwrap().is_some());
    assert_eq!(conn.get_copy_data().await.unwrap(), None);
    assert_eq!(conn.get_last_result().await.unwrap().unwrap().cmd_tuples(), Some(1));

    backend.await.unwrap();
}
