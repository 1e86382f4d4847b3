//! Scripted postgres backend for integration tests.
#![allow(dead_code)]
use bytes::{Buf, BufMut, Bytes, BytesMut};
use pqwire::{Config, Connection};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

pub const PID: u32 = 4242;
pub const SECRET: u32 = 0xdead;

/// Bind a listener on an ephemeral port, with config pointing to it.
pub async fn listen() -> (TcpListener, Config) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = Config::new()
        .set_host("127.0.0.1")
        .set_port(port)
        .set_user("alice")
        .set_dbname("shop");
    (listener, config)
}

/// Spawn a backend accepting one connection, running `script` after trust authentication.
///
/// Await the returned handle to surface assertion failures of the backend.
pub async fn serve<F, Fut>(script: F) -> (Connection, JoinHandle<()>)
where
    F: FnOnce(Backend) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (listener, config) = listen().await;
    let handle = tokio::spawn(async move {
        let mut backend = Backend::accept(&listener).await;
        backend.read_startup().await;
        backend.handshake().await;
        script(backend).await;
    });
    (Connection::connect_with(config).await.unwrap(), handle)
}

pub struct Backend {
    socket: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Backend {
    pub async fn accept(listener: &TcpListener) -> Backend {
        let (socket, _) = listener.accept().await.unwrap();
        Backend { socket, read_buf: BytesMut::new(), write_buf: BytesMut::new() }
    }

    async fn fill(&mut self, len: usize) {
        while self.read_buf.len() < len {
            let n = self.socket.read_buf(&mut self.read_buf).await.unwrap();
            assert_ne!(n, 0, "client closed the connection");
        }
    }

    /// Read the untyped startup packet, returns its parameters.
    pub async fn read_startup(&mut self) -> Vec<(String, String)> {
        self.fill(4).await;
        let len = (&self.read_buf[..4]).get_u32() as usize;
        self.fill(len).await;
        let mut body = self.read_buf.split_to(len).freeze();
        body.advance(4);
        assert_eq!(body.get_u32(), 196608, "protocol version");

        let mut params = vec![];
        loop {
            let key = get_nul(&mut body);
            if key.is_empty() {
                break;
            }
            params.push((key, get_nul(&mut body)));
        }
        params
    }

    /// Read the untyped 8 byte `SSLRequest`.
    pub async fn read_ssl_request(&mut self) {
        self.fill(8).await;
        let mut packet = self.read_buf.split_to(8);
        assert_eq!(packet.get_u32(), 8);
        assert_eq!(packet.get_u32(), 80877103);
    }

    /// Read the untyped 16 byte `CancelRequest`, returns process id and secret key.
    pub async fn read_cancel_request(&mut self) -> (u32, u32) {
        self.fill(16).await;
        let mut packet = self.read_buf.split_to(16);
        assert_eq!(packet.get_u32(), 16);
        assert_eq!(packet.get_u32(), 80877102);
        (packet.get_u32(), packet.get_u32())
    }

    pub async fn write_raw(&mut self, data: &[u8]) {
        self.socket.write_all(data).await.unwrap();
    }

    pub async fn read_message(&mut self) -> (u8, Bytes) {
        self.fill(5).await;
        let len = (&self.read_buf[1..5]).get_u32() as usize;
        self.fill(len + 1).await;
        let msgtype = self.read_buf.get_u8();
        self.read_buf.advance(4);
        (msgtype, self.read_buf.split_to(len - 4).freeze())
    }

    /// Read next message and assert its type.
    pub async fn expect(&mut self, msgtype: u8) -> Bytes {
        let (found, body) = self.read_message().await;
        assert_eq!(found as char, msgtype as char, "unexpected frontend message");
        body
    }

    /// Read extended query messages up to and including `Sync`, returns their types.
    pub async fn read_until_sync(&mut self) -> Vec<(u8, Bytes)> {
        let mut messages = vec![];
        loop {
            let (msgtype, body) = self.read_message().await;
            messages.push((msgtype, body));
            if msgtype == b'S' {
                return messages;
            }
        }
    }

    /// Expect the connection to be closed by the client.
    pub async fn expect_eof(&mut self) {
        let n = self.socket.read_buf(&mut self.read_buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    pub fn send(&mut self, msgtype: u8, body: &[u8]) -> &mut Self {
        self.write_buf.put_u8(msgtype);
        self.write_buf.put_u32(body.len() as u32 + 4);
        self.write_buf.put_slice(body);
        self
    }

    pub async fn flush(&mut self) {
        self.socket.write_all(&self.write_buf).await.unwrap();
        self.write_buf.clear();
    }

    pub fn auth(&mut self, code: u32, data: &[u8]) -> &mut Self {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(data);
        self.send(b'R', &body)
    }

    pub fn auth_ok(&mut self) -> &mut Self {
        self.auth(0, &[])
    }

    pub fn parameter_status(&mut self, name: &str, value: &str) -> &mut Self {
        self.send(b'S', &nul([name, value]))
    }

    pub fn key_data(&mut self) -> &mut Self {
        self.key_data_with(PID, SECRET)
    }

    pub fn key_data_with(&mut self, pid: u32, secret: u32) -> &mut Self {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(&secret.to_be_bytes());
        self.send(b'K', &body)
    }

    pub fn ready(&mut self, status: u8) -> &mut Self {
        self.send(b'Z', &[status])
    }

    /// Columns as `(name, type oid)`, text format.
    pub fn row_description(&mut self, columns: &[(&str, u32)]) -> &mut Self {
        self.row_description_format(columns, 0)
    }

    pub fn row_description_format(&mut self, columns: &[(&str, u32)], format: u16) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u16(columns.len() as u16);
        for (name, oid) in columns {
            body.put_slice(name.as_bytes());
            body.put_u8(0);
            body.put_u32(0); // table oid
            body.put_i16(0); // column id
            body.put_u32(*oid);
            body.put_i16(-1);
            body.put_i32(-1);
            body.put_u16(format);
        }
        self.send(b'T', &body)
    }

    pub fn data_row(&mut self, values: &[Option<&str>]) -> &mut Self {
        let values = values.iter().map(|e| e.map(str::as_bytes)).collect::<Vec<_>>();
        self.data_row_bytes(&values)
    }

    pub fn data_row_bytes(&mut self, values: &[Option<&[u8]>]) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u16(values.len() as u16);
        for value in values {
            match value {
                Some(value) => {
                    body.put_i32(value.len() as i32);
                    body.put_slice(value);
                },
                None => body.put_i32(-1),
            }
        }
        self.send(b'D', &body)
    }

    pub fn command_complete(&mut self, tag: &str) -> &mut Self {
        self.send(b'C', &nul([tag]))
    }

    pub fn error(&mut self, code: &str, message: &str) -> &mut Self {
        self.error_response("ERROR", code, message)
    }

    pub fn fatal(&mut self, code: &str, message: &str) -> &mut Self {
        self.error_response("FATAL", code, message)
    }

    fn error_response(&mut self, severity: &str, code: &str, message: &str) -> &mut Self {
        let mut body = Vec::new();
        for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
            body.push(field);
            body.extend_from_slice(&nul([value]));
        }
        body.push(0);
        self.send(b'E', &body)
    }

    pub fn notice(&mut self, message: &str) -> &mut Self {
        let mut body = Vec::new();
        for (field, value) in [(b'S', "NOTICE"), (b'C', "00000"), (b'M', message)] {
            body.push(field);
            body.extend_from_slice(&nul([value]));
        }
        body.push(0);
        self.send(b'N', &body)
    }

    pub fn notification(&mut self, channel: &str, payload: &str) -> &mut Self {
        let mut body = PID.to_be_bytes().to_vec();
        body.extend_from_slice(&nul([channel, payload]));
        self.send(b'A', &body)
    }

    pub fn empty_query(&mut self) -> &mut Self {
        self.send(b'I', &[])
    }

    pub fn parse_complete(&mut self) -> &mut Self {
        self.send(b'1', &[])
    }

    pub fn bind_complete(&mut self) -> &mut Self {
        self.send(b'2', &[])
    }

    pub fn no_data(&mut self) -> &mut Self {
        self.send(b'n', &[])
    }

    pub fn parameter_description(&mut self, oids: &[u32]) -> &mut Self {
        let mut body = (oids.len() as u16).to_be_bytes().to_vec();
        for oid in oids {
            body.extend_from_slice(&oid.to_be_bytes());
        }
        self.send(b't', &body)
    }

    fn copy_response(&mut self, msgtype: u8, columns: u16) -> &mut Self {
        let mut body = vec![0];
        body.extend_from_slice(&columns.to_be_bytes());
        for _ in 0..columns {
            body.extend_from_slice(&0u16.to_be_bytes());
        }
        self.send(msgtype, &body)
    }

    pub fn copy_in_response(&mut self, columns: u16) -> &mut Self {
        self.copy_response(b'G', columns)
    }

    pub fn copy_out_response(&mut self, columns: u16) -> &mut Self {
        self.copy_response(b'H', columns)
    }

    pub fn copy_both_response(&mut self, columns: u16) -> &mut Self {
        self.copy_response(b'W', columns)
    }

    pub fn copy_data(&mut self, data: &[u8]) -> &mut Self {
        self.send(b'd', data)
    }

    pub fn copy_done(&mut self) -> &mut Self {
        self.send(b'c', &[])
    }

    /// Complete startup after authentication.
    pub async fn handshake(&mut self) {
        self.auth_ok()
            .parameter_status("server_version", "16.2")
            .parameter_status("client_encoding", "UTF8")
            .parameter_status("standard_conforming_strings", "on")
            .key_data()
            .ready(b'I');
        self.flush().await;
    }
}

pub fn nul<const N: usize>(values: [&str; N]) -> Vec<u8> {
    let mut out = vec![];
    for value in values {
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out
}

pub fn get_nul(body: &mut Bytes) -> String {
    let end = body.iter().position(|e| *e == 0).unwrap();
    let value = String::from_utf8(body.split_to(end).to_vec()).unwrap();
    body.advance(1);
    value
}
