//! Shared fixtures for the end-to-end suites: an in-process server on an
//! ephemeral port and a minimal blocking line client.
#![allow(dead_code)]

use axondb::{Server, ServerConfig};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub addr: SocketAddr,
    pub control_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Bind and serve against `data_dir` until `stop` (or drop).
    pub async fn start(data_dir: &Path) -> TestServer {
        let mut config = ServerConfig::new(data_dir);
        config.bind = "127.0.0.1:0".parse().unwrap();

        let server = Server::bind(config).await.expect("server bind");
        let addr = server.local_addr().unwrap();
        let control_addr = server.control_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            server
                .run_with_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("server run");
        });

        TestServer {
            addr,
            control_addr,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    /// Graceful shutdown: closes every space (flushing both engines).
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Blocking newline-JSON client
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).expect("connect");
        let reader = BufReader::new(stream.try_clone().expect("clone stream"));
        Client {
            reader,
            writer: stream,
        }
    }

    /// Connect and authenticate, asserting success.
    pub fn login(addr: SocketAddr, username: &str, password: &str) -> Client {
        let mut client = Client::connect(addr);
        let reply = client.send(json!({"username": username, "password": password}));
        assert_eq!(reply["status"], "OK", "login failed: {}", reply);
        client
    }

    /// Send one frame, read one reply.
    pub fn send(&mut self, request: Value) -> Value {
        let mut line = request.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).expect("write");

        self.read_line()
    }

    /// Read one reply line without sending (admission rejects).
    pub fn read_line(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read");
        assert!(!line.is_empty(), "connection closed early");
        serde_json::from_str(&line).expect("reply is JSON")
    }

    /// Send and assert an OK status, returning the reply.
    pub fn ok(&mut self, request: Value) -> Value {
        let reply = self.send(request.clone());
        assert_eq!(reply["status"], "OK", "request {} failed: {}", request, reply);
        reply
    }
}

/// One minimal HTTP/1.0 exchange against the control plane.
pub fn http(addr: SocketAddr, method: &str, path: &str, body: Option<Value>) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).expect("control connect");
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let request = format!(
        "{} {} HTTP/1.0\r\nHost: control\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        method,
        path,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).expect("http write");

    let mut response = String::new();
    stream.read_to_string(&mut response).expect("http read");
    let status: u16 = response
        .split_whitespace()
        .nth(1)
        .expect("http status")
        .parse()
        .expect("numeric status");
    let payload = response
        .split("\r\n\r\n")
        .nth(1)
        .filter(|b| !b.is_empty())
        .map(|b| serde_json::from_str(b).expect("http body is JSON"))
        .unwrap_or(Value::Null);
    (status, payload)
}
