//! One-shot HTTP responders on the loopback interface

use std::future::pending;

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
};

/// Nothing listens here
pub const UNREACHABLE: &str = "http://127.0.0.1:1/";

/// Answer the first request with `response` verbatim, returning the URL.
pub async fn respond_once(response: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0; 4096];
        let _ = socket.read(&mut request).await;
        socket.write_all(response).await.unwrap();
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}/")
}

/// Accept the first request and never answer it, returning the URL.
pub async fn never_respond() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        pending::<()>().await;
    });
    format!("http://{addr}/")
}
