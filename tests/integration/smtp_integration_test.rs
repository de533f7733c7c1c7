//! End-to-end SMTP session tests: spawns one MX-mode listener per test
//! on an ephemeral port and drives it over a real TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mail_rs::config::Config;
use mail_rs::mailstore::Mailstore;
use mail_rs::security::Authenticator;
use mail_rs::smtp::{SessionConfig, SessionMode, SmtpSession};
use mail_rs::transport::MailStream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

async fn start_mx_server() -> SocketAddr {
    let store = Mailstore::connect("sqlite::memory:").await.unwrap();
    let authenticator = Arc::new(Authenticator::new(store.clone()));
    let config = Config::default();

    let session_config = SessionConfig {
        mode: SessionMode::Mx,
        domain: config.server.domain.clone(),
        hostname: config.server.hostname.clone(),
        max_message_size: config.limits.max_email_size,
        require_tls_before_mail: false,
        tls: None,
        store,
        authenticator,
        auth_config: config.auth.clone(),
        spam_config: config.spam.clone(),
        spam_scanner: None,
        greylist: None,
        rate_limiter: None,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((socket, peer)) = listener.accept().await else { return };
            let config = session_config.clone();
            tokio::spawn(async move {
                let session = SmtpSession::new(MailStream::Plain(socket), peer.ip(), config);
                let _ = session.handle().await;
            });
        }
    });

    sleep(Duration::from_millis(50)).await;
    addr
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line
}

async fn write_line(writer: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) {
    writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
}

#[tokio::test]
async fn greeting_and_ehlo() {
    let addr = start_mx_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let greeting = read_line(&mut reader).await;
    assert!(greeting.starts_with("220"), "got: {greeting}");

    write_line(&mut write_half, "EHLO client.test").await;
    let mut saw_ok = false;
    loop {
        let line = read_line(&mut reader).await;
        if line.starts_with("250 ") {
            saw_ok = true;
            break;
        }
    }
    assert!(saw_ok);
}

#[tokio::test]
async fn mail_without_helo_is_rejected() {
    let addr = start_mx_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_line(&mut reader).await;
    write_line(&mut write_half, "MAIL FROM:<sender@example.com>").await;
    let response = read_line(&mut reader).await;
    assert!(response.starts_with("5"), "expected rejection, got: {response}");
}

#[tokio::test]
async fn full_transaction_is_accepted_and_delivered() {
    let addr = start_mx_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_line(&mut reader).await;
    write_line(&mut write_half, "EHLO client.test").await;
    loop {
        if read_line(&mut reader).await.starts_with("250 ") {
            break;
        }
    }

    write_line(&mut write_half, "MAIL FROM:<sender@example.test>").await;
    assert!(read_line(&mut reader).await.starts_with("250"));

    write_line(&mut write_half, "RCPT TO:<recipient@example.test>").await;
    assert!(read_line(&mut reader).await.starts_with("250"));

    write_line(&mut write_half, "DATA").await;
    assert!(read_line(&mut reader).await.starts_with("354"));

    write_line(&mut write_half, "Subject: integration test").await;
    write_line(&mut write_half, "").await;
    write_line(&mut write_half, "hello from the test suite").await;
    write_line(&mut write_half, ".").await;
    let response = read_line(&mut reader).await;
    assert!(response.starts_with("250"), "DATA acceptance failed: {response}");

    write_line(&mut write_half, "QUIT").await;
    assert!(read_line(&mut reader).await.starts_with("221"));
}

#[tokio::test]
async fn invalid_sender_address_is_rejected() {
    let addr = start_mx_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_line(&mut reader).await;
    write_line(&mut write_half, "EHLO client.test").await;
    loop {
        if read_line(&mut reader).await.starts_with("250 ") {
            break;
        }
    }

    write_line(&mut write_half, "MAIL FROM:<not-an-address>").await;
    let response = read_line(&mut reader).await;
    assert!(response.starts_with("5"), "expected rejection, got: {response}");
}
