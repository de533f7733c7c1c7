//! End-to-end IMAP4rev1 session tests: spawns one plaintext listener per
//! test on an ephemeral port and drives it over a real TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mail_rs::mailstore::Mailstore;
use mail_rs::security::Authenticator;
use mail_rs::imap::{ImapSession, ImapSessionConfig};
use mail_rs::transport::MailStream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

async fn start_imap_server() -> (SocketAddr, Arc<Mailstore>) {
    let store = Mailstore::connect("sqlite::memory:").await.unwrap();
    let authenticator = Arc::new(Authenticator::new(store.clone()));
    authenticator.add_user("alice@example.test", "hunter2").await.unwrap();

    let session_config = ImapSessionConfig {
        hostname: "mail.example.test".to_string(),
        tls: None,
        store: store.clone(),
        authenticator,
        rate_limiter: None,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((socket, peer)) = listener.accept().await else { return };
            let config = session_config.clone();
            tokio::spawn(async move {
                let session = ImapSession::new(MailStream::Plain(socket), peer.ip(), config);
                let _ = session.handle().await;
            });
        }
    });

    sleep(Duration::from_millis(50)).await;
    (addr, store)
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line
}

async fn write_line(writer: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) {
    writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
}

async fn login(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, writer: &mut tokio::net::tcp::OwnedWriteHalf) {
    let _greeting = read_line(reader).await;
    write_line(writer, "a1 LOGIN alice@example.test hunter2").await;
    let response = read_line(reader).await;
    assert!(response.starts_with("a1 OK"), "login failed: {response}");
}

#[tokio::test]
async fn greeting_and_capability() {
    let (addr, _store) = start_imap_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let greeting = read_line(&mut reader).await;
    assert!(greeting.starts_with("* OK"), "got: {greeting}");

    write_line(&mut write_half, "a1 CAPABILITY").await;
    let capability_line = read_line(&mut reader).await;
    assert!(capability_line.contains("IMAP4rev1"), "got: {capability_line}");
    let tagged = read_line(&mut reader).await;
    assert!(tagged.starts_with("a1 OK"), "got: {tagged}");
}

#[tokio::test]
async fn login_then_select_inbox() {
    let (addr, _store) = start_imap_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    login(&mut reader, &mut write_half).await;

    write_line(&mut write_half, "a2 SELECT INBOX").await;
    let mut saw_exists = false;
    loop {
        let line = read_line(&mut reader).await;
        if line.contains("EXISTS") {
            saw_exists = true;
        }
        if line.starts_with("a2 OK") {
            break;
        }
    }
    assert!(saw_exists);
}

#[tokio::test]
async fn append_then_fetch_roundtrip() {
    let (addr, _store) = start_imap_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    login(&mut reader, &mut write_half).await;

    let message = b"Subject: hi there\r\n\r\nhello world\r\n";
    write_line(&mut write_half, &format!("a2 APPEND INBOX {{{}}}", message.len())).await;
    let continuation = read_line(&mut reader).await;
    assert!(continuation.starts_with('+'), "got: {continuation}");
    write_half.write_all(message).await.unwrap();
    write_half.write_all(b"\r\n").await.unwrap();
    let response = read_line(&mut reader).await;
    assert!(response.starts_with("a2 OK"), "APPEND failed: {response}");

    write_line(&mut write_half, "a3 SELECT INBOX").await;
    loop {
        if read_line(&mut reader).await.starts_with("a3 OK") {
            break;
        }
    }

    write_line(&mut write_half, "a4 FETCH 1 (BODY[])").await;
    let mut collected = String::new();
    loop {
        let line = read_line(&mut reader).await;
        collected.push_str(&line);
        if line.starts_with("a4 OK") {
            break;
        }
    }
    assert!(collected.contains("FETCH"), "got: {collected}");
    assert!(collected.contains("hello world"), "got: {collected}");
}

#[tokio::test]
async fn logout_sends_bye() {
    let (addr, _store) = start_imap_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let _greeting = read_line(&mut reader).await;

    write_line(&mut write_half, "a1 LOGOUT").await;
    let bye = read_line(&mut reader).await;
    assert!(bye.starts_with("* BYE"), "got: {bye}");
    let tagged = read_line(&mut reader).await;
    assert!(tagged.starts_with("a1 OK"), "got: {tagged}");
}
