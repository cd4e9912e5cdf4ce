//! End-to-end behaviour of the capture listener, driven by the outbound
//! client over real sockets.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use lure_smtp::{
    CaptureError, CaptureHandler, CaptureServer, CaptureState, SessionConfig,
    client::{ClientOptions, SmtpClient},
};
use lure_store::{MemoryMessageStore, MessageStore};
use pretty_assertions::assert_eq;

fn server() -> (CaptureServer, Arc<MemoryMessageStore>) {
    let store = Arc::new(MemoryMessageStore::new());
    let server = CaptureServer::new(
        Arc::new(CaptureHandler::new(store.clone())),
        SessionConfig::default().with_banner("capture.test"),
    );
    (server, store)
}

async fn connect(port: u16) -> SmtpClient {
    let mut client = SmtpClient::connect("127.0.0.1", port, false, ClientOptions::default())
        .await
        .unwrap();
    client.read_greeting().await.unwrap();
    client.ehlo("client.test").await.unwrap();
    client
}

async fn submit(client: &mut SmtpClient, recipients: &[&str], body: &str) -> u16 {
    assert!(client.mail_from("it@example.com").await.unwrap().is_success());
    for rcpt in recipients {
        assert!(client.rcpt_to(rcpt).await.unwrap().is_success());
    }
    assert_eq!(client.data().await.unwrap().code, 354);
    client.send_data(body).await.unwrap().code
}

#[tokio::test]
async fn start_twice_leaves_one_listener() {
    let (server, _store) = server();

    let first = server.start(0).await.unwrap();
    let second = server.start(first.port()).await.unwrap();

    assert_eq!(first, second);
    assert!(server.is_running());
    assert_eq!(server.state(), CaptureState::Listening);
    assert_eq!(server.port(), Some(first.port()));

    server.stop().await;
}

#[tokio::test]
async fn concurrent_starts_bind_once() {
    let (server, _store) = server();
    let server = Arc::new(server);

    let starts: Vec<_> = (0..4)
        .map(|_| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start(0).await.unwrap() })
        })
        .collect();

    let mut addresses = BTreeSet::new();
    for start in starts {
        addresses.insert(start.await.unwrap());
    }

    assert_eq!(addresses.len(), 1);
    server.stop().await;
}

#[tokio::test]
async fn stop_when_stopped_is_a_no_op() {
    let (server, _store) = server();

    server.stop().await;
    assert!(!server.is_running());
    assert_eq!(server.state(), CaptureState::Stopped);

    server.start(0).await.unwrap();
    server.stop().await;
    server.stop().await;

    assert!(!server.is_running());
    assert_eq!(server.local_addr(), None);
}

#[tokio::test]
async fn bind_failure_reverts_to_stopped() {
    let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let (server, _store) = server();

    let err = server.start(port).await.unwrap_err();

    assert!(matches!(err, CaptureError::ListenerBindFailed { address, .. } if address.port() == port));
    assert_eq!(server.state(), CaptureState::Stopped);
    assert!(!server.is_running());

    drop(occupied);
    server.start(port).await.unwrap();
    assert!(server.is_running());
    server.stop().await;
}

#[tokio::test]
async fn restart_rebinds_the_same_port() {
    let (server, _store) = server();

    let port = server.start(0).await.unwrap().port();
    server.stop().await;

    assert_eq!(server.start(port).await.unwrap().port(), port);
    server.stop().await;
}

#[tokio::test]
async fn round_trip_capture_keeps_both_recipients() {
    let (server, store) = server();
    let port = server.start(0).await.unwrap().port();

    let mut client = connect(port).await;
    assert!(!client.supports("STARTTLS"));
    assert!(!client.supports("AUTH"));
    assert!(client.supports("SIZE"));

    let code = submit(
        &mut client,
        &["a@example.com", "b@example.com"],
        "From: it@example.com\r\nTo: a@example.com, b@example.com\r\nSubject: Quarterly review\r\n\r\nPlease read.\r\n",
    )
    .await;
    assert_eq!(code, 250);
    client.quit().await.unwrap();

    let page = store.list(10, 0).await.unwrap();
    assert_eq!(page.total, 1);

    let message = &page.messages[0];
    let to: BTreeSet<_> = message.to.iter().map(String::as_str).collect();
    assert_eq!(to, BTreeSet::from(["a@example.com", "b@example.com"]));
    assert_eq!(message.subject, "Quarterly review");
    assert_eq!(message.text.as_deref().map(str::trim_end), Some("Please read."));

    server.stop().await;
}

#[tokio::test]
async fn envelope_recipients_fill_in_a_missing_to_header() {
    let (server, store) = server();
    let port = server.start(0).await.unwrap().port();

    let mut client = connect(port).await;
    let code = submit(
        &mut client,
        &["hidden@example.com"],
        "From: it@example.com\r\nSubject: Bcc only\r\n\r\nHi\r\n",
    )
    .await;

    assert_eq!(code, 250);
    assert_eq!(
        store.list(1, 0).await.unwrap().messages[0].to,
        vec!["hidden@example.com"]
    );

    server.stop().await;
}

#[tokio::test]
async fn malformed_body_is_rejected_without_stopping_the_listener() {
    let (server, store) = server();
    let port = server.start(0).await.unwrap().port();

    let mut client = connect(port).await;
    let code = submit(
        &mut client,
        &["a@example.com"],
        "this line is not a header\r\nnor is this\r\n",
    )
    .await;

    assert_eq!(code, 451);
    assert!(server.is_running());
    assert_eq!(store.list(10, 0).await.unwrap().total, 0);

    // Same session, next transaction
    let code = submit(
        &mut client,
        &["a@example.com"],
        "Subject: fine\r\n\r\nok\r\n",
    )
    .await;
    assert_eq!(code, 250);

    // And a brand new connection
    let mut other = connect(port).await;
    assert_eq!(
        submit(&mut other, &["b@example.com"], "Subject: also fine\r\n\r\nok\r\n").await,
        250
    );

    assert_eq!(store.list(10, 0).await.unwrap().total, 2);
    server.stop().await;
}

#[tokio::test]
async fn sessions_run_concurrently() {
    let (server, store) = server();
    let port = server.start(0).await.unwrap().port();

    let clients: Vec<_> = (0..8)
        .map(|n| {
            tokio::spawn(async move {
                let mut client = connect(port).await;
                let rcpt = format!("user{n}@example.com");
                let code = submit(
                    &mut client,
                    &[rcpt.as_str()],
                    &format!("Subject: message {n}\r\n\r\nbody\r\n"),
                )
                .await;
                client.quit().await.unwrap();
                code
            })
        })
        .collect();

    for client in clients {
        assert_eq!(client.await.unwrap(), 250);
    }

    assert_eq!(store.list(100, 0).await.unwrap().total, 8);
    server.stop().await;
}

#[tokio::test]
async fn stop_closes_open_sessions() {
    let (server, _store) = server();
    let port = server.start(0).await.unwrap().port();

    let mut client = connect(port).await;

    tokio::time::timeout(Duration::from_secs(10), server.stop())
        .await
        .expect("stop should not hang on an open session");

    assert!(!server.is_running());
    assert!(client.noop().await.is_err());
}
