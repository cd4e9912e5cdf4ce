#![allow(dead_code)]

use std::sync::Arc;

use lure::MailSubsystem;
use lure_common::config::{ClientTimeouts, EnvOverrides, StoredConfigPatch};
use lure_smtp::{
    SessionConfig,
    client::{ClientOptions, SmtpClient},
};
use lure_store::{MemoryConfigStore, MemoryMessageStore};

/// A subsystem over memory stores that ignores the process environment.
pub async fn subsystem() -> MailSubsystem {
    subsystem_with_env(EnvOverrides::default()).await
}

pub async fn subsystem_with_env(env: EnvOverrides) -> MailSubsystem {
    build(env, 0).await
}

/// A subsystem whose capture-mode sends start the listener on `port`.
pub async fn subsystem_with_capture_port(port: u16) -> MailSubsystem {
    build(EnvOverrides::default(), port).await
}

async fn build(env: EnvOverrides, capture_port: u16) -> MailSubsystem {
    MailSubsystem::builder(
        Arc::new(MemoryMessageStore::new()),
        Arc::new(MemoryConfigStore::new()),
    )
    .env(env)
    .capture_port(capture_port)
    .session_config(SessionConfig::default().with_banner("capture.test"))
    .client_options(ClientOptions {
        helo_name: "lure.test".to_string(),
        accept_invalid_certs: false,
        timeouts: ClientTimeouts {
            connect_secs: 2,
            command_secs: 2,
            data_secs: 5,
            verify_secs: 5,
        },
    })
    .build()
    .await
    .unwrap()
}

/// Switch the global stored config to capture mode.
pub async fn use_capture(mail: &MailSubsystem) {
    mail.update_stored_config(
        StoredConfigPatch {
            use_capture: Some(true),
            ..StoredConfigPatch::default()
        },
        None,
    )
    .await
    .unwrap();
}

/// Switch to capture mode and start the listener on a free port.
pub async fn capturing(mail: &MailSubsystem) -> u16 {
    use_capture(mail).await;
    mail.start_capture(0).await.unwrap().port()
}

pub async fn connect(port: u16) -> SmtpClient {
    let mut client = SmtpClient::connect("127.0.0.1", port, false, ClientOptions::default())
        .await
        .unwrap();
    client.read_greeting().await.unwrap();
    client.ehlo("client.test").await.unwrap();
    client
}

/// Run one raw transaction and return the final reply code.
pub async fn submit(client: &mut SmtpClient, recipients: &[&str], body: &str) -> u16 {
    assert!(client.mail_from("it@example.com").await.unwrap().is_success());
    for rcpt in recipients {
        assert!(client.rcpt_to(rcpt).await.unwrap().is_success());
    }
    assert_eq!(client.data().await.unwrap().code, 354);
    client.send_data(body).await.unwrap().code
}
