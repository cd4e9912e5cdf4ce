//! Command-line entry point for the lure mail core.
//!
//! - `serve` runs the capture listener until interrupted
//! - `messages` inspects and prunes captured mail
//! - `config` shows and edits the stored outbound configuration
//! - `send-test` sends a test message through the configured transport

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lure::{MailError, MailSubsystem, controller::Lure};
use lure_common::{
    config::{DisplayConfig, StoredConfigPatch, UserId},
    logging,
    message::{CapturedMessage, MessageId},
};
use lure_smtp::client::{ClientOptions, SmtpClient};
use lure_store::Page;

/// Mail delivery core of the lure phishing-awareness platform
#[derive(Parser, Debug)]
#[command(name = "lure")]
#[command(about = "Capture listener and outbound mail tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: $LURE_CONFIG, ./lure.config.ron, /etc/lure/lure.config.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the capture listener until Ctrl-C or SIGTERM
    Serve,
    /// Inspect captured messages
    Messages {
        #[command(subcommand)]
        action: MessagesAction,
    },
    /// Show or change the stored outbound configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Send a test message with the current configuration
    SendTest {
        /// Recipient address
        to: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Check whether a capture listener is answering on the configured port
    CaptureStatus,
}

#[derive(Subcommand, Debug)]
enum MessagesAction {
    /// List captured messages, newest first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Show one message in full
    Show {
        message_id: String,
        /// Also print every header
        #[arg(long)]
        headers: bool,
    },
    /// Delete one message
    Delete { message_id: String },
    /// Delete every captured message
    Clear {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Messages addressed to a recipient
    Search {
        recipient: String,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show the effective configuration with secrets masked
    Show {
        /// Per-user scope
        #[arg(long)]
        user: Option<String>,
    },
    /// Update stored fields; omitted fields are kept, an empty value clears
    Set {
        /// Per-user scope
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        secure: Option<bool>,
        #[arg(long)]
        username: Option<String>,
        /// Pass "" to clear the stored password
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        rate_limit: Option<u32>,
        #[arg(long)]
        capture: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let lure: Lure = ron::from_str(&content)?;

    match cli.command {
        Commands::Serve => return lure.run().await,
        Commands::CaptureStatus => return capture_status(&lure).await,
        _ => {}
    }

    let mail = lure.subsystem().await?;
    match cli.command {
        Commands::Messages { action } => messages(&mail, action).await?,
        Commands::Config { action } => config(&mail, action).await?,
        Commands::SendTest { to, subject, body } => {
            let report = mail
                .send_test_message(&to, subject.as_deref(), body.as_deref())
                .await?;
            println!("Message ID: {}", report.message_id);
            println!("Accepted:   {}", report.accepted.join(", "));
            if !report.rejected.is_empty() {
                println!("Rejected:   {}", report.rejected.join(", "));
            }
            println!("Response:   {}", report.raw_response);
        }
        Commands::Serve | Commands::CaptureStatus => {}
    }

    Ok(())
}

async fn messages(mail: &MailSubsystem, action: MessagesAction) -> anyhow::Result<()> {
    match action {
        MessagesAction::List { limit, offset } => {
            print_page(&mail.list_messages(limit, offset).await?, offset);
        }
        MessagesAction::Show {
            message_id,
            headers,
        } => {
            let message = mail.get_message(&parse_id(&message_id)?).await?;
            print_message(&message, headers);
        }
        MessagesAction::Delete { message_id } => {
            if mail.delete_message(&parse_id(&message_id)?).await? {
                println!("Deleted {message_id}");
            } else {
                println!("No message {message_id}; nothing to delete");
            }
        }
        MessagesAction::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to delete every captured message without --yes");
            }
            let removed = mail.clear_messages().await?;
            println!("Deleted {removed} message(s)");
        }
        MessagesAction::Search {
            recipient,
            limit,
            offset,
        } => {
            print_page(
                &mail.search_messages(&recipient, limit, offset).await?,
                offset,
            );
        }
    }

    Ok(())
}

async fn config(mail: &MailSubsystem, action: ConfigAction) -> anyhow::Result<()> {
    let view = match action {
        ConfigAction::Show { user } => {
            let user = user.map(UserId::new).transpose()?;
            mail.get_display_config(user.as_ref()).await?
        }
        ConfigAction::Set {
            user,
            host,
            port,
            secure,
            username,
            password,
            from,
            rate_limit,
            capture,
        } => {
            let user = user.map(UserId::new).transpose()?;
            let patch = StoredConfigPatch {
                host,
                port,
                secure,
                username,
                password,
                from_address: from,
                rate_limit_per_minute: rate_limit,
                use_capture: capture,
            };
            mail.update_stored_config(patch, user.as_ref()).await?
        }
    };

    print_config(&view);
    Ok(())
}

async fn capture_status(lure: &Lure) -> anyhow::Result<()> {
    let port = lure.capture.port;
    let probe = async {
        let mut client =
            SmtpClient::connect("127.0.0.1", port, false, ClientOptions::default()).await?;
        let greeting = client.read_greeting().await?;
        let _ = client.quit().await;
        Ok::<_, lure_smtp::client::ClientError>(greeting)
    };

    match probe.await {
        Ok(greeting) => println!("Capture listener on port {port}: {}", greeting.message()),
        Err(err) => println!("No capture listener on port {port} ({err})"),
    }

    Ok(())
}

fn parse_id(raw: &str) -> Result<MessageId, MailError> {
    raw.parse()
        .map_err(|_| MailError::InvalidMessageId(raw.to_string()))
}

fn print_page(page: &Page, offset: usize) {
    println!(
        "{:<28} {:<25} {:<30} {:<40}",
        "MESSAGE ID", "RECEIVED", "FROM", "SUBJECT"
    );
    println!("{}", "-".repeat(125));

    for message in &page.messages {
        println!(
            "{:<28} {:<25} {:<30} {:<40}",
            message.id,
            message.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            truncate(&message.from, 30),
            truncate(&message.subject, 40)
        );
    }

    println!(
        "\nShowing {}-{} of {} message(s)",
        if page.messages.is_empty() { 0 } else { offset + 1 },
        offset + page.messages.len(),
        page.total
    );
}

fn print_message(message: &CapturedMessage, headers: bool) {
    println!("Message ID: {}", message.id);
    println!("Received:   {}", message.received_at.to_rfc3339());
    println!("Stored:     {}", message.created_at.to_rfc3339());
    println!("Size:       {} bytes", message.size);
    println!("From:       {}", message.from);
    println!("To:         {}", message.to.join(", "));
    println!("Subject:    {}", message.subject);

    if headers {
        println!();
        println!("Headers:");
        for (name, value) in &message.headers {
            println!("  {name}: {value}");
        }
    }

    if let Some(text) = &message.text {
        println!();
        println!("--- text/plain ---");
        println!("{text}");
    }
    if let Some(html) = &message.html {
        println!();
        println!("--- text/html ---");
        println!("{html}");
    }
}

fn print_config(view: &DisplayConfig) {
    println!("Mode:         {}", view.mode);
    println!("Host:         {}", view.host);
    println!("Port:         {}", view.port);
    println!("Secure:       {}", view.secure);
    println!(
        "Username:     {}",
        view.username.as_deref().unwrap_or("(none)")
    );
    println!(
        "Password:     {}",
        if view.has_password { "(set)" } else { "(none)" }
    );
    println!("From:         {}", view.from_address);
    println!("Rate limit:   {}/min", view.rate_limit_per_minute);

    if !view.env_overrides.is_empty() {
        println!("Overridden by environment: {}", view.env_overrides.join(", "));
    }
    if let Some(problem) = &view.problem {
        println!();
        println!("Problem: {problem}");
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut truncated: String = value.chars().take(width.saturating_sub(1)).collect();
        truncated.push('…');
        truncated
    }
}

/// Find the configuration file using the following precedence:
/// 1. `LURE_CONFIG` environment variable
/// 2. ./lure.config.ron (current working directory)
/// 3. /etc/lure/lure.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("LURE_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("LURE_CONFIG points to non-existent file: {}", path.display());
    }

    let default_paths = [
        PathBuf::from("./lure.config.ron"),
        PathBuf::from("/etc/lure/lure.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - LURE_CONFIG environment variable\n{paths_tried}"
    )
}
