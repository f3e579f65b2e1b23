mod support;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use notification_service::{
    clients::{
        channel::NotificationChannel,
        email::{EmailChannel, SmtpSettings},
        template::TemplateCatalog,
    },
    error::ChannelError,
    models::notification::{NotificationContent, NotificationId},
};
use serde_json::json;
use support::register_request;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

const ID: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f0";

type Transcript = Arc<Mutex<Vec<String>>>;

/// Minimal SMTP server answering every `RCPT TO` with `rcpt_reply`.
async fn smtp_server(rcpt_reply: &'static str) -> Result<(u16, Transcript)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let transcript: Transcript = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&transcript);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, rcpt_reply, Arc::clone(&seen)));
        }
    });

    Ok((port, transcript))
}

async fn serve(stream: TcpStream, rcpt_reply: &'static str, seen: Transcript) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"220 fake.smtp ESMTP\r\n").await?;

    let mut in_data = false;
    while let Some(line) = lines.next_line().await? {
        seen.lock().await.push(line.clone());

        if in_data {
            if line == "." {
                in_data = false;
                write.write_all(b"250 2.0.0 queued\r\n").await?;
            }
            continue;
        }

        let verb = line.get(..4).unwrap_or_default().to_ascii_uppercase();
        let reply = match verb.as_str() {
            "EHLO" | "HELO" => "250 fake.smtp\r\n",
            "RCPT" => rcpt_reply,
            "DATA" => {
                in_data = true;
                "354 end data with <CR><LF>.<CR><LF>\r\n"
            }
            "QUIT" => {
                write.write_all(b"221 2.0.0 bye\r\n").await?;
                break;
            }
            _ => "250 2.1.0 ok\r\n",
        };
        write.write_all(reply.as_bytes()).await?;
    }

    Ok(())
}

fn channel(port: u16) -> Result<EmailChannel> {
    EmailChannel::with_smtp(
        SmtpSettings {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            starttls: false,
            timeout: Duration::from_secs(5),
        },
        "no-reply@example.com",
        TemplateCatalog::default(),
    )
}

/// Test: A rendered template is submitted with the notification id as Message-ID
#[tokio::test]
async fn test_template_email_is_submitted() -> Result<()> {
    let (port, transcript) = smtp_server("250 2.1.5 ok\r\n").await?;

    channel(port)?
        .send(&NotificationId::from(ID), &register_request("ada@example.com"))
        .await?;

    let lines = transcript.lock().await.clone();
    assert!(lines.iter().any(|l| l.starts_with("MAIL FROM:<no-reply@example.com>")));
    assert!(lines.iter().any(|l| l.starts_with("RCPT TO:<ada@example.com>")));
    assert!(
        lines
            .iter()
            .any(|l| l == "Subject: Welcome to Our Service - Complete Registration")
    );
    assert!(lines.iter().any(|l| l.contains(&format!("<{}@example.com>", ID))));

    Ok(())
}

/// Test: A permanent 5xx reply is a rejection
#[tokio::test]
async fn test_permanent_reply_is_rejected() -> Result<()> {
    let (port, _) = smtp_server("550 5.1.1 mailbox unavailable\r\n").await?;

    let result = channel(port)?
        .send(&NotificationId::from(ID), &register_request("ada@example.com"))
        .await;

    assert!(matches!(result, Err(ChannelError::Rejected(_))));

    Ok(())
}

/// Test: A transient 4xx reply is a transport failure
#[tokio::test]
async fn test_transient_reply_is_transport_failure() -> Result<()> {
    let (port, _) = smtp_server("451 4.3.0 try again later\r\n").await?;

    let result = channel(port)?
        .send(&NotificationId::from(ID), &register_request("ada@example.com"))
        .await;

    assert!(matches!(result, Err(ChannelError::Transport(_))));

    Ok(())
}

/// Test: An unreachable server is a transport failure
#[tokio::test]
async fn test_unreachable_server_is_transport_failure() -> Result<()> {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };

    let result = channel(port)?
        .send(&NotificationId::from(ID), &register_request("ada@example.com"))
        .await;

    assert!(matches!(result, Err(ChannelError::Transport(_))));

    Ok(())
}

/// Test: Template values are escaped in the HTML part only
#[tokio::test]
async fn test_html_part_is_escaped() -> Result<()> {
    let (port, transcript) = smtp_server("250 2.1.5 ok\r\n").await?;

    let mut request = register_request("ada@example.com");
    if let NotificationContent::Template { data, .. } = &mut request.content {
        data.insert("name".to_string(), json!("<b>Ada</b>"));
    }

    channel(port)?
        .send(&NotificationId::from(ID), &request)
        .await?;

    let body = transcript.lock().await.join("\n");
    assert!(body.contains("<p>Hi &lt;b&gt;Ada"));
    assert!(!body.contains("<p>Hi <b>"));
    assert!(body.contains("Hi <b>Ada</b>, use the code 482913"));

    Ok(())
}
