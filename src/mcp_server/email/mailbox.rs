//! Mailbox backends for the email facade.
//!
//! `CurlMailbox` drives `curl` for SMTPS submission and IMAPS retrieval, so
//! no TLS or mail-protocol stack is linked into the binary.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::EmailCredentials;

/// Default SMTP submission endpoint (implicit TLS).
pub const DEFAULT_SMTP_URL: &str = "smtps://smtp.gmail.com:465";

/// Default IMAP endpoint (implicit TLS).
pub const DEFAULT_IMAP_URL: &str = "imaps://imap.gmail.com:993";

/// Errors from the mail transport.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to run curl: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("invalid header value for {field}: line breaks are not allowed")]
    HeaderInjection { field: &'static str },
}

/// A message to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail operations used by the email tools.
#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;

    /// Raw RFC 822 bytes of the newest INBOX message, or `None` when empty.
    async fn latest_raw(&self) -> Result<Option<Vec<u8>>, MailError>;
}

// ─── CurlMailbox ────────────────────────────────────────────────────────────

pub struct CurlMailbox {
    credentials: EmailCredentials,
    smtp_url: String,
    imap_url: String,
}

impl CurlMailbox {
    pub fn new(credentials: EmailCredentials, smtp_url: String, imap_url: String) -> Self {
        Self {
            credentials,
            smtp_url,
            imap_url: imap_url.trim_end_matches('/').to_string(),
        }
    }

    fn user_arg(&self) -> String {
        format!("{}:{}", self.credentials.user, self.credentials.password)
    }

    async fn imap(&self, url: &str, custom_request: Option<&str>) -> Result<Vec<u8>, MailError> {
        let mut cmd = Command::new("curl");
        cmd.args(["--silent", "--show-error", "--ssl-reqd", "--url", url]);
        cmd.args(["--user", &self.user_arg()]);
        if let Some(request) = custom_request {
            cmd.args(["--request", request]);
        }

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(MailError::Imap(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Mailbox for CurlMailbox {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = compose_message(&self.credentials.user, email)?;

        let mut child = Command::new("curl")
            .args(["--silent", "--show-error", "--ssl-reqd", "--url", &self.smtp_url])
            .args(["--user", &self.user_arg()])
            .args(["--mail-from", &self.credentials.user])
            .args(["--mail-rcpt", &email.to])
            .args(["--upload-file", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            tracing::info!(to = %email.to, "email submitted");
            Ok(())
        } else {
            Err(MailError::Smtp(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn latest_raw(&self) -> Result<Option<Vec<u8>>, MailError> {
        let mailbox_url = format!("{}/INBOX", self.imap_url);
        let listing = self.imap(&mailbox_url, Some("SEARCH ALL")).await?;
        let ids = parse_search_response(&String::from_utf8_lossy(&listing));

        let Some(latest) = ids.last() else {
            return Ok(None);
        };
        tracing::debug!(count = ids.len(), latest = %latest, "inbox search complete");

        let message_url = format!("{mailbox_url};MAILINDEX={latest}");
        self.imap(&message_url, None).await.map(Some)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Message sequence numbers from an untagged `* SEARCH` response, in order.
pub fn parse_search_response(response: &str) -> Vec<u64> {
    response
        .lines()
        .filter_map(|line| line.trim().strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|id| id.parse().ok()))
        .collect()
}

/// Render a plain-text RFC 5322 message.
pub fn compose_message(from: &str, email: &OutgoingEmail) -> Result<String, MailError> {
    let has_break = |s: &str| s.contains('\r') || s.contains('\n');
    if has_break(&email.to) {
        return Err(MailError::HeaderInjection { field: "to" });
    }
    if has_break(&email.subject) {
        return Err(MailError::HeaderInjection { field: "subject" });
    }

    let body = email.body.replace("\r\n", "\n").replace('\n', "\r\n");
    Ok(format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n{body}\r\n",
        to = email.to,
        subject = email.subject,
    ))
}
