//! Email facade: `send_email` and `get_latest_email`.
//!
//! Both tools are strict: mail failures are raised as tool errors and
//! surface to the caller as `isError` results.

pub mod mailbox;
pub mod mime;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::protocol::types::{ContentBlock, ToolDescriptor};

use self::mailbox::{CurlMailbox, Mailbox, OutgoingEmail, DEFAULT_IMAP_URL, DEFAULT_SMTP_URL};
use super::errors::ToolError;
use super::registry::{required_str, ToolHandler, ToolRegistry};
use super::server::ToolServer;

pub const SERVER_NAME: &str = "email_mcp";

pub const USER_ENV: &str = "EMAIL_USER";
pub const PASS_ENV: &str = "EMAIL_PASS";
pub const SMTP_URL_ENV: &str = "EMAIL_SMTP_URL";
pub const IMAP_URL_ENV: &str = "EMAIL_IMAP_URL";

pub const SENT_TEXT: &str = "Email sent successfully!";
pub const EMPTY_INBOX_TEXT: &str = "No emails found.";

// ─── Credentials ────────────────────────────────────────────────────────────

/// Mail account credentials. `Debug` never prints the password.
#[derive(Clone)]
pub struct EmailCredentials {
    pub user: String,
    pub password: String,
}

impl EmailCredentials {
    /// Read `EMAIL_USER` / `EMAIL_PASS`. Missing or empty is fatal for this server.
    pub fn from_env() -> Result<Self, ToolError> {
        Ok(Self {
            user: non_empty_env(USER_ENV)?,
            password: non_empty_env(PASS_ENV)?,
        })
    }
}

impl fmt::Debug for EmailCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn non_empty_env(name: &str) -> Result<String, ToolError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ToolError::MissingCredential {
            name: name.to_string(),
        })
}

// ─── Server construction ────────────────────────────────────────────────────

/// Build the registry over any mailbox.
pub fn registry(mailbox: Arc<dyn Mailbox>) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDescriptor {
            name: "send_email".to_string(),
            description: "Send an email via SMTP".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string" },
                    "subject": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["to", "subject", "body"]
            }),
        },
        SendEmailTool {
            mailbox: Arc::clone(&mailbox),
        },
    )?;
    registry.register(
        ToolDescriptor {
            name: "get_latest_email".to_string(),
            description: "Get the latest email from the inbox".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        LatestEmailTool { mailbox },
    )?;
    Ok(registry)
}

/// Build the production server from the environment.
pub fn server_from_env() -> Result<ToolServer, ToolError> {
    let credentials = EmailCredentials::from_env()?;
    let smtp_url = std::env::var(SMTP_URL_ENV).unwrap_or_else(|_| DEFAULT_SMTP_URL.to_string());
    let imap_url = std::env::var(IMAP_URL_ENV).unwrap_or_else(|_| DEFAULT_IMAP_URL.to_string());
    tracing::info!(user = %credentials.user, smtp = %smtp_url, imap = %imap_url, "email facade configured");

    let mailbox = CurlMailbox::new(credentials, smtp_url, imap_url);
    Ok(ToolServer::new(SERVER_NAME, registry(Arc::new(mailbox))?))
}

// ─── Tools ──────────────────────────────────────────────────────────────────

struct SendEmailTool {
    mailbox: Arc<dyn Mailbox>,
}

#[async_trait]
impl ToolHandler for SendEmailTool {
    async fn call(&self, arguments: &serde_json::Value) -> Result<Vec<ContentBlock>, ToolError> {
        let email = OutgoingEmail {
            to: required_str("send_email", arguments, "to")?.to_string(),
            subject: required_str("send_email", arguments, "subject")?.to_string(),
            body: required_str("send_email", arguments, "body")?.to_string(),
        };

        self.mailbox.send(&email).await.map_err(|e| {
            tracing::error!(error = %e, "failed to send email");
            ToolError::Execution {
                tool: "send_email".into(),
                reason: e.to_string(),
            }
        })?;

        tracing::info!("email sent successfully");
        Ok(vec![ContentBlock::text(SENT_TEXT)])
    }
}

struct LatestEmailTool {
    mailbox: Arc<dyn Mailbox>,
}

#[async_trait]
impl ToolHandler for LatestEmailTool {
    async fn call(&self, _arguments: &serde_json::Value) -> Result<Vec<ContentBlock>, ToolError> {
        let raw = self.mailbox.latest_raw().await.map_err(|e| {
            tracing::error!(error = %e, "failed to get latest email");
            ToolError::Execution {
                tool: "get_latest_email".into(),
                reason: e.to_string(),
            }
        })?;

        let Some(raw) = raw else {
            tracing::info!("no emails found");
            return Ok(vec![ContentBlock::text(EMPTY_INBOX_TEXT)]);
        };

        let message = mime::parse_message(&raw);
        let from = message.from.unwrap_or_default();
        let subject = message.subject.unwrap_or_default();
        tracing::info!(from = %from, subject = %subject, "retrieved email");

        Ok(vec![ContentBlock::text(format!(
            "From: {from}\nSubject: {subject}\n\n{}",
            message.body
        ))])
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
