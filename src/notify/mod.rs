//! Operator notifications over a chat webhook and e-mail.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::NotificationConfig;
use crate::errors::{BackupError, Result};
use crate::utils::find_executable;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl Severity {
    fn icon(&self) -> &'static str {
        match self {
            Severity::Ok => "✅",
            Severity::Warning => "⚠️",
            Severity::Critical => "🚨",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub details: BTreeMap<String, Value>,
}

impl Notification {
    pub fn new(title: impl Into<String>, severity: Severity, environment: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            severity,
            timestamp: Utc::now(),
            environment: environment.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// One-line summary used as the chat message and e-mail subject.
    pub fn headline(&self) -> String {
        format!(
            "{} [{}] {} ({})",
            self.severity.icon(),
            self.environment,
            self.title,
            self.severity
        )
    }

    fn body(&self) -> String {
        let mut body = format!(
            "{}\n\nTime: {}\nEnvironment: {}\nSeverity: {}\n",
            self.title,
            self.timestamp.to_rfc3339(),
            self.environment,
            self.severity
        );
        for (key, value) in &self.details {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            body.push_str(&format!("{}: {}\n", key, rendered));
        }
        body
    }
}

/// Delivers notifications to every configured channel. Delivery problems are
/// logged and never returned to the caller.
#[derive(Debug, Clone)]
pub struct Notifier {
    config: NotificationConfig,
    client: Client,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| BackupError::Notification(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn is_configured(&self) -> bool {
        self.config.webhook_url.is_some() || !self.config.email_to.is_empty()
    }

    /// Returns how many channels accepted the notification.
    pub async fn send(&self, notification: &Notification) -> usize {
        if !self.is_configured() {
            tracing::debug!("No notification channel configured, dropping: {}", notification.headline());
            return 0;
        }

        let mut delivered = 0;
        if let Some(url) = &self.config.webhook_url {
            match self.post_webhook(url, notification).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Webhook notification failed: {}", e),
            }
        }

        if !self.config.email_to.is_empty() {
            let email = self.render_email(notification);
            let outcome = tokio::task::spawn_blocking(move || send_with_sendmail(&email))
                .await
                .map_err(BackupError::from)
                .and_then(|r| r);
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("E-mail notification failed: {}", e),
            }
        }

        tracing::info!("📣 {} delivered to {} channel(s)", notification.headline(), delivered);
        delivered
    }

    async fn post_webhook(&self, url: &str, notification: &Notification) -> Result<()> {
        let payload = json!({
            "text": notification.headline(),
            "title": notification.title,
            "severity": notification.severity,
            "timestamp": notification.timestamp.to_rfc3339(),
            "environment": notification.environment,
            "details": notification.details,
        });

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackupError::Notification(format!(
                "webhook answered HTTP {}: {}",
                status, text
            )));
        }
        Ok(())
    }

    fn render_email(&self, notification: &Notification) -> String {
        let from = self
            .config
            .email_from
            .clone()
            .unwrap_or_else(|| "inventory-backup@localhost".to_string());
        format!(
            "To: {}\nFrom: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.config.email_to.join(", "),
            from,
            notification.headline(),
            notification.body()
        )
    }
}

fn send_with_sendmail(message: &str) -> Result<()> {
    let sendmail = find_executable("sendmail")
        .map_err(|e| BackupError::Notification(e.to_string()))?;
    let mut child = Command::new(sendmail)
        .arg("-t")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(message.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(BackupError::Notification(format!(
            "sendmail exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Local webhook that accepts one JSON POST and hands back the raw request.
    pub(crate) async fn capture_webhook() -> std::io::Result<(String, JoinHandle<std::io::Result<String>>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}/hook", listener.local_addr()?);
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut received = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let text = String::from_utf8_lossy(&received);
                if text.contains("\"title\"") && text.ends_with('}') {
                    break;
                }
                let n = socket.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await?;
            Ok(String::from_utf8_lossy(&received).to_string())
        });
        Ok((url, server))
    }

    fn sample() -> Notification {
        Notification::new("Backup failed", Severity::Critical, "production")
            .detail("tier", "daily")
            .detail("error_kind", "dump")
            .detail("attempts", 3)
    }

    #[test]
    fn test_headline_and_body() {
        let notification = sample();
        assert_eq!(notification.headline(), "🚨 [production] Backup failed (critical)");
        let body = notification.body();
        assert!(body.contains("tier: daily"));
        assert!(body.contains("attempts: 3"));
    }

    #[test]
    fn test_email_headers() -> anyhow::Result<()> {
        let notifier = Notifier::new(NotificationConfig {
            webhook_url: None,
            email_to: vec!["ops@example.com".to_string(), "dba@example.com".to_string()],
            email_from: Some("backups@example.com".to_string()),
        })?;
        let email = notifier.render_email(&sample());
        assert!(email.starts_with("To: ops@example.com, dba@example.com\nFrom: backups@example.com\n"));
        assert!(email.contains("Subject: 🚨 [production] Backup failed (critical)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_is_silent() -> anyhow::Result<()> {
        let notifier = Notifier::new(NotificationConfig::default())?;
        assert!(!notifier.is_configured());
        assert_eq!(notifier.send(&sample()).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_logged_not_raised() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let notifier = Notifier::new(NotificationConfig {
            webhook_url: Some(format!("http://{}/hook", addr)),
            ..Default::default()
        })?;
        assert_eq!(notifier.send(&sample()).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_webhook_receives_structured_payload() -> anyhow::Result<()> {
        let (url, server) = capture_webhook().await?;

        let notifier = Notifier::new(NotificationConfig {
            webhook_url: Some(url),
            ..Default::default()
        })?;
        assert_eq!(notifier.send(&sample()).await, 1);

        let request = server.await??;
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("\"severity\":\"critical\""));
        assert!(request.contains("\"environment\":\"production\""));
        Ok(())
    }
}
