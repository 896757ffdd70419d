//! Retry and failure notifications.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use log::{error, warn};

use crate::{
    config::{NotifyConfig, SmtpConfig, SmtpTls},
    error::TaskId,
    secrets::{SMTP_PASSWORD, SecretProvider},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Retry,
    Failure,
}

/// A task attempt that failed, about to be retried or given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub kind: EventKind,
    pub task: TaskId,
    pub attempt: u32,
    pub max_attempts: u32,
    pub owner: String,
    pub run_started_at: NaiveDateTime,
    pub error: String,
}

impl TaskEvent {
    pub fn subject(&self) -> String {
        match self.kind {
            EventKind::Retry => format!(
                "[weather-etl] retrying {} (attempt {}/{})",
                self.task, self.attempt, self.max_attempts
            ),
            EventKind::Failure => format!(
                "[weather-etl] {} failed after {} attempt(s)",
                self.task, self.attempt
            ),
        }
    }

    pub fn body(&self) -> String {
        format!(
            "Task: {}\nRun started: {}\nAttempt: {}/{}\nOwner: {}\n\nError:\n{}\n",
            self.task,
            self.run_started_at.format("%Y-%m-%d %H:%M:%S"),
            self.attempt,
            self.max_attempts,
            self.owner,
            self.error,
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify(&self, event: &TaskEvent) -> Result<()>;
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &TaskEvent) -> Result<()> {
        match event.kind {
            EventKind::Retry => warn!("{}: {}", event.subject(), event.error),
            EventKind::Failure => error!("{}: {}", event.subject(), event.error),
        }
        Ok(())
    }
}

/// Plain-text mail through an SMTP relay.
#[derive(Clone)]
pub struct EmailNotifier {
    from: Mailbox,
    recipients: Vec<Mailbox>,
    transport: SmtpTransport,
}

impl EmailNotifier {
    pub fn new(smtp: &SmtpConfig, recipients: &[String], password: Option<String>) -> Result<Self> {
        let from: Mailbox = smtp
            .from
            .parse()
            .with_context(|| format!("Invalid sender address '{}'", smtp.from))?;

        let recipients = recipients
            .iter()
            .map(|r| {
                r.parse::<Mailbox>()
                    .with_context(|| format!("Invalid notification address '{r}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        let builder = match smtp.tls {
            SmtpTls::Starttls => SmtpTransport::starttls_relay(&smtp.host),
            SmtpTls::Wrapper => SmtpTransport::relay(&smtp.host),
            SmtpTls::None => Ok(SmtpTransport::builder_dangerous(&smtp.host)),
        };
        let mut builder = builder
            .with_context(|| format!("Invalid SMTP relay '{}'", smtp.host))?
            .port(smtp.port);
        if let (Some(username), Some(password)) = (&smtp.username, password) {
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self { from, recipients, transport: builder.build() })
    }
}

fn build_message(from: &Mailbox, recipients: &[Mailbox], event: &TaskEvent) -> Result<Message> {
    let mut builder = Message::builder().from(from.clone()).subject(event.subject());
    for to in recipients {
        builder = builder.to(to.clone());
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(event.body())
        .context("Failed to build notification email")
}

impl fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("from", &self.from.to_string())
            .field("recipients", &self.recipients.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, event: &TaskEvent) -> Result<()> {
        let message = build_message(&self.from, &self.recipients, event)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .context("Notification task panicked")?
            .context("Failed to send notification email")?;

        Ok(())
    }
}

/// Notifiers plus the policy deciding which events reach them.
#[derive(Debug)]
pub struct Notifications {
    pub on_retry: bool,
    pub on_failure: bool,
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Notifications {
    pub fn new(on_retry: bool, on_failure: bool, notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { on_retry, on_failure, notifiers }
    }

    fn wants(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Retry => self.on_retry,
            EventKind::Failure => self.on_failure,
        }
    }

    /// Deliver `event` to every notifier. Delivery failures are logged only.
    pub async fn emit(&self, event: &TaskEvent) {
        if !self.wants(event.kind) {
            return;
        }

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                warn!("Notification via {notifier:?} failed: {e:#}");
            }
        }
    }
}

pub fn notifications_from_config(
    config: &NotifyConfig,
    secrets: &dyn SecretProvider,
) -> Result<Notifications> {
    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];

    if let Some(smtp) = &config.smtp {
        let password = secrets.secret(SMTP_PASSWORD);
        notifiers.push(Box::new(EmailNotifier::new(smtp, &config.email, password)?));
    } else if !config.email.is_empty() {
        warn!(
            "notify.email is set but no [notify.smtp] relay is configured; \
             notifications will only be logged"
        );
    }

    Ok(Notifications::new(config.on_retry, config.on_failure, notifiers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecrets;
    use chrono::NaiveDate;
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
        sync::{Arc, Mutex},
        thread::{self, JoinHandle},
    };

    #[derive(Debug, Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<EventKind>>>);

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, event: &TaskEvent) -> Result<()> {
            self.0.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        async fn notify(&self, _event: &TaskEvent) -> Result<()> {
            anyhow::bail!("relay down")
        }
    }

    fn event(kind: EventKind) -> TaskEvent {
        TaskEvent {
            kind,
            task: TaskId::ExtractWeatherData,
            attempt: 2,
            max_attempts: 3,
            owner: "data-team".into(),
            run_started_at: NaiveDate::from_ymd_opt(2024, 9, 12)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            error: "weather endpoint unreachable".into(),
        }
    }

    #[test]
    fn subject_and_body() {
        let retry = event(EventKind::Retry);
        assert_eq!(
            retry.subject(),
            "[weather-etl] retrying extract_weather_data (attempt 2/3)"
        );
        let body = retry.body();
        assert!(body.contains("Run started: 2024-09-12 00:00:00"));
        assert!(body.contains("Owner: data-team"));

        assert!(event(EventKind::Failure).subject().contains("failed after 2 attempt(s)"));
    }

    #[tokio::test]
    async fn policy_filters_events() {
        let recorder = Recorder::default();
        let notifications = Notifications::new(false, true, vec![Box::new(recorder.clone())]);

        notifications.emit(&event(EventKind::Retry)).await;
        notifications.emit(&event(EventKind::Failure)).await;

        assert_eq!(*recorder.0.lock().unwrap(), vec![EventKind::Failure]);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_stop_other_notifiers() {
        let recorder = Recorder::default();
        let notifications =
            Notifications::new(true, true, vec![Box::new(Broken), Box::new(recorder.clone())]);

        notifications.emit(&event(EventKind::Retry)).await;
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn email_message_lists_all_recipients() {
        let from: Mailbox = "Weather ETL <bot@example.com>".parse().unwrap();
        let recipients: Vec<Mailbox> =
            vec!["a@example.com".parse().unwrap(), "b@example.com".parse().unwrap()];

        let message = build_message(&from, &recipients, &event(EventKind::Failure)).unwrap();
        let to: Vec<String> = message.envelope().to().iter().map(|a| a.to_string()).collect();
        assert_eq!(to, ["a@example.com", "b@example.com"]);
    }

    #[test]
    fn invalid_address_is_rejected() {
        let smtp = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: None,
            from: "bot@example.com".into(),
            tls: SmtpTls::Starttls,
        };
        let err = EmailNotifier::new(&smtp, &["not-an-address".into()], None).unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }

    #[test]
    fn config_without_smtp_logs_only() {
        let cfg = NotifyConfig { email: vec!["a@example.com".into()], ..NotifyConfig::default() };
        let notifications = notifications_from_config(&cfg, &StaticSecrets::new()).unwrap();
        assert_eq!(notifications.notifiers.len(), 1);
    }

    /// Minimal SMTP server for one session. Returns every line the client sent.
    fn smtp_server() -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let _ = writer.write_all(b"220 localhost ESMTP\r\n");

            let mut seen = Vec::new();
            let mut in_data = false;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end().to_string();

                if in_data {
                    if line == "." {
                        in_data = false;
                        let _ = writer.write_all(b"250 queued\r\n");
                    }
                    seen.push(line);
                    continue;
                }

                let verb = line.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
                let reply: &[u8] = match verb.as_str() {
                    "EHLO" => b"250 localhost\r\n",
                    "DATA" => {
                        in_data = true;
                        b"354 end data with .\r\n"
                    }
                    "QUIT" => b"221 bye\r\n",
                    _ => b"250 ok\r\n",
                };
                seen.push(line);
                let _ = writer.write_all(reply);
                if verb == "QUIT" {
                    break;
                }
            }
            seen
        });

        (port, handle)
    }

    fn smtp_config(port: u16, tls: SmtpTls) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".into(),
            port,
            username: None,
            from: "bot@example.com".into(),
            tls,
        }
    }

    #[tokio::test]
    async fn email_is_delivered_over_plain_relay() {
        let (port, server) = smtp_server();
        let notifier =
            EmailNotifier::new(&smtp_config(port, SmtpTls::None), &["a@example.com".into()], None)
                .unwrap();

        notifier.notify(&event(EventKind::Failure)).await.unwrap();

        let seen = server.join().unwrap();
        assert!(seen[0].starts_with("EHLO"));
        assert!(seen.iter().any(|l| l == "RCPT TO:<a@example.com>"));
        assert!(seen.iter().any(|l| l == "Owner: data-team"));
    }

    #[tokio::test]
    async fn default_relay_greets_in_plaintext_before_starttls() {
        let (port, server) = smtp_server();
        let notifier = EmailNotifier::new(
            &smtp_config(port, SmtpTls::default()),
            &["a@example.com".into()],
            None,
        )
        .unwrap();

        // The listener never offers STARTTLS, so delivery is refused after EHLO.
        let err = notifier.notify(&event(EventKind::Failure)).await.unwrap_err();
        assert!(err.to_string().contains("Failed to send notification email"));

        let seen = server.join().unwrap();
        assert!(seen[0].starts_with("EHLO"));
        assert!(!seen.iter().any(|l| l.starts_with("MAIL FROM")));
    }
}
