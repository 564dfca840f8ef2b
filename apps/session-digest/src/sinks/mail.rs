use crate::config::{MailConfig, SmtpSecurity};
use crate::error::DigestError;
use crate::sinks::report::Report;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const ATTACHMENT_NAME: &str = "Morning check backup.html";

/// Sends the rendered report over SMTP.
pub struct MailSink {
    config: MailConfig,
    timeout: Duration,
}

impl MailSink {
    pub fn new(config: MailConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    pub async fn send(&self, report: &Report) -> Result<usize, DigestError> {
        let message = build_message(&self.config, report)?;
        let transport = self.transport()?;
        transport.send(message).await?;
        tracing::info!(
            host = %self.config.host,
            recipients = self.config.to.len(),
            "mailed digest report"
        );
        Ok(self.config.to.len())
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DigestError> {
        let host = self.config.host.as_str();
        let builder = match self.config.security {
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
        };
        let mut builder = builder.port(self.config.port).timeout(Some(self.timeout));
        if let Some(username) = &self.config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            ));
        }
        Ok(builder.build())
    }
}

/// HTML body plus the same page as an attachment.
pub fn build_message(config: &MailConfig, report: &Report) -> Result<Message, DigestError> {
    let mut builder = Message::builder()
        .from(config.from.parse::<Mailbox>()?)
        .subject(report.subject.as_str());
    for rcpt in &config.to {
        builder = builder.to(rcpt.parse::<Mailbox>()?);
    }
    let body = MultiPart::mixed()
        .singlepart(SinglePart::html(report.html.clone()))
        .singlepart(
            Attachment::new(ATTACHMENT_NAME.to_string())
                .body(report.html.clone(), ContentType::TEXT_HTML),
        );
    Ok(builder.multipart(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MailConfig {
        MailConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            security: SmtpSecurity::None,
            from: "Digest <digest@example.com>".to_string(),
            to: vec!["ops@example.com".to_string(), "backup@example.com".to_string()],
            username: None,
            password: None,
        }
    }

    fn report() -> Report {
        Report {
            subject: "Morning check backup - T:1".to_string(),
            html: "<p>digest</p>".to_string(),
        }
    }

    #[test]
    fn message_carries_subject_recipients_and_attachment() {
        let message = build_message(&config(), &report()).expect("message");
        let envelope = message.envelope();
        assert_eq!(envelope.to().len(), 2);
        assert_eq!(
            envelope.from().map(|from| from.to_string()).as_deref(),
            Some("digest@example.com")
        );

        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("Subject: Morning check backup - T:1"));
        assert!(raw.contains("Morning check backup.html"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn invalid_recipient_is_an_error() {
        let mut config = config();
        config.to.push("not an address".to_string());
        assert!(matches!(
            build_message(&config, &report()),
            Err(DigestError::MailAddress(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_relay_fails() {
        let sink = MailSink::new(config(), Duration::from_secs(2));
        assert!(matches!(sink.send(&report()).await, Err(DigestError::Smtp(_))));
    }
}
