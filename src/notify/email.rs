// src/notify/email.rs
use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{NotificationEvent, Notifier};

pub struct EmailNotifier {
    mailer: Option<Mailer>,
}

struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// Builds a mailer only when the full SMTP env is present; otherwise
    /// the notifier is a quiet no-op.
    pub fn from_env() -> Self {
        let mailer = (|| {
            let host = std::env::var("SMTP_HOST").ok()?;
            let user = std::env::var("SMTP_USER").ok()?;
            let pass = std::env::var("SMTP_PASS").ok()?;
            let from_addr = std::env::var("NOTIFY_EMAIL_FROM").ok()?;
            let to_addr = std::env::var("NOTIFY_EMAIL_TO").ok()?;

            let creds = Credentials::new(user, pass);
            let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                .ok()?
                .credentials(creds)
                .build();
            let from: Mailbox = from_addr.parse().ok()?;
            let to: Mailbox = to_addr.parse().ok()?;
            Some(Mailer {
                transport,
                from,
                to,
            })
        })();
        Self { mailer }
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let Some(m) = &self.mailer else {
            tracing::debug!("email disabled (incomplete SMTP env)");
            return Ok(());
        };

        let subject = format!("video-scout: {}", ev.headline());
        let body = format!("{}\nTimestamp: {}\n", ev.headline(), ev.ts.to_rfc3339());

        let msg = Message::builder()
            .from(m.from.clone())
            .to(m.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        m.transport.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
