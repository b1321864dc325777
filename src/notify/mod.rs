// src/notify/mod.rs
//! Fire-and-forget operational notifications: quota exhaustion and
//! unexpected errors, fanned out to whichever channels are configured via
//! env. The engine never blocks on these and their failures are non-fatal.

pub mod discord;
pub mod email;
pub mod slack;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::quota::QuotaEvent;

#[derive(Debug, Clone)]
pub enum NotificationKind {
    QuotaLimitReached {
        api_name: String,
        reset_at: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub ts: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn quota_limit_reached(api_name: impl Into<String>, reset_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::QuotaLimitReached {
                api_name: api_name.into(),
                reset_at,
            },
            ts: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error {
                message: message.into(),
            },
            ts: Utc::now(),
        }
    }

    pub fn headline(&self) -> String {
        match &self.kind {
            NotificationKind::QuotaLimitReached { api_name, reset_at } => format!(
                "{} daily quota exhausted; resets at {}",
                api_name,
                reset_at.to_rfc3339()
            ),
            NotificationKind::Error { message } => format!("video-scout error: {message}"),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ev: &NotificationEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fans one event out to all configured channels. Channels with missing env
/// configuration simply skip sending.
pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn from_env() -> Self {
        Self {
            notifiers: vec![
                Box::new(slack::SlackNotifier::from_env()),
                Box::new(discord::DiscordNotifier::from_env()),
                Box::new(email::EmailNotifier::from_env()),
            ],
        }
    }

    pub fn with_notifiers(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub async fn notify(&self, ev: &NotificationEvent) {
        for n in &self.notifiers {
            if let Err(e) = n.send(ev).await {
                tracing::warn!(notifier = n.name(), error = %e, "notification failed");
            }
        }
    }
}

/// Forward admission-control events to the notifier mux. Only exhaustion is
/// user-facing; threshold crossings and resets stay in the logs.
pub fn spawn_quota_listener(
    mut events: tokio::sync::mpsc::UnboundedReceiver<QuotaEvent>,
    mux: NotifierMux,
    api_name: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            match ev {
                QuotaEvent::Exhausted { next_reset_at, .. } => {
                    let note = NotificationEvent::quota_limit_reached(&api_name, next_reset_at);
                    mux.notify(&note).await;
                }
                QuotaEvent::ThresholdReached { level, snapshot } => {
                    tracing::info!(
                        ?level,
                        used = snapshot.used,
                        limit = snapshot.limit,
                        "quota threshold notification"
                    );
                }
                QuotaEvent::BudgetReset { snapshot } => {
                    tracing::info!(limit = snapshot.limit, "quota reset notification");
                }
            }
        }
    })
}
