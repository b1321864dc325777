// src/notify/discord.rs
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{NotificationEvent, Notifier};

pub struct DiscordNotifier {
    webhook: Option<String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn from_env() -> Self {
        Self {
            webhook: std::env::var("DISCORD_WEBHOOK_URL").ok(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn new(webhook: String) -> Self {
        Self {
            webhook: Some(webhook),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let Some(webhook) = &self.webhook else {
            tracing::debug!("Discord disabled (no DISCORD_WEBHOOK_URL)");
            return Ok(());
        };

        let payload = DiscordWebhookPayload::embed(
            "video-scout",
            &format!("{}\n**Time (UTC):** {}", ev.headline(), ev.ts.to_rfc3339()),
        );

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Discord webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Discord webhook request failed: {e}"));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(title: &str, description: &str) -> Self {
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: description.to_string(),
            }],
        }
    }
}
