use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::time::Duration;

use crate::models::{JobPosting, MatchResult};

// Discord rejects message content longer than this
const DISCORD_MAX_CONTENT: usize = 2000;

/// Delivers a match to the operator. Delivery is best effort.
pub trait Notifier {
    fn send_match(&self, posting: &JobPosting, result: &MatchResult) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::blocking::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { webhook_url, client })
    }
}

impl Notifier for DiscordNotifier {
    fn send_match(&self, posting: &JobPosting, result: &MatchResult) -> Result<()> {
        let message = format_match_message(posting, result);
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&WebhookPayload { content: &message })
            .send()
            .context("Failed to send Discord webhook")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("Discord webhook failed with status {}: {}", status, body));
        }
        tracing::info!(title = %posting.title, url = %posting.url, "match sent to discord");
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_match(&self, posting: &JobPosting, result: &MatchResult) -> Result<()> {
        tracing::info!(
            title = %posting.title,
            company = %posting.company,
            url = %posting.url,
            percentage = ?result.match_percentage,
            reason = %result.reason,
            "job match"
        );
        Ok(())
    }
}

pub fn format_match_message(posting: &JobPosting, result: &MatchResult) -> String {
    let mut message = format!(
        "🚀 **New Job Match Found!**\n**Position:** {}\n**Company:** {}\n**URL:** {}\n",
        posting.title, posting.company, posting.url
    );
    if let Some(pct) = result.match_percentage {
        message.push_str(&format!("**Match:** {}%\n", pct));
    }
    if !result.matching_skills.is_empty() {
        message.push_str(&format!("**Matching skills:** {}\n", result.matching_skills.join(", ")));
    }
    if !result.reason.is_empty() {
        message.push_str(&format!("\n**Why:** {}", result.reason));
    }

    if message.chars().count() > DISCORD_MAX_CONTENT {
        let mut cut: String = message.chars().take(DISCORD_MAX_CONTENT - 3).collect();
        cut.push_str("...");
        return cut;
    }
    message
}
