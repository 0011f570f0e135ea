//! Operator notices
//!
//! Startup, shutdown and failure notices are sent as DMs to every control
//! user. Delivery problems are logged and never reach the runtime loop.

use crate::rest::{RestAction, RestExecutor};
use crate::session::RunState;
use gateway_common::NotifySettings;
use gateway_core::Snowflake;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const CLIENT_TITLE: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// What happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Startup,
    Shutdown,
    Failure { message: String, state: RunState },
}

impl Notice {
    fn content(&self) -> &'static str {
        match self {
            Self::Startup => "Bot is ready and online.",
            Self::Shutdown => "Bot ending process and exits, shutdown scheduled.",
            Self::Failure { .. } => "Gateway client encountered an error!",
        }
    }
}

/// Identity of the connected bot, learned from READY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: Snowflake,
    pub username: String,
}

/// Sends notices to the configured control users
#[derive(Debug, Clone)]
pub struct Notifier {
    recipients: Vec<Snowflake>,
    notify_on_failure: bool,
    bot: Option<BotIdentity>,
    /// Per-recipient bound on DM channel lookup plus message post
    delivery_timeout: Duration,
}

impl Notifier {
    pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new(settings: &NotifySettings) -> Self {
        Self {
            recipients: settings.control_user_ids.clone(),
            notify_on_failure: settings.notify_on_failure,
            bot: None,
            delivery_timeout: Self::DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    pub fn set_bot(&mut self, bot: BotIdentity) {
        self.bot = Some(bot);
    }

    #[must_use]
    pub fn bot(&self) -> Option<&BotIdentity> {
        self.bot.as_ref()
    }

    /// Message body for a notice, `None` when it should not be sent
    #[must_use]
    pub fn message_for(&self, notice: &Notice) -> Option<Value> {
        if self.recipients.is_empty() {
            return None;
        }
        if matches!(notice, Notice::Failure { .. }) && !self.notify_on_failure {
            return None;
        }

        let (name, id) = match &self.bot {
            Some(bot) => (bot.username.clone(), bot.id.to_string()),
            None => (String::from("unknown"), String::from("unknown")),
        };

        let embed = match notice {
            Notice::Startup | Notice::Shutdown => json!({
                "title": CLIENT_TITLE,
                "description": "Bot details",
                "fields": [
                    {"name": "Bot name", "value": name, "inline": false},
                    {"name": "Bot Snowflake ID", "value": id, "inline": false},
                ],
            }),
            Notice::Failure { message, state } => json!({
                "title": CLIENT_TITLE,
                "description": "Gateway error:",
                "fields": [
                    {"name": "Bot name", "value": name, "inline": false},
                    {"name": "Error message", "value": message, "inline": false},
                    {"name": "New state", "value": state.as_str(), "inline": false},
                ],
            }),
        };

        Some(json!({ "content": notice.content(), "embed": embed }))
    }

    /// Deliver a notice to every recipient, returning how many succeeded
    pub async fn send<R>(&self, rest: &R, notice: &Notice) -> usize
    where
        R: RestExecutor + ?Sized,
    {
        let Some(message) = self.message_for(notice) else {
            return 0;
        };

        let mut delivered = 0;
        for recipient in &self.recipients {
            let delivery = deliver(rest, *recipient, message.clone());
            match tokio::time::timeout(self.delivery_timeout, delivery).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(%recipient, error = %e, "Notice delivery failed"),
                Err(_) => warn!(
                    %recipient,
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "Notice delivery timed out"
                ),
            }
        }

        debug!(?notice, delivered, "Notice sent");
        delivered
    }
}

/// Open a DM channel and post the message into it
async fn deliver<R>(rest: &R, recipient: Snowflake, mut message: Value) -> anyhow::Result<()>
where
    R: RestExecutor + ?Sized,
{
    let channel = rest
        .execute(RestAction::CreateDm, json!({ "recipient_id": recipient }))
        .await?;
    let channel_id = channel
        .str_field("id")
        .ok_or_else(|| anyhow::anyhow!("DM channel response has no id"))?;

    message["channel_id"] = Value::String(channel_id.to_string());
    rest.execute(RestAction::CreateMessage, message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::{RestError, RestResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingRest {
        calls: Mutex<Vec<(RestAction, Value)>>,
        fail_dm_for: Option<String>,
    }

    #[async_trait]
    impl RestExecutor for RecordingRest {
        async fn execute(&self, action: RestAction, params: Value) -> Result<RestResponse, RestError> {
            self.calls.lock().push((action, params.clone()));
            match action {
                RestAction::CreateDm => {
                    let recipient = params["recipient_id"].as_str().unwrap_or_default().to_string();
                    if self.fail_dm_for.as_deref() == Some(recipient.as_str()) {
                        return Err(RestError::Status { action, status: 403 });
                    }
                    Ok(RestResponse::new(200, json!({ "id": format!("dm-{recipient}") })))
                }
                _ => Ok(RestResponse::new(200, json!({}))),
            }
        }
    }

    fn settings(users: &[u64], notify_on_failure: bool) -> NotifySettings {
        NotifySettings {
            control_user_ids: users.iter().copied().map(Snowflake::new).collect(),
            notify_on_failure,
        }
    }

    #[tokio::test]
    async fn test_startup_notice_goes_to_every_control_user() {
        let mut notifier = Notifier::new(&settings(&[1, 2], true));
        notifier.set_bot(BotIdentity {
            id: Snowflake::new(99),
            username: "bot".into(),
        });
        let rest = RecordingRest::default();

        assert_eq!(notifier.send(&rest, &Notice::Startup).await, 2);

        let calls = rest.calls.lock();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].0, RestAction::CreateDm);
        assert_eq!(calls[0].1["recipient_id"], "1");
        assert_eq!(calls[1].0, RestAction::CreateMessage);
        assert_eq!(calls[1].1["channel_id"], "dm-1");
        assert_eq!(calls[1].1["content"], "Bot is ready and online.");
        assert_eq!(calls[1].1["embed"]["fields"][1]["value"], "99");
    }

    #[tokio::test]
    async fn test_failure_notice_respects_setting() {
        let failure = Notice::Failure {
            message: "close 4000".into(),
            state: RunState::Reconnecting,
        };

        let silent = Notifier::new(&settings(&[1], false));
        assert!(silent.message_for(&failure).is_none());
        assert!(silent.message_for(&Notice::Shutdown).is_some());

        let loud = Notifier::new(&settings(&[1], true));
        let message = loud.message_for(&failure).unwrap();
        assert_eq!(message["embed"]["fields"][2]["value"], "reconnecting");
    }

    #[tokio::test]
    async fn test_delivery_errors_are_swallowed() {
        let notifier = Notifier::new(&settings(&[1, 2], true));
        let rest = RecordingRest {
            fail_dm_for: Some("1".into()),
            ..RecordingRest::default()
        };

        assert_eq!(notifier.send(&rest, &Notice::Shutdown).await, 1);
        // Failed DM for user 1 skips its message; user 2 gets DM + message
        assert_eq!(rest.calls.lock().len(), 3);
    }

    struct StalledRest;

    #[async_trait]
    impl RestExecutor for StalledRest {
        async fn execute(&self, _action: RestAction, _params: Value) -> Result<RestResponse, RestError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_delivery_is_abandoned() {
        let notifier = Notifier::new(&settings(&[1, 2], true))
            .with_delivery_timeout(Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        assert_eq!(notifier.send(&StalledRest, &Notice::Shutdown).await, 0);
        // Each recipient waits out one full timeout
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(4) && waited < Duration::from_secs(5));
    }

    #[test]
    fn test_no_recipients_sends_nothing() {
        let notifier = Notifier::new(&NotifySettings::default());
        assert!(notifier.message_for(&Notice::Startup).is_none());
    }
}
