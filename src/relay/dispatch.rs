//! Dispatch engine - routes one inbound message to matching subscribers.
//!
//! For a message from a watched chat, every active subscriber's keywords are
//! scanned in stored order and the first match triggers one delivery: a
//! header naming the source chat and keyword, then a forward of the original.
//!
//! Delivery failures never reach the sender and never stop delivery to other
//! subscribers. Transient errors are retried with exponential backoff, and a
//! server `retry_after` hint is honoured up to the backoff cap. Rejected
//! requests fail the delivery without a retry. A
//! subscriber is unsubscribed when the transport reports them permanently
//! unreachable, either directly or through a reachability probe after the
//! retries ran out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::relay::matcher::NormalizedText;
use crate::relay::message::{IncomingMessage, SourceChat};
use crate::relay::store::{StoreError, SubscriptionStore, WatchedChat};
use crate::relay::transport::{ErrorKind, Transport, TransportError};

/// Retry settings for outbound calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Attempts per outbound call, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that got header and forward.
    pub delivered: Vec<i64>,
    /// Subscribers whose delivery failed.
    pub failed: Vec<i64>,
    /// Failed subscribers that were switched off.
    pub unsubscribed: Vec<i64>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

pub struct DispatchEngine {
    store: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn SubscriptionStore>, transport: Arc<dyn Transport>, policy: DeliveryPolicy) -> Self {
        Self { store, transport, policy }
    }

    /// Route `message` from `chat` to every subscriber with a matching keyword.
    ///
    /// Only store reads fail the whole call. A failed write while switching
    /// off an unreachable subscriber is logged and skipped.
    pub async fn handle_incoming(
        &self,
        chat: &SourceChat,
        message: &IncomingMessage,
    ) -> Result<DispatchReport, StoreError> {
        let mut report = DispatchReport::default();

        if !self.store.is_watched(chat.id)? {
            return Ok(report);
        }

        let Some(text) = message.matchable_text() else {
            return Ok(report);
        };
        let text = NormalizedText::new(text);

        for subscriber in self.store.active_subscribers()? {
            let Some(keyword) = text.first_match(&subscriber.keywords) else {
                continue;
            };

            debug!("msg {} in {} matched '{}' for {}", message.message_id, chat.id, keyword, subscriber.id);
            let header = render_header(chat, message, keyword);

            match self.deliver(subscriber.id, chat.id, message.message_id, &header).await {
                Ok(()) => {
                    info!("📨 Forwarded msg {} from {} to {} (keyword '{}')", message.message_id, chat.id, subscriber.id, keyword);
                    report.delivered.push(subscriber.id);
                }
                Err(e) => {
                    warn!("Delivery to {} failed: {e}", subscriber.id);
                    report.failed.push(subscriber.id);

                    if self.is_unreachable(subscriber.id, &e).await {
                        match self.store.set_subscribed(subscriber.id, false) {
                            Ok(()) => {
                                info!("🔕 Unsubscribed unreachable user {}", subscriber.id);
                                report.unsubscribed.push(subscriber.id);
                            }
                            Err(store_err) => {
                                error!("Failed to unsubscribe {}: {store_err}", subscriber.id);
                            }
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// The bot left or was removed from `chat_id`: stop watching it.
    pub fn handle_bot_removed(&self, chat_id: i64) -> Result<Option<WatchedChat>, StoreError> {
        let removed = self.store.unwatch_chat(chat_id)?;
        if let Some(chat) = &removed {
            info!("🚪 Bot removed from {} ({}), no longer watching", chat.title, chat.id);
        }
        Ok(removed)
    }

    /// Header then forward. A failed forward fails the delivery even though
    /// the header already went out.
    async fn deliver(&self, to: i64, from_chat: i64, message_id: i32, header: &str) -> Result<(), TransportError> {
        self.with_retry(|| self.transport.send_text(to, header)).await?;
        self.with_retry(|| self.transport.forward(to, from_chat, message_id)).await
    }

    async fn with_retry<F, Fut>(&self, mut call: F) -> Result<(), TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let mut attempt = 1;
        let mut backoff = self.policy.initial_backoff;
        loop {
            match call().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() || attempt >= self.policy.max_attempts => return Err(e),
                Err(e) => {
                    let delay = e.retry_after.unwrap_or(backoff).min(self.policy.max_backoff);
                    debug!("Attempt {}/{} failed: {e}, retrying in {:?}", attempt, self.policy.max_attempts, delay);
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
            }
        }
    }

    /// Permanent errors say so directly and rejected requests say nothing
    /// about the user. After transient failures, ask the transport whether
    /// the user can still be reached at all.
    async fn is_unreachable(&self, user_id: i64, error: &TransportError) -> bool {
        match error.kind {
            ErrorKind::Permanent => return true,
            ErrorKind::Rejected => return false,
            ErrorKind::Transient => {}
        }
        match self.transport.probe(user_id).await {
            Ok(()) => false,
            Err(probe_err) => {
                debug!("Probe of {} failed: {probe_err}", user_id);
                probe_err.is_permanent()
            }
        }
    }
}

/// Text sent right before the forwarded message.
pub fn render_header(chat: &SourceChat, message: &IncomingMessage, keyword: &str) -> String {
    format!(
        "📣 Match found in: {} ({})\nFrom: {}\nKeyword: {}\nOriginal message forwarded below:",
        chat.display_title(),
        chat.link(),
        message.author.as_deref().unwrap_or("unknown"),
        keyword,
    )
}
