/// Generation + publish pipeline.
///
/// Produces post text (cache first, fresh generation second), records it
/// durably, then delivers it with bounded retry. Used by the scheduler
/// and by operator commands alike; the delivery channel is a trait so
/// tests can observe attempts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, Recipient};

use crate::generator::PostGenerator;
use crate::store::Database;

/// Channel delivery boundary. At-least-once-attempted, not guaranteed
/// delivered: callers handle errors with retry.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver text, returning the channel message id.
    async fn send(&self, text: &str) -> Result<i32>;
    /// Replace the text of an already published message.
    async fn edit(&self, message_id: i32, text: &str) -> Result<()>;
}

pub struct TelegramPublisher {
    bot: Bot,
    recipient: Recipient,
}

impl TelegramPublisher {
    pub fn new(bot: Bot, recipient: Recipient) -> Self {
        Self { bot, recipient }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn send(&self, text: &str) -> Result<i32> {
        let message = self
            .bot
            .send_message(self.recipient.clone(), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(message.id.0)
    }

    async fn edit(&self, message_id: i32, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(self.recipient.clone(), MessageId(message_id), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

/// What a publish attempt came to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { post_id: i64 },
    /// No text was available; nothing persisted, nothing sent. The next
    /// tick or a manual retry supersedes this cycle.
    GenerationFailed,
    /// Retries exhausted; the row stays unsent for manual follow-up and
    /// is not requeued automatically.
    DeliveryFailed { post_id: i64, attempts: u32 },
}

pub struct PostPipeline {
    db: Database,
    generator: Arc<dyn PostGenerator>,
    publisher: Arc<dyn Publisher>,
    delivery_retries: u32,
    retry_delay: Duration,
}

impl PostPipeline {
    pub fn new(
        db: Database,
        generator: Arc<dyn PostGenerator>,
        publisher: Arc<dyn Publisher>,
        delivery_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            db,
            generator,
            publisher,
            delivery_retries: delivery_retries.max(1),
            retry_delay,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Obtain text, persist a queue row, deliver it.
    pub async fn generate_and_publish(
        &self,
        now: DateTime<Utc>,
        auto_generated: bool,
    ) -> Result<PublishOutcome> {
        let text = match self.db.cache_take_unused().await? {
            Some(cached) => {
                log::info!("Using cached post {} for publication", cached.id);
                cached.post_text
            }
            None => match self.generator.generate().await {
                Ok(post) => {
                    log::debug!("Generation prompt was: {}", post.prompt);
                    post.text
                }
                Err(failure) => {
                    log::error!("Post generation failed: {}", failure);
                    return Ok(PublishOutcome::GenerationFailed);
                }
            },
        };

        // The row is written before delivery so the history survives a
        // failed send
        let post_id = self.db.add_scheduled_post(now, &text, auto_generated).await?;

        self.deliver(post_id, &text).await
    }

    /// Generate one post into the cache without publishing. Returns the
    /// cache row id, or None when generation failed.
    pub async fn generate_to_cache(&self) -> Result<Option<i64>> {
        match self.generator.generate().await {
            Ok(post) => {
                let id = self.db.cache_add(&post.text).await?;
                log::info!("Cached generated post as {}", id);
                Ok(Some(id))
            }
            Err(failure) => {
                log::error!("Post generation failed: {}", failure);
                Ok(None)
            }
        }
    }

    /// One pass over operator-scheduled rows whose time has arrived.
    /// Each row gets exactly one delivery envelope per process lifetime:
    /// ids in `attempted` are skipped, so a failed delivery is not
    /// requeued by a later pass.
    pub async fn deliver_due_posts(
        &self,
        now: DateTime<Utc>,
        attempted: &mut HashSet<i64>,
    ) -> Result<usize> {
        let mut delivered = 0;
        for post in self.db.due_manual_posts(now).await? {
            if !attempted.insert(post.id) {
                continue;
            }
            log::info!(
                "Publishing scheduled post {} (due {})",
                post.id,
                post.scheduled_time
            );
            match self.deliver(post.id, &post.post_text).await? {
                PublishOutcome::Published { .. } => delivered += 1,
                outcome => log::warn!("Scheduled post {} not delivered: {:?}", post.id, outcome),
            }
        }
        Ok(delivered)
    }

    /// Deliver an existing queue row with bounded retry, marking it sent
    /// on success.
    pub async fn deliver(&self, post_id: i64, text: &str) -> Result<PublishOutcome> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.publisher.send(text).await {
                Ok(message_id) => {
                    self.db.mark_post_as_sent(post_id).await?;
                    log::info!("Post {} published as message {}", post_id, message_id);
                    return Ok(PublishOutcome::Published { post_id });
                }
                Err(e) => {
                    log::warn!(
                        "Delivery attempt {}/{} for post {} failed: {:#}",
                        attempts,
                        self.delivery_retries,
                        post_id,
                        e
                    );
                    if attempts >= self.delivery_retries {
                        log::error!(
                            "Post {} left unsent after {} delivery attempts",
                            post_id,
                            attempts
                        );
                        return Ok(PublishOutcome::DeliveryFailed { post_id, attempts });
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

/// Background loop publishing operator-scheduled posts as they come due.
/// Failures are logged; the loop itself never terminates.
pub async fn run_delivery_loop(pipeline: Arc<PostPipeline>, poll_secs: u64) {
    log::info!("Delivery loop started (poll every {}s)", poll_secs);
    let mut attempted: HashSet<i64> = HashSet::new();
    loop {
        if let Err(e) = pipeline.deliver_due_posts(Utc::now(), &mut attempted).await {
            log::error!("Delivery pass failed: {:#}", e);
        }
        tokio::time::sleep(Duration::from_secs(poll_secs)).await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::generator::{GeneratedPost, GenerationFailure, SelectionInfo};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Generator stub: fixed text or a fixed failure, counting calls.
    pub struct StubGenerator {
        pub text: Option<String>,
        pub calls: AtomicU32,
    }

    impl StubGenerator {
        pub fn returning(text: &str) -> Self {
            Self {
                text: Some(text.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                text: None,
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PostGenerator for StubGenerator {
        async fn generate(&self) -> Result<GeneratedPost, GenerationFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.text {
                Some(text) => Ok(GeneratedPost {
                    text: text.clone(),
                    prompt: "stub prompt".to_string(),
                    selection: SelectionInfo::Keywords(vec![]),
                }),
                None => Err(GenerationFailure::EmptyCompletion),
            }
        }
    }

    /// Publisher stub counting delivery attempts.
    pub struct StubPublisher {
        pub fail: bool,
        pub sends: AtomicU32,
    }

    impl StubPublisher {
        pub fn working() -> Self {
            Self {
                fail: false,
                sends: AtomicU32::new(0),
            }
        }

        pub fn broken() -> Self {
            Self {
                fail: true,
                sends: AtomicU32::new(0),
            }
        }

        pub fn send_count(&self) -> u32 {
            self.sends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Publisher for StubPublisher {
        async fn send(&self, _text: &str) -> Result<i32> {
            let attempt = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                anyhow::bail!("stub network error on attempt {}", attempt);
            }
            Ok(attempt as i32)
        }

        async fn edit(&self, _message_id: i32, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    pub fn pipeline_with(
        db: Database,
        generator: Arc<StubGenerator>,
        publisher: Arc<StubPublisher>,
    ) -> PostPipeline {
        PostPipeline::new(db, generator, publisher, 3, Duration::from_secs(0))
    }
}
