//! Redis-backed queue store
//!
//! Queues are sorted sets (ZADD / ZRANGE / ZREM) and notifications travel over
//! Redis pub/sub. Connection setup retries with exponential backoff, and a
//! dropped subscription is re-established in the background for as long as
//! somebody is still listening.

use crate::error::{MatchmakingError, Result};
use crate::matchmaking::store::{Notifications, QueueStore, RESUBSCRIBED_EVENT};
use async_trait::async_trait;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Configuration for the Redis connection
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_retries: 5,
            retry_delay_ms: 1000,
        }
    }
}

/// Upper bound for reconnect backoff
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_RETRY_DELAY)
}

/// Queue store on top of a Redis multiplexed connection
pub struct RedisQueueStore {
    client: redis::Client,
    connection: MultiplexedConnection,
    config: RedisStoreConfig,
}

impl RedisQueueStore {
    /// Connect with retry logic
    pub async fn connect(config: RedisStoreConfig) -> Result<Self> {
        let client =
            redis::Client::open(config.url.as_str()).map_err(MatchmakingError::queue_unavailable)?;
        let connection = Self::connect_with_retry(&client, &config).await?;

        info!("Connected to Redis queue store at {}", config.url);
        Ok(Self {
            client,
            connection,
            config,
        })
    }

    /// Attempt to connect with exponential backoff retry
    async fn connect_with_retry(
        client: &redis::Client,
        config: &RedisStoreConfig,
    ) -> Result<MultiplexedConnection> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(config.retry_delay_ms);

        loop {
            match client.get_multiplexed_async_connection().await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    retry_count += 1;
                    if retry_count > config.max_retries {
                        error!(
                            "Failed to connect to Redis after {} attempts: {}",
                            config.max_retries, e
                        );
                        return Err(MatchmakingError::queue_unavailable(e).into());
                    }

                    warn!(
                        "Redis connection attempt {} failed: {}. Retrying in {:?}",
                        retry_count, e, delay
                    );
                    sleep(delay).await;
                    delay = next_delay(delay);
                }
            }
        }
    }

    async fn open_subscription(client: &redis::Client, channel: &str) -> redis::RedisResult<PubSub> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    /// Re-subscribe with exponential backoff until it succeeds or the
    /// receiving side has gone away
    async fn resubscribe(
        client: &redis::Client,
        channel: &str,
        tx: &mpsc::UnboundedSender<String>,
        retry_delay: Duration,
    ) -> Option<PubSub> {
        let mut attempt = 0u32;
        let mut delay = retry_delay;

        while !tx.is_closed() {
            attempt += 1;
            match Self::open_subscription(client, channel).await {
                Ok(pubsub) => {
                    info!("Resubscribed to Redis channel {} after {} attempts", channel, attempt);
                    return Some(pubsub);
                }
                Err(e) => {
                    warn!(
                        "Resubscribe attempt {} to {} failed: {}. Retrying in {:?}",
                        attempt, channel, e, delay
                    );
                    sleep(delay).await;
                    delay = next_delay(delay);
                }
            }
        }
        None
    }

    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn insert(&self, queue: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = conn
            .zadd(queue, member, score)
            .await
            .map_err(MatchmakingError::queue_unavailable)?;
        Ok(())
    }

    async fn range_all(&self, queue: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        let members: Vec<String> = conn
            .zrange(queue, 0, -1)
            .await
            .map_err(MatchmakingError::queue_unavailable)?;
        Ok(members)
    }

    async fn remove(&self, queue: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection();
        let removed: i64 = conn
            .zrem(queue, member)
            .await
            .map_err(MatchmakingError::queue_unavailable)?;
        Ok(removed > 0)
    }

    async fn clear(&self, queue: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = conn
            .del(queue)
            .await
            .map_err(MatchmakingError::queue_unavailable)?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(MatchmakingError::queue_unavailable)?;
        debug!("Published '{}' on {} to {} receivers", payload, channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Notifications> {
        let mut pubsub = Self::open_subscription(&self.client, channel)
            .await
            .map_err(MatchmakingError::queue_unavailable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let channel = channel.to_string();
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        info!("Subscribed to Redis channel {}", channel);

        tokio::spawn(async move {
            loop {
                let mut messages = Box::pin(pubsub.into_on_message());
                while let Some(msg) = messages.next().await {
                    let payload: String = msg.get_payload().unwrap_or_default();
                    if tx.send(payload).is_err() {
                        debug!("Subscriber for {} went away", channel);
                        return;
                    }
                }
                drop(messages);

                warn!("Redis subscription to {} dropped, reconnecting", channel);
                pubsub = match Self::resubscribe(&client, &channel, &tx, retry_delay).await {
                    Some(pubsub) => pubsub,
                    None => return,
                };

                // Entries queued while disconnected never produced a wake-up
                if tx.send(RESUBSCRIBED_EVENT.to_string()).is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        assert_eq!(next_delay(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(next_delay(Duration::from_secs(20)), MAX_RETRY_DELAY);
        assert_eq!(next_delay(MAX_RETRY_DELAY), MAX_RETRY_DELAY);
    }
}
