use super::backplane::{Backplane, BackplaneMessage, MessageStream, PublisherLink};
use crate::error::BackplaneError;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

/// Redis-backed backplane
///
/// Publisher handles use a multiplexed connection; subscriber handles use a
/// dedicated pub/sub connection with a pattern subscription. The two never
/// share a socket.
pub struct RedisBackplane {
    client: redis::Client,
    address: String,
}

impl RedisBackplane {
    /// Create a backplane for the given Redis URL
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn new(redis_url: &str) -> Result<Self, BackplaneError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BackplaneError::Connection(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            address: redact_credentials(redis_url),
        })
    }
}

impl std::fmt::Debug for RedisBackplane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackplane")
            .field("address", &self.address)
            .finish()
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect_publisher(&self) -> Result<Box<dyn PublisherLink>, BackplaneError> {
        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BackplaneError::Connection(e.to_string()))?;

        debug!(address = %self.address, "Redis publisher connected");
        Ok(Box::new(RedisPublisher { connection }))
    }

    async fn connect_subscriber(&self, pattern: &str) -> Result<MessageStream, BackplaneError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BackplaneError::Connection(e.to_string()))?;

        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| BackplaneError::Command(e.to_string()))?;

        debug!(address = %self.address, pattern = %pattern, "Redis subscriber connected");

        let stream = pubsub.into_on_message().map(|msg| BackplaneMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });
        Ok(Box::pin(stream))
    }
}

struct RedisPublisher {
    connection: redis::aio::MultiplexedConnection,
}

#[async_trait]
impl PublisherLink for RedisPublisher {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BackplaneError> {
        // Clones share the multiplexed socket; concurrent publishes pipeline
        let mut connection = self.connection.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut connection)
            .await
            .map_err(classify)?;

        if receivers == 0 {
            debug!(channel = %channel, "Published with no subscribers");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackplaneError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn classify(error: redis::RedisError) -> BackplaneError {
    if error.is_io_error() || error.is_connection_dropped() || error.is_timeout() {
        warn!(error = %error, "Redis publisher connection lost");
        BackplaneError::Disconnected
    } else {
        BackplaneError::Command(error.to_string())
    }
}

/// Strip `user:password@` from a URL before it is logged or reported
fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
