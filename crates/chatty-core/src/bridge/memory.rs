use super::backplane::{Backplane, BackplaneMessage, MessageStream, PublisherLink};
use crate::error::BackplaneError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 1024;

/// In-process backplane.
///
/// Every clone shares the same channel, so several bridges built on clones of
/// one `MemoryBackplane` behave like several processes attached to one Redis.
/// `sever` and `restore` simulate an outage: severing ends every open
/// subscriber stream, invalidates open publishers and refuses new connections
/// until restored.
#[derive(Clone)]
pub struct MemoryBackplane {
    inner: Arc<Inner>,
}

struct Inner {
    sender: RwLock<broadcast::Sender<BackplaneMessage>>,
    available: AtomicBool,
    generation: AtomicU64,
    capacity: usize,
}

impl MemoryBackplane {
    /// Create a backplane with the default buffer size
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a backplane buffering up to `capacity` messages per subscriber
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                sender: RwLock::new(sender),
                available: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                capacity,
            }),
        }
    }

    /// Drop every open connection and refuse new ones
    pub fn sever(&self) {
        self.inner.available.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let (fresh, _) = broadcast::channel(self.inner.capacity);
        // Replacing the sender closes every receiver of the old one
        *self
            .inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fresh;
        debug!("Memory backplane severed");
    }

    /// Accept connections again after `sever`
    pub fn restore(&self) {
        self.inner.available.store(true, Ordering::SeqCst);
        debug!("Memory backplane restored");
    }

    /// Whether new connections are accepted
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Number of open subscriber streams
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .receiver_count()
    }

    fn ensure_available(&self) -> Result<(), BackplaneError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BackplaneError::Connection(
                "memory backplane unavailable".to_string(),
            ))
        }
    }
}

impl Default for MemoryBackplane {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackplane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackplane")
            .field("available", &self.is_available())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl Backplane for MemoryBackplane {
    fn address(&self) -> String {
        "memory://local".to_string()
    }

    async fn connect_publisher(&self) -> Result<Box<dyn PublisherLink>, BackplaneError> {
        self.ensure_available()?;
        Ok(Box::new(MemoryPublisher {
            inner: Arc::clone(&self.inner),
            generation: self.inner.generation.load(Ordering::SeqCst),
        }))
    }

    async fn connect_subscriber(&self, pattern: &str) -> Result<MessageStream, BackplaneError> {
        self.ensure_available()?;
        let receiver = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe();
        let pattern = pattern.to_string();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let pattern = pattern.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) if channel_matches(&pattern, &message.channel) => {
                            return Some((message, receiver));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Memory backplane subscriber lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

struct MemoryPublisher {
    inner: Arc<Inner>,
    generation: u64,
}

#[async_trait]
impl PublisherLink for MemoryPublisher {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BackplaneError> {
        self.ping().await?;

        let message = BackplaneMessage {
            channel: channel.to_string(),
            payload,
        };
        // No receivers is not an error, matching PUBLISH returning 0
        let _ = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .send(message);
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackplaneError> {
        if self.inner.available.load(Ordering::SeqCst)
            && self.inner.generation.load(Ordering::SeqCst) == self.generation
        {
            Ok(())
        } else {
            Err(BackplaneError::Disconnected)
        }
    }
}

/// Glob match supporting a single trailing `*`
fn channel_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}
