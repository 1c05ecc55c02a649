use super::backplane::{
    Backplane, BackplaneMessage, BridgeHealth, HandleRole, HandleStatus, LinkState, MessageStream,
    PublisherLink,
};
use super::event::{channel_for, is_valid_topic, subscription_pattern, Event, DEFAULT_CHANNEL_PREFIX};
use crate::error::{BackplaneError, BridgeError};
use crate::utils::{reconnect_with_backoff, ReconnectPolicy};
use futures::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};
use uuid::Uuid;

/// Delivery callback invoked for every event received from the backplane
pub type EventCallback = Arc<dyn Fn(Arc<Event>) + Send + Sync>;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deadline for opening each handle at startup
    pub startup_timeout: Duration,
    /// Deadline for a single publish or publisher probe; expiry counts as a lost handle
    pub publish_timeout: Duration,
    /// Reconnect behavior for both handles after startup
    pub reconnect: ReconnectPolicy,
    /// Skip events this process published when they come back from the backplane
    pub suppress_self_delivery: bool,
    /// Prefix prepended to topics to form backplane channel names
    pub channel_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            suppress_self_delivery: false,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

/// How an emitted event reached local subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Published; local delivery happens through the subscriber handle
    Backplane,
    /// Dispatched to the local callback only, other processes may miss it
    LocalOnly,
}

/// Cross-process broadcast bridge
///
/// Cheap to clone; all clones share the same handles. Background tasks run
/// until [`BroadcastBridge::shutdown`] is called.
#[derive(Clone)]
pub struct BroadcastBridge {
    inner: Arc<Inner>,
}

struct Inner {
    origin: Uuid,
    config: BridgeConfig,
    publisher_backplane: Arc<dyn Backplane>,
    subscriber_backplane: Arc<dyn Backplane>,
    /// `None` while the publisher is reconnecting; cloned out per publish
    publisher: RwLock<Option<Arc<dyn PublisherLink>>>,
    callback: RwLock<Option<EventCallback>>,
    health: watch::Sender<BridgeHealth>,
    publisher_reconnecting: AtomicBool,
    shutdown: CancellationToken,
    span: Span,
}

impl BroadcastBridge {
    /// Open the publisher and subscriber handles and start delivery.
    ///
    /// Both handles are opened concurrently, each bounded by
    /// `config.startup_timeout`. If either fails nothing is left open.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::BackplaneUnavailable` naming the handle that failed
    pub async fn initialize(
        publisher_backplane: Arc<dyn Backplane>,
        subscriber_backplane: Arc<dyn Backplane>,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let origin = Uuid::new_v4();
        let span = info_span!("bridge", origin = %origin);
        let pattern = subscription_pattern(&config.channel_prefix);

        let (link, stream) = tokio::try_join!(
            open_handle(
                HandleRole::Publisher,
                config.startup_timeout,
                publisher_backplane.connect_publisher(),
            ),
            open_handle(
                HandleRole::Subscriber,
                config.startup_timeout,
                subscriber_backplane.connect_subscriber(&pattern),
            ),
        )?;

        let (health, _) = watch::channel(BridgeHealth {
            publisher: HandleStatus::connected(HandleRole::Publisher, publisher_backplane.address()),
            subscriber: HandleStatus::connected(
                HandleRole::Subscriber,
                subscriber_backplane.address(),
            ),
            degraded: false,
        });

        let inner = Arc::new(Inner {
            origin,
            config,
            publisher_backplane,
            subscriber_backplane,
            publisher: RwLock::new(Some(Arc::from(link))),
            callback: RwLock::new(None),
            health,
            publisher_reconnecting: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            span,
        });

        let task_span = inner.span.clone();
        tokio::spawn(Inner::run_subscriber(Arc::clone(&inner), stream, pattern).instrument(task_span));

        inner.span.in_scope(|| {
            info!(
                publisher = %inner.publisher_backplane.address(),
                subscriber = %inner.subscriber_backplane.address(),
                "Broadcast bridge initialized"
            );
        });

        Ok(Self { inner })
    }

    /// Identifier stamped on every event this bridge publishes
    #[must_use]
    pub fn origin(&self) -> Uuid {
        self.inner.origin
    }

    /// Publish an event on the publisher handle.
    ///
    /// Not retried: when the publisher is down the call fails and a background
    /// reconnect is started.
    ///
    /// # Errors
    ///
    /// - `InvalidTopic` for an unacceptable topic name
    /// - `PublishFailed` when the publisher handle is unavailable or the send fails
    pub async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), BridgeError> {
        if !is_valid_topic(topic) {
            return Err(BridgeError::InvalidTopic(topic.to_string()));
        }
        let event = Event::new(topic, payload, self.inner.origin);
        self.publish_event(&event).await
    }

    /// Publish an event, falling back to local delivery when the backplane
    /// cannot carry it back to this process.
    ///
    /// # Errors
    ///
    /// Fails only for an invalid topic or an unencodable payload; backplane
    /// failures degrade to [`Delivery::LocalOnly`].
    pub async fn emit(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<Delivery, BridgeError> {
        if !is_valid_topic(topic) {
            return Err(BridgeError::InvalidTopic(topic.to_string()));
        }
        let event = Arc::new(Event::new(topic, payload, self.inner.origin));

        if self.inner.config.suppress_self_delivery {
            self.inner.dispatch(Arc::clone(&event));
            let delivery = match self.publish_event(&event).await {
                Ok(()) => Delivery::Backplane,
                Err(BridgeError::PublishFailed { .. }) => Delivery::LocalOnly,
                Err(e) => return Err(e),
            };
            return Ok(delivery);
        }

        let subscriber_up = self.inner.health.borrow().subscriber.is_connected();
        match self.publish_event(&event).await {
            Ok(()) if subscriber_up => Ok(Delivery::Backplane),
            Ok(()) | Err(BridgeError::PublishFailed { .. }) => {
                self.inner.span.in_scope(|| {
                    debug!(topic = %event.topic, "Delivering locally in degraded mode");
                });
                self.inner.dispatch(event);
                Ok(Delivery::LocalOnly)
            }
            Err(e) => Err(e),
        }
    }

    /// Register the delivery callback, replacing any previous one.
    ///
    /// The callback runs on the subscriber task, one event at a time, and must
    /// not block.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(Arc<Event>) + Send + Sync + 'static,
    {
        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Current health snapshot
    #[must_use]
    pub fn health(&self) -> BridgeHealth {
        self.inner.health.borrow().clone()
    }

    /// Subscribe to health changes
    #[must_use]
    pub fn watch_health(&self) -> watch::Receiver<BridgeHealth> {
        self.inner.health.subscribe()
    }

    /// Whether a reconnect cycle was exhausted and the bridge has not fully recovered
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.inner.health.borrow().degraded
    }

    /// Stop background tasks and close the publisher handle
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner
            .publisher
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.span.in_scope(|| info!("Broadcast bridge shut down"));
    }

    async fn publish_event(&self, event: &Event) -> Result<(), BridgeError> {
        let bytes = event.encode()?;
        let channel = channel_for(&self.inner.config.channel_prefix, &event.topic);

        let Some(link) = self.inner.current_publisher() else {
            return Err(BridgeError::PublishFailed {
                topic: event.topic.clone(),
                reason: BackplaneError::Disconnected.to_string(),
            });
        };

        let result = tokio::time::timeout(
            self.inner.config.publish_timeout,
            link.publish(&channel, bytes),
        )
        .await
        .unwrap_or(Err(BackplaneError::Timeout));

        match result {
            Ok(()) => {
                trace!(parent: &self.inner.span, channel = %channel, "Event published");
                Ok(())
            }
            Err(e) => {
                if e.is_disconnect() {
                    self.inner.span.in_scope(|| {
                        warn!(error = %e, "Publisher handle lost");
                    });
                    Inner::invalidate_publisher(&self.inner, &link);
                }
                Err(BridgeError::PublishFailed {
                    topic: event.topic.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for BroadcastBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastBridge")
            .field("origin", &self.inner.origin)
            .field("health", &*self.inner.health.borrow())
            .finish()
    }
}

async fn open_handle<T>(
    role: HandleRole,
    timeout: Duration,
    connect: impl Future<Output = Result<T, BackplaneError>>,
) -> Result<T, BridgeError> {
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e)) => Err(BridgeError::BackplaneUnavailable {
            role,
            reason: e.to_string(),
        }),
        Err(_) => Err(BridgeError::BackplaneUnavailable {
            role,
            reason: format!("timed out after {}ms", timeout.as_millis()),
        }),
    }
}

impl Inner {
    /// Receive loop; the only place the delivery callback is invoked from
    async fn run_subscriber(inner: Arc<Self>, mut stream: MessageStream, pattern: String) {
        loop {
            let next = tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            if let Some(message) = next {
                inner.deliver(message);
                continue;
            }
            if inner.shutdown.is_cancelled() {
                break;
            }

            warn!("Subscriber handle lost, inbound events are dropped until reconnected");
            inner.set_state(HandleRole::Subscriber, LinkState::Disconnected);
            Inner::probe_publisher(&inner).await;

            let backplane = Arc::clone(&inner.subscriber_backplane);
            let restored = inner
                .reconnect(HandleRole::Subscriber, || {
                    let backplane = Arc::clone(&backplane);
                    let pattern = pattern.clone();
                    async move { backplane.connect_subscriber(&pattern).await }
                })
                .await;

            match restored {
                Some(fresh) => {
                    stream = fresh;
                    inner.mark_connected(HandleRole::Subscriber);
                }
                None => break,
            }
        }
        debug!("Subscriber loop stopped");
    }

    fn deliver(&self, message: BackplaneMessage) {
        let event = match Event::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "Dropping undecodable event");
                return;
            }
        };

        if self.config.suppress_self_delivery && event.is_from(self.origin) {
            trace!(topic = %event.topic, "Skipping self-originated event");
            return;
        }

        self.dispatch(Arc::new(event));
    }

    fn dispatch(&self, event: Arc<Event>) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match callback {
            Some(callback) => callback(event),
            None => trace!(topic = %event.topic, "No delivery callback registered"),
        }
    }

    fn current_publisher(&self) -> Option<Arc<dyn PublisherLink>> {
        self.publisher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop `link` if it is still the current publisher, then reconnect
    fn invalidate_publisher(inner: &Arc<Self>, link: &Arc<dyn PublisherLink>) {
        {
            let mut current = inner.publisher.write().unwrap_or_else(PoisonError::into_inner);
            // Already dropped, or replaced by a reconnect
            if !current.as_ref().is_some_and(|open| Arc::ptr_eq(open, link)) {
                return;
            }
            current.take();
        }
        inner.set_state(HandleRole::Publisher, LinkState::Disconnected);
        Self::spawn_publisher_reconnect(inner);
    }

    /// Check the publisher after the subscriber dropped; an idle publisher
    /// would otherwise report healthy until the next publish
    async fn probe_publisher(inner: &Arc<Self>) {
        let Some(link) = inner.current_publisher() else {
            return;
        };
        let result = tokio::time::timeout(inner.config.publish_timeout, link.ping())
            .await
            .unwrap_or(Err(BackplaneError::Timeout));

        match result {
            Ok(()) => debug!("Publisher handle still reachable"),
            Err(e) if e.is_disconnect() => {
                warn!(error = %e, "Publisher handle lost");
                Self::invalidate_publisher(inner, &link);
            }
            Err(e) => debug!(error = %e, "Publisher probe failed"),
        }
    }

    fn spawn_publisher_reconnect(inner: &Arc<Self>) {
        if inner
            .publisher_reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let inner = Arc::clone(inner);
        let span = inner.span.clone();
        tokio::spawn(
            async move {
                let backplane = Arc::clone(&inner.publisher_backplane);
                let restored = inner
                    .reconnect(HandleRole::Publisher, || {
                        let backplane = Arc::clone(&backplane);
                        async move { backplane.connect_publisher().await }
                    })
                    .await;

                if let Some(link) = restored {
                    *inner
                        .publisher
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(link));
                    inner.mark_connected(HandleRole::Publisher);
                }
                inner.publisher_reconnecting.store(false, Ordering::SeqCst);
            }
            .instrument(span),
        );
    }

    async fn reconnect<T, F, Fut>(&self, role: HandleRole, mut connect: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackplaneError>>,
    {
        let address = match role {
            HandleRole::Publisher => self.publisher_backplane.address(),
            HandleRole::Subscriber => self.subscriber_backplane.address(),
        };

        reconnect_with_backoff(
            &self.config.reconnect,
            &address,
            &self.shutdown,
            |total| self.mark_degraded(role, total),
            || {
                self.note_attempt(role);
                connect()
            },
        )
        .await
    }

    fn set_state(&self, role: HandleRole, state: LinkState) {
        self.health.send_modify(|health| health.handle_mut(role).state = state);
    }

    fn note_attempt(&self, role: HandleRole) {
        self.health.send_modify(|health| {
            let handle = health.handle_mut(role);
            handle.state = LinkState::Connecting;
            handle.reconnect_attempts = handle.reconnect_attempts.saturating_add(1);
        });
    }

    fn mark_degraded(&self, role: HandleRole, attempts: u32) {
        error!(role = %role, attempts = attempts, "Backplane handle unreachable, bridge degraded");
        self.health.send_modify(|health| {
            health.handle_mut(role).state = LinkState::Disconnected;
            health.degraded = true;
        });
    }

    fn mark_connected(&self, role: HandleRole) {
        self.health.send_modify(|health| {
            let handle = health.handle_mut(role);
            handle.state = LinkState::Connected;
            handle.reconnect_attempts = 0;
            if health.is_fully_connected() {
                health.degraded = false;
            }
        });
        info!(role = %role, "Backplane handle reconnected");
    }
}
