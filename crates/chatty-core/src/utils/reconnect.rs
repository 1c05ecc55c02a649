//! Reconnection with exponential backoff
//!
//! Background loops (backplane handles, storage) use this to re-establish a
//! lost connection. Attempts are grouped into cycles of `max_attempts`; when a
//! cycle is exhausted the failure is reported and the circuit stays open for
//! `circuit_cooldown` before a fresh cycle starts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts per cycle before the failure is reported upward
    pub max_attempts: u32,
    /// Delay before the first attempt of a cycle
    pub initial_delay: Duration,
    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to delays
    pub jitter: bool,
    /// Pause after an exhausted cycle
    pub circuit_cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            circuit_cooldown: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Create a new policy with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set attempts per cycle
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the cooldown after an exhausted cycle
    #[must_use]
    pub fn with_circuit_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit_cooldown = cooldown;
        self
    }

    /// Delay before the given attempt (1-based) within a cycle
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);

        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64) as u64;

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            delay_ms + rand_jitter(delay_ms / 4)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }
}

/// Time-seeded jitter; spreading reconnect storms does not need a CSPRNG
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    nanos % max
}

/// Re-establish a connection until it succeeds or `token` is cancelled.
///
/// Each attempt is preceded by the backoff delay for its position in the
/// current cycle. `on_exhausted` is called with the total attempt count each
/// time a cycle of `max_attempts` fails; the loop then waits out the circuit
/// cooldown and starts over.
///
/// Returns `None` only when cancelled.
pub async fn reconnect_with_backoff<T, E, F, Fut, X>(
    policy: &ReconnectPolicy,
    target: &str,
    token: &CancellationToken,
    mut on_exhausted: X,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    X: FnMut(u32),
{
    let mut cycle_attempt: u32 = 0;
    let mut total_attempts: u32 = 0;
    let mut delay = policy.delay_for(1);

    loop {
        tokio::select! {
            _ = sleep(delay) => {}
            _ = token.cancelled() => {
                debug!(target = %target, "Reconnect cancelled");
                return None;
            }
        }

        cycle_attempt += 1;
        total_attempts = total_attempts.saturating_add(1);

        match connect().await {
            Ok(connection) => {
                info!(
                    target = %target,
                    attempts = total_attempts,
                    "Reconnected"
                );
                return Some(connection);
            }
            Err(e) if cycle_attempt >= policy.max_attempts => {
                error!(
                    target = %target,
                    attempts = total_attempts,
                    cooldown_secs = policy.circuit_cooldown.as_secs(),
                    error = %e,
                    "Reconnect attempts exhausted, opening circuit"
                );
                on_exhausted(total_attempts);
                cycle_attempt = 0;
                delay = policy.circuit_cooldown;
            }
            Err(e) => {
                delay = policy.delay_for(cycle_attempt + 1);
                warn!(
                    target = %target,
                    attempt = cycle_attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Reconnect failed, retrying"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_circuit_cooldown(Duration::from_millis(5))
            .with_jitter(false)
    }

    #[test]
    fn test_policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.circuit_cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_respects_max() {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(60), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(400))
            .with_jitter(true);

        let delay = policy.delay_for(1);
        assert!(delay >= Duration::from_millis(400));
        assert!(delay < Duration::from_millis(500));
    }

    #[test]
    fn test_max_attempts_never_zero() {
        let policy = ReconnectPolicy::new().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let token = CancellationToken::new();

        let result = reconnect_with_backoff(
            &fast_policy().with_max_attempts(5),
            "test",
            &token,
            |_| panic!("cycle should not be exhausted"),
            || {
                let c = counter_clone.clone();
                async move {
                    let count = c.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err("connection refused")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Some(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_cycle_reports_and_continues() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let mut reports = Vec::new();
        let token = CancellationToken::new();

        let result = reconnect_with_backoff(
            &fast_policy().with_max_attempts(2),
            "test",
            &token,
            |attempts| reports.push(attempts),
            || {
                let c = counter_clone.clone();
                async move {
                    let count = c.fetch_add(1, Ordering::SeqCst);
                    if count < 5 {
                        Err("connection refused")
                    } else {
                        Ok("connected")
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Some("connected"));
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert_eq!(reports, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let token = CancellationToken::new();
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            reconnect_with_backoff(
                &fast_policy(),
                "test",
                &loop_token,
                |_| {},
                || async { Err::<(), _>("connection refused") },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop after cancellation")
            .expect("task should not panic");
        assert!(result.is_none());
    }
}
