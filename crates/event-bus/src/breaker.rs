//! Circuit breaker guarding broker calls.
//!
//! ```text
//! Closed ──trip──► Open ──cool down──► HalfOpen ──probe ok──► Closed
//!                   ▲                     │
//!                   └──────probe failed───┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{EventBusError, Result};

/// Tuning for a circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Requests that must be observed before the breaker may trip.
    pub min_requests: u32,
    /// Failure ratio at or above which the breaker trips.
    pub failure_ratio: f64,
    /// Time spent open before a probe is allowed.
    pub cool_down: Duration,
    /// Probes admitted while half-open.
    pub half_open_max_requests: u32,
    /// Closed-state counting window. `None` keeps counting until a trip.
    pub interval: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            cool_down: Duration::from_secs(15),
            half_open_max_requests: 1,
            interval: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request counters of the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
    pub consecutive_successes: u32,
}

impl Counts {
    fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.failures) / f64::from(self.requests)
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    // End of the open period or of the closed counting window.
    expiry: Option<Instant>,
}

/// A circuit breaker shared by every caller of one `(aggregate, action)`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let expiry = config.interval.map(|i| Instant::now() + i);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state, applying any elapsed cool down.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().unwrap().counts
    }

    /// Runs `call` if the breaker admits it and records its outcome.
    ///
    /// Rejected calls return `BreakerOpen` or `TooManyRequests` without
    /// invoking `call`. A call dropped before it finishes (a deadline or an
    /// aborted task) counts as a failure.
    pub async fn call<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admitted = Admitted {
            breaker: self,
            generation: Some(self.before_request()?),
        };
        let result = call().await;
        admitted.settle(result.is_ok());
        result
    }

    fn before_request(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner, Instant::now());

        let rejection = match inner.state {
            BreakerState::Open => Some(EventBusError::BreakerOpen {
                breaker: self.name.clone(),
            }),
            BreakerState::HalfOpen
                if inner.counts.requests >= self.config.half_open_max_requests =>
            {
                Some(EventBusError::TooManyRequests {
                    breaker: self.name.clone(),
                })
            }
            _ => None,
        };
        if let Some(err) = rejection {
            metrics::counter!("breaker_rejections_total", "breaker" => self.name.clone())
                .increment(1);
            return Err(err);
        }

        inner.counts.requests += 1;
        Ok(inner.generation)
    }

    fn after_request(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        if success {
            inner.counts.successes += 1;
            inner.counts.consecutive_successes += 1;
            if inner.state == BreakerState::HalfOpen
                && inner.counts.consecutive_successes >= self.config.half_open_max_requests
            {
                self.transition(&mut inner, BreakerState::Closed, now);
                return;
            }
        } else {
            inner.counts.failures += 1;
            inner.counts.consecutive_successes = 0;
            if inner.state == BreakerState::HalfOpen {
                self.transition(&mut inner, BreakerState::Open, now);
                return;
            }
        }

        // Evaluated on every outcome so the ratio trips regardless of the
        // order successes and failures arrived in.
        if inner.state == BreakerState::Closed && self.ready_to_trip(&inner.counts) {
            self.transition(&mut inner, BreakerState::Open, now);
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.config.min_requests
            && counts.failure_ratio() >= self.config.failure_ratio
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|e| e <= now) {
                    self.new_generation(inner, now);
                }
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|e| e <= now) {
                    self.transition(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.new_generation(inner, now);

        match to {
            BreakerState::Open => {
                tracing::warn!(breaker = %self.name, %from, %to, "circuit breaker opened")
            }
            _ => tracing::info!(breaker = %self.name, %from, %to, "circuit breaker state changed"),
        }
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => self.config.interval.map(|i| now + i),
            BreakerState::Open => Some(now + self.config.cool_down),
            BreakerState::HalfOpen => None,
        };
    }
}

/// An admitted request whose outcome has not been recorded yet.
struct Admitted<'a> {
    breaker: &'a CircuitBreaker,
    generation: Option<u64>,
}

impl Admitted<'_> {
    fn settle(mut self, success: bool) {
        if let Some(generation) = self.generation.take() {
            self.breaker.after_request(generation, success);
        }
    }
}

impl Drop for Admitted<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation.take() {
            tracing::debug!(breaker = %self.breaker.name, "request dropped before completion");
            self.breaker.after_request(generation, false);
        }
    }
}

/// Hands out one breaker per `(aggregate, action)` key.
///
/// Callers asking for the same key share trip state.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the breaker for `aggregate` and `action`, creating it on first use.
    pub fn get(&self, aggregate: &str, action: &str) -> Arc<CircuitBreaker> {
        let name = format!("{aggregate}_{action}");
        self.breakers
            .lock()
            .unwrap()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::default().with_cool_down(Duration::from_millis(50))
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .call(|| async { Err::<(), _>(EventBusError::Transport("down".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn does_not_trip_below_min_requests() {
        let breaker = CircuitBreaker::new("category_created", fast_config());
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn trips_after_failure_ratio_and_skips_call() {
        let breaker = CircuitBreaker::new("category_created", fast_config());
        let _ = succeed(&breaker).await;
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        let invoked = AtomicUsize::new(0);
        let err = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::BreakerOpen { .. }));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trips_when_failures_come_first() {
        let breaker = CircuitBreaker::new("blob_uploaded", fast_config());
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn one_failure_in_three_stays_closed() {
        let breaker = CircuitBreaker::new("blob_uploaded", fast_config());
        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;
        let _ = succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new("category_removed", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.counts(), Counts::default());
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("category_removed", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn half_open_admits_a_single_probe() {
        let breaker = Arc::new(CircuitBreaker::new("category_restored", fast_config()));
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        // let the probe get admitted
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = succeed(&breaker).await.unwrap_err();
        assert!(matches!(err, EventBusError::TooManyRequests { .. }));

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    async fn hang(breaker: &CircuitBreaker) {
        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(|| std::future::pending::<Result<()>>()),
        )
        .await;
    }

    #[tokio::test]
    async fn dropped_calls_count_as_failures() {
        let breaker = CircuitBreaker::new("category_created", fast_config());
        hang(&breaker).await;
        hang(&breaker).await;
        assert_eq!(
            breaker.counts(),
            Counts {
                requests: 2,
                failures: 2,
                ..Counts::default()
            }
        );

        hang(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn dropped_half_open_call_reopens_and_recovers() {
        let breaker = CircuitBreaker::new("category_updated", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        hang(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn aborted_half_open_task_reopens_breaker() {
        let breaker = Arc::new(CircuitBreaker::new("blob_uploaded", fast_config()));
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let stuck = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| std::future::pending::<Result<()>>())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());

        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn registry_shares_breakers_per_key() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let a = registry.get("category", "created");
        let b = registry.get("category", "created");
        let c = registry.get("category", "updated");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.name(), "category_created");
    }
}
