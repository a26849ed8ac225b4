//! Availability-aware provider fallback chain
//!
//! Generic over the capability trait object so the same machinery serves
//! both language-model and voice providers. Each entry carries its own
//! circuit breaker; a terminal offline provider guarantees the chain never
//! propagates an upstream failure to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failure threshold reached, all requests skip the provider
    Open,
    /// Cooldown elapsed, exactly one trial request permitted
    HalfOpen,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit skips the provider before permitting a trial
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BreakerInner {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Call,
    Trial,
    Skip,
}

/// Holds the single half-open trial slot. Dropping the permit without a
/// recorded outcome (the invoke future was cancelled mid-trial) returns the
/// breaker to Open for a fresh cooldown instead of wedging it half-open.
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    resolved: bool,
}

impl TrialPermit<'_> {
    fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            *self.breaker.inner.lock() = BreakerInner::Open {
                since: Instant::now(),
            };
        }
    }
}

/// Per-provider failure-tracking state machine.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::Closed { failures: 0 }),
        }
    }

    pub fn state(&self) -> CircuitState {
        match *self.inner.lock() {
            BreakerInner::Closed { .. } => CircuitState::Closed,
            BreakerInner::Open { since } if since.elapsed() >= self.config.cooldown => {
                CircuitState::HalfOpen
            }
            BreakerInner::Open { .. } => CircuitState::Open,
            BreakerInner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn try_acquire(&self) -> Permit {
        let mut inner = self.inner.lock();
        match *inner {
            BreakerInner::Closed { .. } => Permit::Call,
            BreakerInner::Open { since } => {
                if since.elapsed() >= self.config.cooldown {
                    *inner = BreakerInner::HalfOpen {
                        trial_in_flight: true,
                    };
                    Permit::Trial
                } else {
                    Permit::Skip
                }
            }
            BreakerInner::HalfOpen { trial_in_flight } => {
                if trial_in_flight {
                    Permit::Skip
                } else {
                    *inner = BreakerInner::HalfOpen {
                        trial_in_flight: true,
                    };
                    Permit::Trial
                }
            }
        }
    }

    fn record_success(&self) {
        *self.inner.lock() = BreakerInner::Closed { failures: 0 };
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match *inner {
            BreakerInner::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    *inner = BreakerInner::Open {
                        since: Instant::now(),
                    };
                } else {
                    *inner = BreakerInner::Closed { failures };
                }
            }
            // A failed trial reopens the circuit for a full cooldown.
            BreakerInner::HalfOpen { .. } => {
                *inner = BreakerInner::Open {
                    since: Instant::now(),
                };
            }
            BreakerInner::Open { .. } => {}
        }
    }
}

/// Capabilities a provider may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCapability {
    Generation,
    Transcription,
    Synthesis,
}

/// Result of a chain invocation, recording which provider actually served it.
#[derive(Debug, Clone)]
pub struct ProviderResult<T> {
    pub payload: Option<T>,
    /// Name of the provider that produced the payload (or was last tried)
    pub provider: String,
    /// True when the terminal offline provider served the request
    pub degraded: bool,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl<T> ProviderResult<T> {
    pub fn is_success(&self) -> bool {
        self.payload.is_some()
    }

    pub fn into_payload(self) -> Option<T> {
        self.payload
    }
}

struct ChainEntry<P: ?Sized> {
    name: String,
    priority: u8,
    capabilities: Vec<ProviderCapability>,
    provider: Arc<P>,
    breaker: CircuitBreaker,
}

/// Ordered, availability-aware fan-out over interchangeable providers.
pub struct ProviderChain<P: ?Sized> {
    entries: Vec<ChainEntry<P>>,
    offline: Option<(String, Arc<P>)>,
    call_timeout: Duration,
}

/// Builder for [`ProviderChain`].
pub struct ProviderChainBuilder<P: ?Sized> {
    entries: Vec<ChainEntry<P>>,
    offline: Option<(String, Arc<P>)>,
    breaker: BreakerConfig,
    call_timeout: Duration,
}

impl<P: ?Sized> ProviderChainBuilder<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            offline: None,
            breaker: BreakerConfig::default(),
            call_timeout: Duration::from_secs(5),
        }
    }

    /// Breaker tuning applied to providers registered after this call.
    pub fn breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn provider(
        mut self,
        name: impl Into<String>,
        priority: u8,
        capabilities: Vec<ProviderCapability>,
        provider: Arc<P>,
    ) -> Self {
        self.entries.push(ChainEntry {
            name: name.into(),
            priority,
            capabilities,
            provider,
            breaker: CircuitBreaker::new(self.breaker),
        });
        self
    }

    /// Terminal provider consulted when every ranked provider is exhausted.
    /// Implementations must not fail.
    pub fn offline(mut self, name: impl Into<String>, provider: Arc<P>) -> Self {
        self.offline = Some((name.into(), provider));
        self
    }

    pub fn build(mut self) -> ProviderChain<P> {
        self.entries.sort_by_key(|e| e.priority);
        ProviderChain {
            entries: self.entries,
            offline: self.offline,
            call_timeout: self.call_timeout,
        }
    }
}

impl<P: ?Sized> Default for ProviderChainBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ?Sized + Send + Sync> ProviderChain<P> {
    pub fn builder() -> ProviderChainBuilder<P> {
        ProviderChainBuilder::new()
    }

    /// Circuit state of a named provider, for diagnostics and tests.
    pub fn circuit_state(&self, name: &str) -> Option<CircuitState> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.breaker.state())
    }

    /// Invoke `op` against providers declaring `capability`, in priority
    /// order (a preferred provider is tried first when eligible). Failures
    /// and timeouts trip the per-provider breaker and fall through to the
    /// next entry; exhaustion falls back to the terminal offline provider.
    pub async fn invoke<T, F, Fut>(
        &self,
        capability: ProviderCapability,
        preferred: Option<&str>,
        op: F,
    ) -> ProviderResult<T>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        let started = Instant::now();
        let mut last_error: Option<String> = None;
        let mut last_provider = String::new();

        let preferred_idx = preferred.and_then(|name| {
            self.entries
                .iter()
                .position(|e| e.name == name && e.capabilities.contains(&capability))
        });
        let order = preferred_idx
            .into_iter()
            .chain((0..self.entries.len()).filter(|i| Some(*i) != preferred_idx));

        for idx in order {
            let entry = &self.entries[idx];
            if !entry.capabilities.contains(&capability) {
                continue;
            }
            let trial = match entry.breaker.try_acquire() {
                Permit::Skip => {
                    tracing::debug!(provider = %entry.name, "circuit open, skipping provider");
                    continue;
                }
                Permit::Call => None,
                Permit::Trial => Some(TrialPermit {
                    breaker: &entry.breaker,
                    resolved: false,
                }),
            };

            match tokio::time::timeout(self.call_timeout, op(entry.provider.clone())).await {
                Ok(Ok(payload)) => {
                    match trial {
                        Some(permit) => permit.success(),
                        None => entry.breaker.record_success(),
                    }
                    return ProviderResult {
                        payload: Some(payload),
                        provider: entry.name.clone(),
                        degraded: false,
                        error: None,
                        elapsed: started.elapsed(),
                    };
                }
                Ok(Err(err)) => {
                    match trial {
                        Some(permit) => permit.failure(),
                        None => entry.breaker.record_failure(),
                    }
                    tracing::warn!(provider = %entry.name, error = %err, "provider call failed");
                    last_error = Some(err.to_string());
                    last_provider = entry.name.clone();
                }
                Err(_) => {
                    match trial {
                        Some(permit) => permit.failure(),
                        None => entry.breaker.record_failure(),
                    }
                    tracing::warn!(
                        provider = %entry.name,
                        timeout_ms = self.call_timeout.as_millis() as u64,
                        "provider call timed out"
                    );
                    last_error = Some(format!(
                        "timed out after {}ms",
                        self.call_timeout.as_millis()
                    ));
                    last_provider = entry.name.clone();
                }
            }
        }

        if let Some((name, provider)) = &self.offline {
            tracing::info!(provider = %name, "all ranked providers exhausted, using offline fallback");
            match op(provider.clone()).await {
                Ok(payload) => {
                    return ProviderResult {
                        payload: Some(payload),
                        provider: name.clone(),
                        degraded: true,
                        error: None,
                        elapsed: started.elapsed(),
                    };
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                    last_provider = name.clone();
                }
            }
        }

        ProviderResult {
            payload: None,
            provider: last_provider,
            degraded: true,
            error: last_error.or_else(|| Some("no eligible provider".to_string())),
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl Flaky {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }

        async fn call(&self) -> Result<u32> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::provider("flaky", "simulated failure"))
            } else {
                Ok(n)
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn chain(
        primary: Arc<Flaky>,
        secondary: Arc<Flaky>,
        offline: Arc<Flaky>,
        config: BreakerConfig,
    ) -> ProviderChain<Flaky> {
        ProviderChain::builder()
            .breaker(config)
            .provider(
                "primary",
                0,
                vec![ProviderCapability::Synthesis],
                primary,
            )
            .provider(
                "secondary",
                1,
                vec![ProviderCapability::Synthesis],
                secondary,
            )
            .offline("offline", offline)
            .build()
    }

    #[tokio::test]
    async fn first_eligible_provider_serves() {
        let primary = Arc::new(Flaky::new(0));
        let secondary = Arc::new(Flaky::new(0));
        let chain = chain(
            primary.clone(),
            secondary.clone(),
            Arc::new(Flaky::new(0)),
            BreakerConfig::default(),
        );

        let result = chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert!(result.is_success());
        assert_eq!(result.provider, "primary");
        assert!(!result.degraded);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn failure_falls_through_to_secondary() {
        let primary = Arc::new(Flaky::new(u32::MAX));
        let secondary = Arc::new(Flaky::new(0));
        let chain = chain(
            primary,
            secondary,
            Arc::new(Flaky::new(0)),
            BreakerConfig::default(),
        );

        let result = chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert!(result.is_success());
        assert_eq!(result.provider, "secondary");
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_skips_primary() {
        let primary = Arc::new(Flaky::new(u32::MAX));
        let secondary = Arc::new(Flaky::new(0));
        let config = BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        };
        let chain = chain(primary.clone(), secondary, Arc::new(Flaky::new(0)), config);

        for _ in 0..3 {
            chain
                .invoke(ProviderCapability::Synthesis, None, |p| async move {
                    p.call().await
                })
                .await;
        }
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::Open));
        let before = primary.calls();

        // Within the cooldown the primary must not be attempted at all.
        let result = chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert_eq!(result.provider, "secondary");
        assert_eq!(primary.calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_permits_exactly_one_trial() {
        let primary = Arc::new(Flaky::new(3));
        let secondary = Arc::new(Flaky::new(0));
        let config = BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        };
        let chain = chain(primary.clone(), secondary, Arc::new(Flaky::new(0)), config);

        for _ in 0..3 {
            chain
                .invoke(ProviderCapability::Synthesis, None, |p| async move {
                    p.call().await
                })
                .await;
        }
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::Open));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::HalfOpen));

        // Trial succeeds (failures exhausted), circuit closes again.
        let result = chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert_eq!(result.provider, "primary");
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_circuit() {
        let primary = Arc::new(Flaky::new(u32::MAX));
        let secondary = Arc::new(Flaky::new(0));
        let config = BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        };
        let chain = chain(primary, secondary, Arc::new(Flaky::new(0)), config);

        chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::Open));

        tokio::time::advance(Duration::from_secs(61)).await;
        chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_half_open_trial_reopens_circuit() {
        struct FailThenHang {
            calls: AtomicU32,
        }

        impl FailThenHang {
            async fn call(&self) -> Result<u32> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::provider("primary", "first failure"))
                } else {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(1)
                }
            }
        }

        let provider = Arc::new(FailThenHang {
            calls: AtomicU32::new(0),
        });
        let chain: ProviderChain<FailThenHang> = ProviderChain::builder()
            .breaker(BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(60),
            })
            .call_timeout(Duration::from_secs(7200))
            .provider(
                "primary",
                0,
                vec![ProviderCapability::Generation],
                provider.clone(),
            )
            .build();

        chain
            .invoke(ProviderCapability::Generation, None, |p| async move {
                p.call().await
            })
            .await;
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::Open));

        // Dispatch a trial after the cooldown and abandon it mid-call, the
        // way a cancelled turn drops the invoke future.
        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            chain.invoke(ProviderCapability::Generation, None, |p| async move {
                p.call().await
            }),
        )
        .await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(chain.circuit_state("primary"), Some(CircuitState::Open));

        // The next cooldown must permit a fresh trial rather than skipping
        // the provider forever.
        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            chain.invoke(ProviderCapability::Generation, None, |p| async move {
                p.call().await
            }),
        )
        .await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_falls_back_to_offline() {
        let primary = Arc::new(Flaky::new(u32::MAX));
        let secondary = Arc::new(Flaky::new(u32::MAX));
        let offline = Arc::new(Flaky::new(0));
        let chain = chain(primary, secondary, offline, BreakerConfig::default());

        let result = chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert!(result.is_success());
        assert!(result.degraded);
        assert_eq!(result.provider, "offline");
    }

    #[tokio::test]
    async fn capability_filter_skips_incapable_providers() {
        let transcriber = Arc::new(Flaky::new(0));
        let synthesizer = Arc::new(Flaky::new(0));
        let chain: ProviderChain<Flaky> = ProviderChain::builder()
            .provider(
                "transcriber",
                0,
                vec![ProviderCapability::Transcription],
                transcriber.clone(),
            )
            .provider(
                "synthesizer",
                1,
                vec![ProviderCapability::Synthesis],
                synthesizer,
            )
            .build();

        let result = chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.call().await
            })
            .await;
        assert_eq!(result.provider, "synthesizer");
        assert_eq!(transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn preferred_provider_tried_first() {
        let primary = Arc::new(Flaky::new(0));
        let secondary = Arc::new(Flaky::new(0));
        let chain = chain(
            primary.clone(),
            secondary,
            Arc::new(Flaky::new(0)),
            BreakerConfig::default(),
        );

        let result = chain
            .invoke(
                ProviderCapability::Synthesis,
                Some("secondary"),
                |p| async move { p.call().await },
            )
            .await;
        assert_eq!(result.provider, "secondary");
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_breaker_failure() {
        struct Stuck;
        impl Stuck {
            async fn call(&self) -> Result<u32> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(0)
            }
        }

        let chain: ProviderChain<Stuck> = ProviderChain::builder()
            .breaker(BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(60),
            })
            .call_timeout(Duration::from_millis(100))
            .provider(
                "stuck",
                0,
                vec![ProviderCapability::Generation],
                Arc::new(Stuck),
            )
            .build();

        let result = chain
            .invoke(ProviderCapability::Generation, None, |p| async move {
                p.call().await
            })
            .await;
        assert!(!result.is_success());
        assert_eq!(chain.circuit_state("stuck"), Some(CircuitState::Open));
    }
}
