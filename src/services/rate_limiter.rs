//! Rate limiting, retries and circuit breaking for external API calls
//!
//! Every HTTP collaborator goes through a rate-limited client so the
//! orchestrator cannot overwhelm an upstream, and debrid calls additionally
//! pass a per-host circuit breaker that opens on repeated 5xx/429.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use parking_lot::Mutex;
use reqwest::{Client, Response};
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Requests-per-second budget for one upstream.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Steady-state requests per second.
    pub per_second: u32,
    /// Short bursts may exceed the steady rate up to this many requests.
    pub burst: u32,
}

impl RateLimit {
    pub const fn new(per_second: u32, burst: u32) -> Self {
        Self { per_second, burst }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        // Polite enough for upstreams that publish no limits.
        Self::new(3, 6)
    }
}

/// A rate-limited HTTP client wrapper
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    name: String,
}

impl RateLimitedClient {
    /// Create a new rate-limited client
    pub fn new(name: &str, limit: RateLimit) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(limit.per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(limit.burst).unwrap_or(NonZeroU32::MIN));

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("curator/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("client construction with static options");

        Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            name: name.to_string(),
        }
    }

    /// Client for metadata indexer APIs (TMDB/TVDB-like quotas).
    pub fn for_indexer_api() -> Self {
        Self::new("indexer", RateLimit::new(4, 10))
    }

    /// Client for the scraper aggregator. Conservative: aggregators fan out
    /// to many indexers themselves.
    pub fn for_aggregator() -> Self {
        Self::new("aggregator", RateLimit::new(1, 3))
    }

    /// Client for debrid downloader APIs.
    pub fn for_debrid(name: &str) -> Self {
        Self::new(name, RateLimit::new(2, 5))
    }

    /// Client for content providers (request inboxes, watchlists).
    pub fn for_content(name: &str) -> Self {
        Self::new(name, RateLimit::default())
    }

    /// Client for the media library server.
    pub fn for_library() -> Self {
        Self::new("library", RateLimit::new(5, 10))
    }

    /// Wait for rate limit and make a GET request with headers
    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(upstream = %self.name, url = %url, "GET");

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        request.send().await.context("HTTP request failed")
    }

    /// Wait for rate limit and make a GET request with headers and query
    /// parameters
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &T,
    ) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(upstream = %self.name, url = %url, "GET with query");

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        request
            .query(query)
            .send()
            .await
            .context("HTTP request failed")
    }

    /// Wait for rate limit and POST a form body
    pub async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &T,
    ) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(upstream = %self.name, url = %url, "POST form");

        let mut request = self.client.post(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        request.form(form).send().await.context("HTTP request failed")
    }

    /// Wait for rate limit and POST a plain-text body, returning the
    /// response body. Used by the log uploader.
    pub async fn post_text(&self, url: &str, body: String) -> Result<String> {
        self.wait_for_permit().await;
        debug!(upstream = %self.name, url = %url, bytes = body.len(), "POST text");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await
            .context("HTTP request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("upload rejected with http {}", response.status());
        }
        response.text().await.context("reading upload response")
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

/// Retry policy for calls to flaky upstreams.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub first_delay: Duration,
    /// Delays never grow past this.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub growth: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            first_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(20),
            growth: 2.0,
        }
    }
}

impl RetryPolicy {
    fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.first_delay,
            max_interval: self.max_delay,
            multiplier: self.growth,
            max_elapsed_time: Some(Duration::from_secs(90)),
            ..Default::default()
        }
    }
}

/// Run `call` until it succeeds or the policy is spent. Intermediate
/// failures log at debug; only the final one warns.
pub async fn retry_async<T, E, Fut, F>(call: F, policy: &RetryPolicy, what: &str) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = policy.to_backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if attempt >= policy.max_attempts {
            warn!(call = %what, attempt, error = %error, "Giving up on upstream call");
            return Err(error);
        }
        let Some(delay) = backoff.next_backoff() else {
            warn!(call = %what, attempt, error = %error, "Retry window exhausted");
            return Err(error);
        };

        debug!(
            call = %what,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Upstream call failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Default)]
struct HostCircuit {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-host circuit breaker. Opens after `threshold` consecutive transient
/// failures and rejects calls until the cool-off passes.
pub struct CircuitBreaker {
    hosts: Mutex<HashMap<String, HostCircuit>>,
    threshold: u32,
    cooloff: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooloff: Duration) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            threshold: threshold.max(1),
            cooloff,
        }
    }

    /// Whether a call to this host is currently allowed. An open circuit
    /// that has cooled off half-opens: the next call probes the host.
    pub fn allows(&self, host: &str) -> bool {
        let mut hosts = self.hosts.lock();
        let Some(circuit) = hosts.get_mut(host) else {
            return true;
        };
        match circuit.opened_at {
            Some(opened) if opened.elapsed() < self.cooloff => false,
            Some(_) => {
                // Half-open: allow one probe through.
                circuit.opened_at = None;
                circuit.consecutive_failures = self.threshold.saturating_sub(1);
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self, host: &str) {
        self.hosts.lock().remove(host);
    }

    /// Record a transient failure (5xx/429/timeout). Opens the circuit at
    /// the threshold.
    pub fn record_failure(&self, host: &str) {
        let mut hosts = self.hosts.lock();
        let circuit = hosts.entry(host.to_string()).or_default();
        circuit.consecutive_failures += 1;
        if circuit.consecutive_failures >= self.threshold && circuit.opened_at.is_none() {
            warn!(host, failures = circuit.consecutive_failures, "Circuit opened");
            circuit.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            first_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            growth: 1.0,
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_async(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("still flaky".to_string())
                } else {
                    Ok(n)
                }
            },
            &fast_policy(5),
            "flaky upstream",
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_at_the_attempt_cap() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down for good".to_string())
            },
            &fast_policy(3),
            "dead upstream",
        )
        .await;

        assert_eq!(result.unwrap_err(), "down for good");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_first_success_untouched() {
        let result: Result<&str, String> =
            retry_async(|| async { Ok("fine") }, &fast_policy(1), "healthy upstream").await;
        assert_eq!(result.unwrap(), "fine");
    }

    #[test]
    fn circuit_opens_at_threshold_and_cools_off() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(20));
        assert!(breaker.allows("api.example.com"));

        breaker.record_failure("api.example.com");
        breaker.record_failure("api.example.com");
        assert!(breaker.allows("api.example.com"));
        breaker.record_failure("api.example.com");
        assert!(!breaker.allows("api.example.com"));

        std::thread::sleep(Duration::from_millis(25));
        // Cooled off: one probe allowed, a success resets the host.
        assert!(breaker.allows("api.example.com"));
        breaker.record_success("api.example.com");
        assert!(breaker.allows("api.example.com"));
    }

    #[test]
    fn circuit_failure_during_probe_reopens_immediately() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(20));
        breaker.record_failure("h");
        breaker.record_failure("h");
        assert!(!breaker.allows("h"));

        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allows("h"));
        breaker.record_failure("h");
        assert!(!breaker.allows("h"));
    }

    #[test]
    fn circuits_are_per_host() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("a");
        assert!(!breaker.allows("a"));
        assert!(breaker.allows("b"));
    }
}
