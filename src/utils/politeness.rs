//! Per-source request pacing.
//!
//! Every outbound call to a metadata source goes through a
//! [`PolitenessGovernor`], which keeps one [`SourcePacer`] per source and
//! combines two mechanisms:
//!
//! - **Adaptive delay**: a rolling window of the last ten call latencies.
//!   When the newest latency is above the window average the delay before
//!   the next call grows by 100ms; when it is below, it shrinks by 100ms
//!   (never below zero).
//! - **Rate-limit compliance**: at most `limit` calls are started within any
//!   `interval`. Limits come from configuration and are replaced by the
//!   `X-Rate-Limit-Limit` / `X-Rate-Limit-Interval` headers when a source
//!   advertises them.
//!
//! Calls to the same source are serialized; different sources are independent.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const LATENCY_WINDOW: usize = 10;
const DELAY_STEP: Duration = Duration::from_millis(100);
/// Call start times kept for a source with no known limit
const UNLIMITED_HISTORY: usize = 256;

static INTERVAL_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*(h|m|s)").unwrap());

/// Maximum number of calls per interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub interval: Duration,
}

impl RateLimit {
    /// Returns `None` for a zero limit or interval
    pub fn new(limit: u32, interval: Duration) -> Option<Self> {
        if limit == 0 || interval.is_zero() {
            None
        } else {
            Some(Self { limit, interval })
        }
    }

    /// Build from advertised rate-limit header values
    pub fn from_headers(limit: &str, interval: &str) -> Option<Self> {
        let limit = limit.trim().parse::<u32>().ok()?;
        Self::new(limit, parse_interval(interval)?)
    }
}

/// Parse interval strings like `1s`, `5m`, `1h30m`; a bare number means seconds
pub fn parse_interval(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut matched = false;
    for caps in INTERVAL_PART.captures_iter(value) {
        let amount: u64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "h" => 3600,
            "m" => 60,
            _ => 1,
        };
        total += amount * unit;
        matched = true;
    }
    matched.then(|| Duration::from_secs(total))
}

/// Pacing state for a single source
#[derive(Debug, Default)]
pub struct SourcePacer {
    latencies: VecDeque<Duration>,
    delay: Duration,
    rate_limit: Option<RateLimit>,
    recent_calls: VecDeque<Instant>,
}

impl SourcePacer {
    pub fn new(rate_limit: Option<RateLimit>) -> Self {
        Self {
            rate_limit,
            ..Default::default()
        }
    }

    /// Current adaptive delay
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    pub fn set_rate_limit(&mut self, rate_limit: RateLimit) {
        self.rate_limit = Some(rate_limit);
    }

    /// Feed one observed latency into the rolling window and adjust the delay
    pub fn observe_latency(&mut self, latency: Duration) {
        self.latencies.push_back(latency);
        while self.latencies.len() > LATENCY_WINDOW {
            self.latencies.pop_front();
        }

        let sum: Duration = self.latencies.iter().sum();
        let average = sum / self.latencies.len() as u32;
        if latency > average {
            self.delay += DELAY_STEP;
        } else if latency < average {
            self.delay = self.delay.saturating_sub(DELAY_STEP);
        }
    }

    /// Sleep until the next call is allowed, then record it as started
    async fn wait_turn(&mut self, source: &str) {
        if !self.delay.is_zero() {
            tracing::trace!(source, delay_ms = self.delay.as_millis() as u64, "Adaptive delay");
            tokio::time::sleep(self.delay).await;
        }

        if let Some(rate_limit) = self.rate_limit {
            while self.recent_calls.len() >= rate_limit.limit as usize {
                let Some(oldest) = self.recent_calls.front().copied() else {
                    break;
                };
                let ready_at = oldest + rate_limit.interval;
                if ready_at > Instant::now() {
                    tracing::debug!(
                        source,
                        limit = rate_limit.limit,
                        interval_ms = rate_limit.interval.as_millis() as u64,
                        "Rate limit reached, waiting"
                    );
                    tokio::time::sleep_until(ready_at).await;
                }
                self.recent_calls.pop_front();
            }
        }

        // Remembered without a limit too, so a limit advertised later counts this call
        self.recent_calls.push_back(Instant::now());
        let keep = self.rate_limit.map_or(UNLIMITED_HISTORY, |r| r.limit as usize);
        while self.recent_calls.len() > keep {
            self.recent_calls.pop_front();
        }
    }
}

/// Shared pacing for all sources
#[derive(Debug, Default)]
pub struct PolitenessGovernor {
    pacers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<SourcePacer>>>>,
    configured: HashMap<String, RateLimit>,
}

impl PolitenessGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a starting rate limit for a source
    pub fn with_limit(mut self, source: impl Into<String>, rate_limit: RateLimit) -> Self {
        self.configured.insert(source.into(), rate_limit);
        self
    }

    fn pacer(&self, source: &str) -> Arc<tokio::sync::Mutex<SourcePacer>> {
        let mut pacers = self.pacers.lock().unwrap_or_else(PoisonError::into_inner);
        pacers
            .entry(source.to_string())
            .or_insert_with(|| {
                let configured = self.configured.get(source).copied();
                Arc::new(tokio::sync::Mutex::new(SourcePacer::new(configured)))
            })
            .clone()
    }

    /// Run `op` as a paced call to `source`.
    ///
    /// Waits for the adaptive delay and any rate limit, runs the call, and
    /// records its latency whether it succeeded or not.
    pub async fn call<T, E, F, Fut>(&self, source: &str, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let pacer = self.pacer(source);
        let mut pacer = pacer.lock().await;
        pacer.wait_turn(source).await;

        let started = Instant::now();
        let result = op().await;
        pacer.observe_latency(started.elapsed());
        result
    }

    /// Replace a source's rate limit with one it advertised
    pub async fn advertise(&self, source: &str, rate_limit: RateLimit) {
        let pacer = self.pacer(source);
        let mut pacer = pacer.lock().await;
        if pacer.rate_limit() != Some(rate_limit) {
            tracing::debug!(
                source,
                limit = rate_limit.limit,
                interval_ms = rate_limit.interval.as_millis() as u64,
                "Source advertised rate limit"
            );
            pacer.set_rate_limit(rate_limit);
        }
    }

    pub async fn delay(&self, source: &str) -> Duration {
        self.pacer(source).lock().await.delay()
    }

    pub async fn rate_limit(&self, source: &str) -> Option<RateLimit> {
        self.pacer(source).lock().await.rate_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_interval("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_interval("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_interval("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_interval("soon"), None);
    }

    #[test]
    fn test_rate_limit_from_headers() {
        let limit = RateLimit::from_headers("50", "1s").unwrap();
        assert_eq!(limit.limit, 50);
        assert_eq!(limit.interval, Duration::from_secs(1));
        assert!(RateLimit::from_headers("0", "1s").is_none());
        assert!(RateLimit::from_headers("many", "1s").is_none());
    }

    #[test]
    fn test_adaptive_delay() {
        let mut pacer = SourcePacer::new(None);
        pacer.observe_latency(ms(100));
        pacer.observe_latency(ms(100));
        assert_eq!(pacer.delay(), Duration::ZERO);

        pacer.observe_latency(ms(500));
        assert_eq!(pacer.delay(), ms(100));

        pacer.observe_latency(ms(10));
        assert_eq!(pacer.delay(), Duration::ZERO);

        // never below zero
        pacer.observe_latency(ms(5));
        assert_eq!(pacer.delay(), Duration::ZERO);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut pacer = SourcePacer::new(None);
        for _ in 0..20 {
            pacer.observe_latency(ms(50));
        }
        assert_eq!(pacer.latencies.len(), LATENCY_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delays_extra_call() {
        let governor =
            PolitenessGovernor::new().with_limit("crossref", RateLimit::new(2, Duration::from_secs(1)).unwrap());

        let mut started = Vec::new();
        for _ in 0..3 {
            let at = governor
                .call("crossref", || async { Ok::<_, ()>(Instant::now()) })
                .await
                .unwrap();
            started.push(at);
        }

        assert!(started[1] - started[0] < ms(500));
        assert!(started[2] - started[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_are_paced_independently() {
        let governor =
            PolitenessGovernor::new().with_limit("slow", RateLimit::new(1, Duration::from_secs(10)).unwrap());

        governor.call("slow", || async { Ok::<_, ()>(()) }).await.unwrap();
        let before = Instant::now();
        governor.call("fast", || async { Ok::<_, ()>(()) }).await.unwrap();
        assert!(Instant::now() - before < ms(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertised_limit_replaces_configured() {
        let governor =
            PolitenessGovernor::new().with_limit("crossref", RateLimit::new(50, Duration::from_secs(1)).unwrap());
        let advertised = RateLimit::new(1, Duration::from_secs(2)).unwrap();
        governor.advertise("crossref", advertised).await;
        assert_eq!(governor.rate_limit("crossref").await, Some(advertised));

        let first = governor.call("crossref", || async { Ok::<_, ()>(Instant::now()) }).await.unwrap();
        let second = governor.call("crossref", || async { Ok::<_, ()>(Instant::now()) }).await.unwrap();
        assert!(second - first >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertised_limit_counts_earlier_unlimited_call() {
        let governor = PolitenessGovernor::new();
        let first = governor.call("crossref", || async { Ok::<_, ()>(Instant::now()) }).await.unwrap();

        governor
            .advertise("crossref", RateLimit::new(1, Duration::from_secs(2)).unwrap())
            .await;
        let second = governor.call("crossref", || async { Ok::<_, ()>(Instant::now()) }).await.unwrap();
        assert!(second - first >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_history_is_bounded() {
        let mut pacer = SourcePacer::new(None);
        for _ in 0..UNLIMITED_HISTORY + 10 {
            pacer.wait_turn("crossref").await;
        }
        assert_eq!(pacer.recent_calls.len(), UNLIMITED_HISTORY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_calls_still_observed() {
        let governor = PolitenessGovernor::new();
        let result = governor
            .call("pubmed", || async {
                tokio::time::sleep(ms(300)).await;
                Err::<(), _>("boom")
            })
            .await;
        assert!(result.is_err());
        let pacer = governor.pacer("pubmed");
        assert_eq!(pacer.lock().await.latencies.len(), 1);
    }
}
