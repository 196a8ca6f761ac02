/*
    driver.rs - Initiator side of the sync protocol

    One exchange with a peer:
    1. prepare_outgoing (marks the delta pending)
    2. ship it over the transport, receive the peer's reply
    3. confirm_delivery on success, abort_exchange on failure
    4. merge the reply

    The pending send is held by a guard that aborts it when dropped, so an
    attempt cancelled at an await point (host timeout, select!, task abort)
    never leaves the peer stuck in flight.

    Failed attempts are retried with exponential backoff. The periodic loop
    walks a fixed peer list every `sync_interval` until shutdown is
    signalled, reaping tombstones after each round if configured.
*/

use crate::config::{RetryConfig, SyncConfig};
use crate::core_sync::store::errors::{SyncError, SyncResult};
use crate::core_sync::sync::delta::Delta;
use crate::core_sync::sync::engine::SyncEngine;
use crate::core_sync::sync::transport::{SyncRequest, Transport};
use crate::metrics::{self as sync_metrics, ExchangeTimer};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Backoff between failed attempts of one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Try once, never retry
    pub fn no_retry() -> Self {
        RetryPolicy { max_attempts: 1, ..Default::default() }
    }

    /// Delay before retry number `retry` (1-based): doubles each time, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = self.initial_backoff.saturating_mul(factor).min(self.max_backoff);
        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            half + delay.mul_f64(rand::rng().random_range(0.0..=0.5))
        } else {
            delay
        }
    }
}

/// What one successful exchange did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub peer: String,
    pub exchange_id: Uuid,
    pub attempts: u32,
    /// Entries shipped to the peer
    pub sent: usize,
    /// Entries in the peer's reply
    pub received: usize,
    pub applied: usize,
    pub conflicts: usize,
    pub rejected: usize,
    pub new_devices: Vec<String>,
    pub elapsed: Duration,
}

/// Outcome of one pass over the peer list
#[derive(Debug, Default)]
pub struct RoundSummary {
    pub synced: Vec<SyncSummary>,
    pub failed: Vec<(String, SyncError)>,
    pub reaped: usize,
}

struct AttemptFailure {
    error: SyncError,
    retryable: bool,
}

impl From<SyncError> for AttemptFailure {
    fn from(error: SyncError) -> Self {
        let retryable = error.is_retryable();
        AttemptFailure { error, retryable }
    }
}

/// Outgoing delta marked pending for one peer; aborted on drop unless confirmed
struct PendingExchange<'a> {
    engine: &'a SyncEngine,
    peer: &'a str,
    armed: bool,
}

impl<'a> PendingExchange<'a> {
    fn begin(engine: &'a SyncEngine, peer: &'a str) -> SyncResult<(Self, Delta)> {
        let outgoing = engine.prepare_outgoing(peer)?;
        Ok((PendingExchange { engine, peer, armed: true }, outgoing))
    }

    fn confirm(mut self) -> SyncResult<()> {
        self.armed = false;
        self.engine.confirm_delivery(self.peer)
    }
}

impl Drop for PendingExchange<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.engine.abort_exchange(self.peer) {
                warn!(peer = self.peer, error = %e, "could not abort pending exchange");
            }
        }
    }
}

/// Drives exchanges for one engine over a transport
pub struct SyncDriver {
    engine: Arc<SyncEngine>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    reap_after_sync: bool,
}

impl SyncDriver {
    pub fn new(engine: Arc<SyncEngine>, transport: Arc<dyn Transport>) -> Self {
        SyncDriver {
            engine,
            transport,
            retry: RetryPolicy::default(),
            reap_after_sync: false,
        }
    }

    /// Driver configured from the `[sync]` section
    pub fn from_config(engine: Arc<SyncEngine>, transport: Arc<dyn Transport>, config: &SyncConfig) -> Self {
        Self::new(engine, transport)
            .with_retry(RetryPolicy::from(&config.retry))
            .with_reaping(config.reap_after_sync)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reaping(mut self, enabled: bool) -> Self {
        self.reap_after_sync = enabled;
        self
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Run one full exchange with `peer`, retrying transient failures
    pub async fn sync_peer(&self, peer: &str) -> SyncResult<SyncSummary> {
        let exchange_id = Uuid::new_v4();
        let span = info_span!("exchange", device = %self.engine.device_id(), peer, %exchange_id);
        self.sync_peer_with_retry(peer, exchange_id).instrument(span).await
    }

    async fn sync_peer_with_retry(&self, peer: &str, exchange_id: Uuid) -> SyncResult<SyncSummary> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let timer = ExchangeTimer::start();
            match self.attempt(peer).await {
                Ok(mut summary) => {
                    summary.elapsed = timer.stop(true);
                    summary.attempts = attempt;
                    summary.exchange_id = exchange_id;
                    info!(
                        attempts = attempt,
                        sent = summary.sent,
                        received = summary.received,
                        applied = summary.applied,
                        conflicts = summary.conflicts,
                        "exchange complete"
                    );
                    return Ok(summary);
                }
                Err(failure) => {
                    timer.stop(false);
                    if !failure.retryable || attempt >= self.retry.max_attempts {
                        warn!(attempts = attempt, error = %failure.error, "exchange failed");
                        return Err(failure.error);
                    }
                    let delay = self.retry.backoff(attempt);
                    warn!(attempt, ?delay, error = %failure.error, "exchange attempt failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, peer: &str) -> Result<SyncSummary, AttemptFailure> {
        let (pending, outgoing) = PendingExchange::begin(&self.engine, peer)?;
        let sent = outgoing.len();
        sync_metrics::delta_entries(sent);

        let request = SyncRequest {
            from: self.engine.device_id().to_string(),
            to: peer.to_string(),
            payload: outgoing.encode()?,
        };
        let reply = self.transport.send(request).await.map_err(SyncError::from)?;
        pending.confirm()?;

        let incoming = Delta::decode(&reply)?;
        let report = self.engine.receive(peer, &incoming)?;
        debug!(received = incoming.len(), new_devices = ?report.new_devices, "merged reply");

        Ok(SyncSummary {
            peer: peer.to_string(),
            exchange_id: Uuid::nil(),
            attempts: 0,
            sent,
            received: incoming.len(),
            applied: report.applied(),
            conflicts: report.conflicts(),
            rejected: report.rejected.len(),
            new_devices: report.new_devices,
            elapsed: Duration::ZERO,
        })
    }

    /// Exchange with every peer once, then reap if configured
    pub async fn sync_round(&self, peers: &[String]) -> RoundSummary {
        let mut round = RoundSummary::default();
        for peer in peers {
            match self.sync_peer(peer).await {
                Ok(summary) => round.synced.push(summary),
                Err(e) => round.failed.push((peer.clone(), e)),
            }
        }

        if self.reap_after_sync {
            match self.engine.reap_tombstones() {
                Ok(reaped) => round.reaped = reaped,
                Err(e) => warn!(error = %e, "reaping failed"),
            }
        }
        round
    }

    /// Sync with `peers` every `interval` until `shutdown` flips to true or
    /// its sender is dropped. Returns the number of completed rounds.
    pub async fn run(&self, peers: Vec<String>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rounds = 0;

        info!(device = %self.engine.device_id(), peers = peers.len(), ?interval, "sync loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let round = self.sync_round(&peers).await;
            rounds += 1;
            debug!(
                round = rounds,
                synced = round.synced.len(),
                failed = round.failed.len(),
                reaped = round.reaped,
                "sync round finished"
            );
        }
        info!(rounds, "sync loop stopped");
        rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::sync::transport::{LoopbackTransport, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Never answers its first request
    struct StallFirst {
        inner: Arc<LoopbackTransport>,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl Transport for StallFirst {
        async fn send(&self, request: SyncRequest) -> Result<Vec<u8>, TransportError> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.send(request).await
        }
    }

    fn setup() -> (Arc<SyncEngine>, Arc<SyncEngine>, Arc<LoopbackTransport>) {
        let a = Arc::new(SyncEngine::new("A").unwrap());
        let b = Arc::new(SyncEngine::new("B").unwrap());
        let transport = Arc::new(LoopbackTransport::new());
        transport.attach(a.clone()).unwrap();
        transport.attach(b.clone()).unwrap();
        (a, b, transport)
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = fast_retry(10);
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(4), Duration::from_millis(80));
        assert_eq!(policy.backoff(5), Duration::from_millis(100));
        assert_eq!(policy.backoff(40), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy { jitter: true, ..fast_retry(3) };
        for _ in 0..50 {
            let d = policy.backoff(2);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20), "{:?}", d);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_peer_exchanges_both_ways() {
        let (a, b, transport) = setup();
        a.set("x", "1").unwrap();
        b.set("y", "2").unwrap();

        let driver = SyncDriver::new(a.clone(), transport);
        let summary = driver.sync_peer("B").await.unwrap();

        assert_eq!(summary.sent, 1);
        // The reply leaves out what A just sent
        assert_eq!(summary.received, 1);
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.new_devices, vec!["B".to_string()]);
        assert_eq!(a.get("y").unwrap(), Some(b"2".to_vec()));
        assert_eq!(b.get("x").unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_dropped_response() {
        let (a, b, transport) = setup();
        b.set("y", "2").unwrap();
        transport.drop_next_responses(2);

        let driver = SyncDriver::new(a.clone(), transport).with_retry(fast_retry(3));
        let summary = driver.sync_peer("B").await.unwrap();

        assert_eq!(summary.attempts, 3);
        assert_eq!(a.get("y").unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (a, _b, transport) = setup();
        a.set("x", "1").unwrap();
        transport.drop_next_requests(5);

        let driver = SyncDriver::new(a.clone(), transport).with_retry(fast_retry(2));
        let err = driver.sync_peer("B").await.unwrap_err();

        assert!(matches!(err, SyncError::Transport(_)));
        let state = a.sync_state("B").unwrap().unwrap();
        assert!(state.last_sent_clock.is_empty());
        // Nothing left in flight
        a.prepare_outgoing("B").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_peer_not_retried() {
        let (a, _b, transport) = setup();
        let driver = SyncDriver::new(a, transport).with_retry(fast_retry(5));

        let start = tokio::time::Instant::now();
        assert!(driver.sync_peer("Z").await.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_reaps_when_configured() {
        let (a, b, transport) = setup();
        a.set("k", "v").unwrap();
        let driver = SyncDriver::new(a.clone(), transport).with_reaping(true);

        driver.sync_round(&["B".to_string()]).await;
        a.delete("k").unwrap();
        let round = driver.sync_round(&["B".to_string()]).await;

        assert!(round.failed.is_empty());
        assert_eq!(round.reaped, 1);
        assert!(b.entry("k").unwrap().unwrap().deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (a, _b, transport) = setup();
        let driver = Arc::new(SyncDriver::new(a, transport));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.run(vec!["B".to_string()], Duration::from_secs(30), rx).await })
        };

        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(true).unwrap();
        let rounds = handle.await.unwrap();

        // Ticks at 0s, 30s and 60s
        assert_eq!(rounds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_attempt_releases_peer() {
        let (a, b, transport) = setup();
        a.set("k", "v").unwrap();
        let stall = Arc::new(StallFirst { inner: transport, stalled: AtomicBool::new(false) });
        let driver = SyncDriver::new(a.clone(), stall);

        let timed_out = tokio::time::timeout(Duration::from_secs(5), driver.sync_peer("B")).await;
        assert!(timed_out.is_err());
        assert!(a.sync_state("B").unwrap().unwrap().last_sent_clock.is_empty());

        let summary = driver.sync_peer("B").await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(b.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
