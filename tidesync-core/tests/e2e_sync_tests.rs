/// End-to-end sync tests
///
/// These tests drive full replicas through the public API:
/// - Offline edits and reconnection over a transport
/// - Lost requests and replies with retry
/// - Replies corrupted in transit and exchanges cancelled mid-flight
/// - Relay through an intermediary device
/// - Restart from a persisted replica
/// - Background sync loop with shutdown
///
/// Run with: cargo test --test e2e_sync_tests

#[cfg(test)]
mod e2e_sync_tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tidesync_core::core_sync::store::snapshot::{read_file, write_atomic};
    use tidesync_core::core_sync::sync::{SyncRequest, TransportError};
    use tidesync_core::{LoopbackTransport, RetryPolicy, SyncDriver, SyncEngine, SyncError, Transport};
    use tokio::sync::watch;

    /// Delivers every request, but mangles the first reply on its way back
    struct CorruptFirstReply {
        inner: Arc<LoopbackTransport>,
        used: AtomicBool,
    }

    #[async_trait]
    impl Transport for CorruptFirstReply {
        async fn send(&self, request: SyncRequest) -> Result<Vec<u8>, TransportError> {
            let reply = self.inner.send(request).await?;
            if !self.used.swap(true, Ordering::SeqCst) {
                return Ok(vec![0xff; 3]);
            }
            Ok(reply)
        }
    }

    /// First request hangs for an hour
    struct SlowFirstRequest {
        inner: Arc<LoopbackTransport>,
        used: AtomicBool,
    }

    #[async_trait]
    impl Transport for SlowFirstRequest {
        async fn send(&self, request: SyncRequest) -> Result<Vec<u8>, TransportError> {
            if !self.used.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.inner.send(request).await
        }
    }

    struct Network {
        transport: Arc<LoopbackTransport>,
        drivers: Vec<SyncDriver>,
    }

    impl Network {
        fn new(ids: &[&str]) -> Self {
            let transport = Arc::new(LoopbackTransport::new());
            let drivers = ids
                .iter()
                .map(|id| {
                    let engine = Arc::new(SyncEngine::new(*id).unwrap());
                    transport.attach(engine.clone()).unwrap();
                    SyncDriver::new(engine, transport.clone()).with_retry(RetryPolicy {
                        max_attempts: 4,
                        initial_backoff: Duration::from_millis(50),
                        max_backoff: Duration::from_secs(1),
                        jitter: false,
                    })
                })
                .collect();
            Network { transport, drivers }
        }

        fn engine(&self, i: usize) -> &Arc<SyncEngine> {
            self.drivers[i].engine()
        }

        fn get(&self, i: usize, key: &str) -> Option<Vec<u8>> {
            self.engine(i).get(key).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_edits_converge_on_reconnect() {
        let net = Network::new(&["laptop", "phone"]);

        net.engine(0).set("title", "Draft").unwrap();
        net.engine(0).set("body", "first paragraph").unwrap();
        net.engine(1).set("title", "Final").unwrap();
        net.engine(1).set("tags", "work").unwrap();

        let summary = net.drivers[0].sync_peer("phone").await.unwrap();
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.received, 2);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.new_devices, vec!["phone".to_string()]);

        for i in 0..2 {
            assert_eq!(net.get(i, "title"), Some(b"Final".to_vec()));
            assert_eq!(net.get(i, "body"), Some(b"first paragraph".to_vec()));
            assert_eq!(net.get(i, "tags"), Some(b"work".to_vec()));
        }
        assert_eq!(net.engine(0).clock().unwrap(), net.engine(1).clock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_reply_is_retried() {
        let net = Network::new(&["A", "B"]);
        net.engine(1).set("k", "from-b").unwrap();
        net.transport.drop_next_responses(2);

        let summary = net.drivers[0].sync_peer("B").await.unwrap();
        assert_eq!(summary.attempts, 3);
        assert_eq!(net.get(0, "k"), Some(b"from-b".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupted_reply_is_resent() {
        let net = Network::new(&["A", "B"]);
        net.engine(1).set("from_b", "1").unwrap();
        let corrupting = Arc::new(CorruptFirstReply { inner: net.transport.clone(), used: AtomicBool::new(false) });
        let driver = SyncDriver::new(net.engine(0).clone(), corrupting);

        let err = driver.sync_peer("B").await.unwrap_err();
        assert!(err.is_decode_error());
        assert_eq!(net.get(0, "from_b"), None);

        // B rebuilds its reply from what A reports, not from what it handed out
        let summary = driver.sync_peer("B").await.unwrap();
        assert_eq!(summary.received, 1);
        assert_eq!(net.get(0, "from_b"), Some(b"1".to_vec()));
        assert_eq!(net.engine(0).clock().unwrap(), net.engine(1).clock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_exchange_does_not_block_peer() {
        let net = Network::new(&["A", "B"]);
        net.engine(0).set("k", "v").unwrap();
        let slow = Arc::new(SlowFirstRequest { inner: net.transport.clone(), used: AtomicBool::new(false) });
        let driver = SyncDriver::new(net.engine(0).clone(), slow);

        let timed_out = tokio::time::timeout(Duration::from_secs(5), driver.sync_peer("B")).await;
        assert!(timed_out.is_err());
        assert_eq!(net.get(1, "k"), None);

        let summary = driver.sync_peer("B").await.unwrap();
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(net.get(1, "k"), Some(b"v".to_vec()));

        // The regular transport sees no leftover exchange either
        net.drivers[0].sync_peer("B").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let net = Network::new(&["A", "B"]);
        net.engine(0).set("k", "v").unwrap();
        net.transport.drop_next_requests(10);

        let err = net.drivers[0].sync_peer("B").await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(net.get(1, "k"), None);

        // Nothing was committed as sent, so the next attempt carries the entry
        net.transport.drop_next_requests(0);
        let summary = net.drivers[0].sync_peer("B").await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(net.get(1, "k"), Some(b"v".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_peer_fails_without_retry() {
        let net = Network::new(&["A"]);
        let started = tokio::time::Instant::now();
        let err = net.drivers[0].sync_peer("ghost").await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_and_reaping() {
        let net = Network::new(&["A", "B", "C"]);
        net.engine(0).set("doc", "v1").unwrap();
        net.drivers[0].sync_peer("B").await.unwrap();
        net.drivers[1].sync_peer("C").await.unwrap();
        assert_eq!(net.get(2, "doc"), Some(b"v1".to_vec()));

        net.engine(2).delete("doc").unwrap();
        net.drivers[2].sync_peer("B").await.unwrap();
        net.drivers[1].sync_peer("A").await.unwrap();
        for i in 0..3 {
            assert_eq!(net.get(i, "doc"), None);
        }

        // A never talked to C, so it keeps the tombstone
        assert_eq!(net.engine(0).reap_tombstones().unwrap(), 0);
        net.drivers[0].sync_peer("C").await.unwrap();
        assert_eq!(net.engine(0).reap_tombstones().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.replica");
        let transport = Arc::new(LoopbackTransport::new());

        let a = Arc::new(SyncEngine::new("A").unwrap());
        let b = Arc::new(SyncEngine::new("B").unwrap());
        transport.attach(a.clone()).unwrap();
        transport.attach(b.clone()).unwrap();

        a.set("k1", "v1").unwrap();
        SyncDriver::new(a.clone(), transport.clone()).sync_peer("B").await.unwrap();
        write_atomic(&path, &a.save_state().unwrap()).unwrap();
        transport.detach("A").unwrap();
        drop(a);

        let a = Arc::new(SyncEngine::restore("A", &read_file(&path).unwrap()).unwrap());
        transport.attach(a.clone()).unwrap();
        a.set("k2", "v2").unwrap();

        let summary = SyncDriver::new(a.clone(), transport.clone()).sync_peer("B").await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(b.get("k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(a.clock().unwrap(), b.clock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop() {
        let net = Network::new(&["A", "B"]);
        let (tx, rx) = watch::channel(false);

        let Network { transport: _t, mut drivers } = net;
        let b = drivers.pop().unwrap();
        let a = drivers.pop().unwrap().with_reaping(true);
        let a_engine = a.engine().clone();
        let b_engine = b.engine().clone();

        let handle = tokio::spawn(async move {
            a.run(vec!["B".to_string()], Duration::from_secs(30), rx).await
        });

        b_engine.set("k", "v").unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(a_engine.get("k").unwrap(), Some(b"v".to_vec()));

        tx.send(true).unwrap();
        let rounds = handle.await.unwrap();
        assert_eq!(rounds, 2);
    }
}
