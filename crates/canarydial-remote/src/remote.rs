//! The remotely refreshed rollout source.
//!
//! `RemoteRollout` owns a background task that perpetually re-fetches the
//! canary rollout fraction and publishes it for readers. The task is
//! cancellable: [`RemoteRollout::shutdown`] stops it deterministically, and
//! dropping the handle closes the shutdown channel so the loop exits at
//! its next scheduling point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use canarydial_core::RolloutSource;
use canarydial_store::{PointLookup, RecordStore};

use crate::config::{parse_duration, RemoteRolloutConfig};
use crate::fetch::{canary_lookup, fetch_rollout, FetchError};
use crate::health::RefreshState;

/// Observability hook invoked once per refresh attempt.
///
/// Implementations must return quickly and must not panic; the refresh
/// loop calls them inline.
pub trait RefreshMonitor: Send + Sync {
    /// Record the outcome of one refresh attempt.
    ///
    /// `error` is `None` on success.
    fn record_refresh(&self, error: Option<&FetchError>);
}

/// Monitor that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl RefreshMonitor for NoopMonitor {
    fn record_refresh(&self, _error: Option<&FetchError>) {}
}

/// Errors that prevent a `RemoteRollout` from being constructed.
///
/// All of them fail the build before any background work starts.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("record store handle is required")]
    MissingStore,

    #[error("table name is empty")]
    EmptyTable,

    #[error("application identifier is empty")]
    EmptyApplication,

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
}

/// A rollout source continuously refreshed from a record store.
///
/// The published value starts at 0.0 and is updated only by the background
/// task; [`RolloutSource::get`] never blocks on network activity. When
/// fetches keep failing past the configured unhealthy threshold, the
/// published value is retracted to 0.0 until the next successful fetch.
pub struct RemoteRollout {
    value: Arc<RwLock<f64>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteRollout {
    /// Start building a remote rollout.
    pub fn builder() -> RemoteRolloutBuilder {
        RemoteRolloutBuilder::new()
    }

    /// Signal the refresh loop to stop and wait for it to exit.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.lock_task().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(error = %error, "refresh task did not exit cleanly");
            }
            debug!("remote rollout shut down");
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RolloutSource for RemoteRollout {
    fn get(&self) -> f64 {
        *self.value.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`RemoteRollout`].
///
/// The store, table, and application identifier are required. The monitor
/// defaults to [`NoopMonitor`]; the poll interval and unhealthy threshold
/// default to 5s and 60s.
pub struct RemoteRolloutBuilder {
    store: Option<Arc<dyn RecordStore>>,
    monitor: Arc<dyn RefreshMonitor>,
    table: String,
    application: String,
    poll_interval: Duration,
    unhealthy_after: Duration,
}

impl RemoteRolloutBuilder {
    fn new() -> Self {
        Self {
            store: None,
            monitor: Arc::new(NoopMonitor),
            table: String::new(),
            application: String::new(),
            poll_interval: Duration::from_secs(5),
            unhealthy_after: Duration::from_secs(60),
        }
    }

    /// Record store to fetch rollout records from. Required.
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Monitoring hook invoked once per refresh attempt.
    pub fn monitor(mut self, monitor: Arc<dyn RefreshMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Table holding canary rollout records. Required.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Application identifier used as the partition key value. Required.
    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    /// Delay between refresh attempts.
    ///
    /// Fetch time is not subtracted; the effective period is roughly fetch
    /// latency plus this interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long fetches may keep failing before the rollout drops to 0.0.
    pub fn unhealthy_after(mut self, threshold: Duration) -> Self {
        self.unhealthy_after = threshold;
        self
    }

    /// Apply table, application, and durations from a config.
    pub fn config(mut self, config: &RemoteRolloutConfig) -> Result<Self, BuildError> {
        self.table = config.table.clone();
        self.application = config.application.clone();
        self.poll_interval = parse_duration(&config.poll_interval)
            .ok_or_else(|| BuildError::InvalidDuration(config.poll_interval.clone()))?;
        self.unhealthy_after = parse_duration(&config.unhealthy_after)
            .ok_or_else(|| BuildError::InvalidDuration(config.unhealthy_after.clone()))?;
        Ok(self)
    }

    /// Validate the configuration and launch the refresh task.
    ///
    /// Never blocks waiting for the first fetch; the returned handle
    /// publishes 0.0 until the first successful refresh.
    pub fn spawn(self) -> Result<RemoteRollout, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        if self.table.is_empty() {
            return Err(BuildError::EmptyTable);
        }
        if self.application.is_empty() {
            return Err(BuildError::EmptyApplication);
        }

        let value = Arc::new(RwLock::new(0.0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lookup = canary_lookup(&self.table, &self.application);

        debug!(
            table = %self.table,
            application = %self.application,
            poll_interval = ?self.poll_interval,
            unhealthy_after = ?self.unhealthy_after,
            "remote rollout starting"
        );

        let task = tokio::spawn(run_refresh_loop(
            store,
            self.monitor,
            lookup,
            self.poll_interval,
            RefreshState::new(self.unhealthy_after),
            Arc::clone(&value),
            shutdown_rx,
        ));

        Ok(RemoteRollout {
            value,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }
}

/// The perpetual fetch, report, publish, sleep loop.
async fn run_refresh_loop(
    store: Arc<dyn RecordStore>,
    monitor: Arc<dyn RefreshMonitor>,
    lookup: PointLookup,
    poll_interval: Duration,
    mut state: RefreshState,
    value: Arc<RwLock<f64>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let outcome = fetch_rollout(store.as_ref(), &lookup).await;
        monitor.record_refresh(outcome.as_ref().err());
        match &outcome {
            Ok(fraction) => debug!(value = *fraction, "rollout refreshed"),
            Err(error) => warn!(error = %error, "rollout refresh failed"),
        }

        if let Some(next) = state.record(&outcome) {
            // Critical section limited to the single assignment.
            *value.write().unwrap_or_else(PoisonError::into_inner) = next;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => {
                debug!("refresh loop stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::sleep;

    use canarydial_store::{
        FieldValue, MemoryStore, Record, StoreError, StoreResult,
    };

    const TABLE: &str = "rollouts";
    const APP: &str = "api";

    #[derive(Default)]
    struct CountingMonitor {
        refreshes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl RefreshMonitor for CountingMonitor {
        fn record_refresh(&self, error: Option<&FetchError>) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if error.is_some() {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Store that replays a scripted sequence of lookup outcomes.
    struct ScriptedStore {
        outcomes: Mutex<VecDeque<StoreResult<Option<Record>>>>,
    }

    impl ScriptedStore {
        fn new(outcomes: Vec<StoreResult<Option<Record>>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    #[async_trait]
    impl RecordStore for ScriptedStore {
        async fn get_record(&self, _lookup: &PointLookup) -> StoreResult<Option<Record>> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(StoreError::Unavailable("script exhausted".into())))
        }
    }

    fn rollout_record(value: &str) -> Record {
        Record::new().with_field("rollout", FieldValue::Number(value.into()))
    }

    fn seeded_store(value: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.put_record(TABLE, APP, "canary", rollout_record(value));
        store
    }

    fn builder_with(store: Arc<dyn RecordStore>) -> RemoteRolloutBuilder {
        RemoteRollout::builder()
            .store(store)
            .table(TABLE)
            .application(APP)
            .poll_interval(Duration::from_millis(100))
            .unhealthy_after(Duration::from_millis(350))
    }

    #[tokio::test(start_paused = true)]
    async fn missing_store_fails_before_spawning() {
        let monitor = Arc::new(CountingMonitor::default());
        let result = RemoteRollout::builder()
            .table(TABLE)
            .application(APP)
            .monitor(monitor.clone())
            .spawn();
        assert!(matches!(result, Err(BuildError::MissingStore)));

        // No background activity was started.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_identifiers_fail_the_build() {
        let store = seeded_store("0.5");

        let result = RemoteRollout::builder()
            .store(store.clone())
            .application(APP)
            .spawn();
        assert!(matches!(result, Err(BuildError::EmptyTable)));

        let result = RemoteRollout::builder()
            .store(store)
            .table(TABLE)
            .spawn();
        assert!(matches!(result, Err(BuildError::EmptyApplication)));
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_config_duration_fails_the_build() {
        let config = RemoteRolloutConfig {
            table: TABLE.to_string(),
            application: APP.to_string(),
            poll_interval: "soon".to_string(),
            unhealthy_after: "60s".to_string(),
        };
        let result = RemoteRollout::builder().config(&config);
        match result {
            Err(BuildError::InvalidDuration(raw)) => assert_eq!(raw, "soon"),
            other => panic!("expected InvalidDuration, got {:?}", other.err()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_from_config_publishes_fetched_value() {
        let config = RemoteRolloutConfig {
            table: TABLE.to_string(),
            application: APP.to_string(),
            poll_interval: "100ms".to_string(),
            unhealthy_after: "30s".to_string(),
        };
        let rollout = RemoteRollout::builder()
            .store(seeded_store("0.35"))
            .config(&config)
            .unwrap()
            .spawn()
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(rollout.get(), 0.35);
        rollout.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn published_value_starts_at_zero() {
        // A store that never answers: the first fetch hangs forever.
        struct StalledStore;

        #[async_trait]
        impl RecordStore for StalledStore {
            async fn get_record(&self, _lookup: &PointLookup) -> StoreResult<Option<Record>> {
                std::future::pending().await
            }
        }

        let rollout = builder_with(Arc::new(StalledStore)).spawn().unwrap();
        sleep(Duration::from_secs(10)).await;
        // Readers are unaffected by the hung fetch.
        assert_eq!(rollout.get(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_fetch_updates_published_value() {
        let store = seeded_store("0.35");
        let rollout = builder_with(store.clone()).spawn().unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(rollout.get(), 0.35);

        // The next poll picks up a changed record.
        store.put_record(TABLE, APP, "canary", rollout_record("0.5"));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(rollout.get(), 0.5);

        rollout.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_inside_window_keep_published_value() {
        let store = seeded_store("0.35");
        let rollout = builder_with(store.clone())
            .unhealthy_after(Duration::from_secs(10))
            .spawn()
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(rollout.get(), 0.35);

        // Corrupt the record: out-of-range values are fetch failures.
        store.put_record(TABLE, APP, "canary", rollout_record("1.5"));
        sleep(Duration::from_millis(300)).await;
        assert_eq!(rollout.get(), 0.35);

        rollout.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_failures_retract_to_zero_until_recovery() {
        let store = seeded_store("0.5");
        let monitor = Arc::new(CountingMonitor::default());
        let rollout = builder_with(store.clone())
            .unhealthy_after(Duration::from_millis(250))
            .monitor(monitor.clone())
            .spawn()
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(rollout.get(), 0.5);
        store.remove_record(TABLE, APP, "canary");

        // Failures at 100ms and 200ms are inside the 250ms window.
        sleep(Duration::from_millis(210)).await;
        assert_eq!(rollout.get(), 0.5);

        // The failure at 300ms exceeds the window: actively retracted.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(rollout.get(), 0.0);

        // One success recovers immediately, whatever the streak length.
        store.put_record(TABLE, APP, "canary", rollout_record("0.62"));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(rollout.get(), 0.62);
        assert!(monitor.failures.load(Ordering::SeqCst) >= 3);

        rollout.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_timeline_recovers_on_late_success() {
        // Outcomes at t = 0, 100, 200, 300, 400ms.
        let store = Arc::new(ScriptedStore::new(vec![
            Err(StoreError::Unavailable("connection refused".into())),
            Err(StoreError::Unavailable("connection refused".into())),
            Err(StoreError::Unavailable("connection refused".into())),
            Err(StoreError::Unavailable("connection refused".into())),
            Ok(Some(rollout_record("0.2"))),
        ]));
        let monitor = Arc::new(CountingMonitor::default());
        let rollout = builder_with(store)
            .monitor(monitor.clone())
            .spawn()
            .unwrap();

        sleep(Duration::from_millis(350)).await;
        assert_eq!(rollout.get(), 0.0);
        assert_eq!(monitor.failures.load(Ordering::SeqCst), 4);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(rollout.get(), 0.2);
        assert_eq!(monitor.refreshes.load(Ordering::SeqCst), 5);

        rollout.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_sees_every_iteration() {
        let monitor = Arc::new(CountingMonitor::default());
        let rollout = builder_with(seeded_store("0.35"))
            .monitor(monitor.clone())
            .spawn()
            .unwrap();

        // Iterations at 0, 100, and 200ms.
        sleep(Duration::from_millis(250)).await;
        assert_eq!(monitor.refreshes.load(Ordering::SeqCst), 3);
        assert_eq!(monitor.failures.load(Ordering::SeqCst), 0);

        rollout.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let monitor = Arc::new(CountingMonitor::default());
        let rollout = builder_with(seeded_store("0.35"))
            .monitor(monitor.clone())
            .spawn()
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        rollout.shutdown().await;
        let after_shutdown = monitor.refreshes.load(Ordering::SeqCst);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.refreshes.load(Ordering::SeqCst), after_shutdown);

        // The last published value remains readable.
        assert_eq!(rollout.get(), 0.35);
        // Idempotent.
        rollout.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_loop() {
        let monitor = Arc::new(CountingMonitor::default());
        let rollout = builder_with(seeded_store("0.35"))
            .monitor(monitor.clone())
            .spawn()
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        drop(rollout);

        sleep(Duration::from_millis(10)).await;
        let after_drop = monitor.refreshes.load(Ordering::SeqCst);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.refreshes.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test(start_paused = true)]
    async fn readers_observe_whole_values_across_threads() {
        let rollout = builder_with(seeded_store("0.35")).spawn().unwrap();
        sleep(Duration::from_millis(10)).await;

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        let value = rollout.get();
                        assert!(value == 0.0 || value == 0.35, "torn value: {value}");
                    }
                });
            }
        });

        rollout.shutdown().await;
    }

    #[test]
    fn handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RemoteRollout>();
    }
}
