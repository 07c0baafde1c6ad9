//! Method Registry
//!
//! Lazily builds the metric catalog for each method the first time it is
//! called and registers it with the sink exactly once.

use crate::domain::entities::{MethodGraphs, MetricGroup};
use crate::domain::ports::{MetricsSink, SinkError};
use crate::domain::value_objects::{CallKind, Target};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Result of registering one method's graphs with the sink.
///
/// A failed registration is still cached so the call path never stalls on
/// it; samples for such a method are simply not emitted.
#[derive(Debug)]
pub struct Registration {
    graphs: Arc<MethodGraphs>,
    error: Option<SinkError>,
}

impl Registration {
    pub fn graphs(&self) -> &MethodGraphs {
        &self.graphs
    }

    /// Whether the sink accepted the group.
    pub fn is_registered(&self) -> bool {
        self.error.is_none()
    }

    /// The sink's error, if registration failed.
    pub fn error(&self) -> Option<&SinkError> {
        self.error.as_ref()
    }
}

/// Shared view of one method's registration, finished or still in flight.
///
/// The registration itself runs on its own task, so dropping a handle (or
/// the call waiting on it) never cancels it.
#[derive(Debug, Clone)]
pub struct RegistrationHandle {
    graphs: Arc<MethodGraphs>,
    rx: watch::Receiver<Option<Arc<Registration>>>,
}

impl RegistrationHandle {
    pub fn graphs(&self) -> &MethodGraphs {
        &self.graphs
    }

    /// The registration, if it has completed.
    pub fn get(&self) -> Option<Arc<Registration>> {
        self.rx.borrow().clone()
    }

    /// Wait for the registration to complete.
    pub async fn wait(&self) -> Arc<Registration> {
        let mut rx = self.rx.clone();
        if let Ok(current) = rx.wait_for(Option::is_some).await {
            if let Some(registration) = current.as_ref() {
                return registration.clone();
            }
        }

        // The registering task went away without publishing, e.g. at
        // runtime shutdown. Treat it as a refusal.
        Arc::new(Registration {
            graphs: self.graphs.clone(),
            error: Some(SinkError::Unavailable(
                "registration task ended".to_string(),
            )),
        })
    }
}

/// Counts of cached registrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Methods the sink accepted
    pub registered: usize,
    /// Methods whose registration the sink refused
    pub failed: usize,
}

/// Concurrency-safe cache of method name -> registration.
///
/// Each call path has its own table so unary and streaming series for the
/// same method never share an entry. The first caller for a key starts the
/// registration on a spawned task; every caller for that key waits on the
/// same handle, callers for other keys are never blocked by it.
pub struct MethodRegistry {
    target: Target,
    sink: Arc<dyn MetricsSink>,
    unary: DashMap<String, RegistrationHandle>,
    stream: DashMap<String, RegistrationHandle>,
    failed: Arc<AtomicUsize>,
}

impl MethodRegistry {
    pub fn new(target: Target, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            target,
            sink,
            unary: DashMap::new(),
            stream: DashMap::new(),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn table(&self, kind: CallKind) -> &DashMap<String, RegistrationHandle> {
        match kind {
            CallKind::Unary => &self.unary,
            CallKind::Stream => &self.stream,
        }
    }

    /// Handle for `method`, starting its registration on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle(&self, kind: CallKind, method: &str) -> RegistrationHandle {
        let table = self.table(kind);

        if let Some(handle) = table.get(method) {
            return handle.value().clone();
        }

        table
            .entry(method.to_string())
            .or_insert_with(|| self.spawn_registration(kind, method))
            .value()
            .clone()
    }

    /// Return the registration for `method`, creating it on first use.
    pub async fn ensure_registered(&self, kind: CallKind, method: &str) -> Arc<Registration> {
        self.handle(kind, method).wait().await
    }

    fn spawn_registration(&self, kind: CallKind, method: &str) -> RegistrationHandle {
        let graphs = Arc::new(MethodGraphs::new(kind, method));
        let (tx, rx) = watch::channel(None);

        let sink = self.sink.clone();
        let target = self.target.clone();
        let failed = self.failed.clone();
        let task_graphs = graphs.clone();
        tokio::spawn(async move {
            let registration = register(sink.as_ref(), &target, task_graphs, &failed).await;
            tx.send_replace(Some(Arc::new(registration)));
        });

        RegistrationHandle { graphs, rx }
    }

    /// Whether `method` has a completed registration on this call path.
    pub fn is_registered(&self, kind: CallKind, method: &str) -> bool {
        self.table(kind)
            .get(method)
            .and_then(|handle| handle.get())
            .map(|r| r.is_registered())
            .unwrap_or(false)
    }

    /// Number of methods with a completed registration attempt, both paths.
    pub fn len(&self) -> usize {
        self.completed(&self.unary) + self.completed(&self.stream)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let failed = self.failed.load(Ordering::Relaxed);
        RegistryStats {
            registered: self.len().saturating_sub(failed),
            failed,
        }
    }

    fn completed(&self, table: &DashMap<String, RegistrationHandle>) -> usize {
        table.iter().filter(|e| e.value().get().is_some()).count()
    }
}

async fn register(
    sink: &dyn MetricsSink,
    target: &Target,
    graphs: Arc<MethodGraphs>,
    failed: &AtomicUsize,
) -> Registration {
    let kind = graphs.kind();
    let method = graphs.method();
    let groups = [MetricGroup::for_method(target, &graphs)];

    let error = match sink.setup(&groups).await {
        Ok(()) => {
            tracing::debug!(
                "registered {} metrics for {} on {}",
                kind.as_str(),
                method,
                target
            );
            None
        }
        Err(e) => {
            failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "metric registration failed for {} {} on {}: {}",
                kind.as_str(),
                method,
                target,
                e
            );
            Some(e)
        }
    };

    Registration { graphs, error }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;

    // ===== Mock Implementations =====

    struct MockSink {
        setups: Mutex<Vec<MetricGroup>>,
        delay: Duration,
        fail: bool,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                setups: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                fail: false,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn setup_count(&self) -> usize {
            self.setups.lock().len()
        }
    }

    #[async_trait]
    impl MetricsSink for MockSink {
        async fn setup(&self, groups: &[MetricGroup]) -> Result<(), SinkError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.setups.lock().extend_from_slice(groups);
            if self.fail {
                return Err(SinkError::Unavailable("executor gone".to_string()));
            }
            Ok(())
        }

        fn notify(&self, _title: &str, _value: i64) {}
    }

    fn registry(sink: Arc<MockSink>) -> MethodRegistry {
        MethodRegistry::new(Target::new("localhost:10000"), sink)
    }

    // ===== Registration Tests =====

    #[tokio::test]
    async fn test_first_call_registers_group() {
        let sink = Arc::new(MockSink::new());
        let registry = registry(sink.clone());

        let reg = registry.ensure_registered(CallKind::Unary, "Get").await;

        assert!(reg.is_registered());
        assert_eq!(reg.graphs().method(), "Get");
        assert_eq!(sink.setup_count(), 1);
        assert_eq!(sink.setups.lock()[0].name, "gRPC (localhost:10000)");
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let sink = Arc::new(MockSink::new());
        let registry = registry(sink.clone());

        let first = registry.ensure_registered(CallKind::Unary, "Get").await;
        let second = registry.ensure_registered(CallKind::Unary, "Get").await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sink.setup_count(), 1);
    }

    #[tokio::test]
    async fn test_unary_and_stream_registered_separately() {
        let sink = Arc::new(MockSink::new());
        let registry = registry(sink.clone());

        registry.ensure_registered(CallKind::Unary, "Chat").await;
        registry.ensure_registered(CallKind::Stream, "Chat").await;

        assert_eq!(sink.setup_count(), 2);
        let names: Vec<String> = sink.setups.lock().iter().map(|g| g.name.clone()).collect();
        assert!(names.contains(&"gRPC (localhost:10000)".to_string()));
        assert!(names.contains(&"gRPC stream (localhost:10000)".to_string()));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_register_once() {
        let sink = Arc::new(MockSink::slow(Duration::from_millis(20)));
        let registry = Arc::new(registry(sink.clone()));

        let calls = (0..50).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.ensure_registered(CallKind::Unary, "Get").await })
        });
        let results = futures::future::join_all(calls).await;

        let first = results[0].as_ref().unwrap().clone();
        for r in &results {
            assert!(Arc::ptr_eq(&first, r.as_ref().unwrap()));
        }
        assert_eq!(sink.setup_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_first_caller_does_not_restart_setup() {
        let sink = Arc::new(MockSink::slow(Duration::from_millis(100)));
        let registry = registry(sink.clone());

        let first = tokio::time::timeout(
            Duration::from_millis(10),
            registry.ensure_registered(CallKind::Unary, "Get"),
        )
        .await;
        assert!(first.is_err());

        let reg = registry.ensure_registered(CallKind::Unary, "Get").await;
        assert!(reg.is_registered());
        assert_eq!(sink.setup_count(), 1);
    }

    #[tokio::test]
    async fn test_handle_reports_pending_then_complete() {
        let sink = Arc::new(MockSink::slow(Duration::from_millis(20)));
        let registry = registry(sink.clone());

        let handle = registry.handle(CallKind::Stream, "List");
        assert!(handle.get().is_none());
        assert!(registry.is_empty());
        assert_eq!(handle.graphs().method(), "List");

        let reg = handle.wait().await;
        assert!(handle.get().is_some());
        assert!(reg.is_registered());
        assert!(registry.is_registered(CallKind::Stream, "List"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_registration_does_not_block_other_methods() {
        let sink = Arc::new(MockSink::slow(Duration::from_millis(200)));
        let registry = Arc::new(registry(sink.clone()));

        // Warm "Fast" first so its lookup is a pure cache hit.
        registry.ensure_registered(CallKind::Unary, "Fast").await;

        let slow = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.ensure_registered(CallKind::Unary, "Slow").await })
        };
        tokio::task::yield_now().await;

        let hit = tokio::time::timeout(
            Duration::from_millis(50),
            registry.ensure_registered(CallKind::Unary, "Fast"),
        )
        .await;
        assert!(hit.is_ok());

        slow.await.unwrap();
        assert_eq!(sink.setup_count(), 2);
    }

    // ===== Failure Tests =====

    #[tokio::test]
    #[traced_test]
    async fn test_failed_registration_is_cached_and_logged() {
        let sink = Arc::new(MockSink::failing());
        let registry = registry(sink.clone());

        let reg = registry.ensure_registered(CallKind::Unary, "Get").await;
        assert!(!reg.is_registered());
        assert_eq!(
            reg.error(),
            Some(&SinkError::Unavailable("executor gone".to_string()))
        );

        // Never retried
        let again = registry.ensure_registered(CallKind::Unary, "Get").await;
        assert!(!again.is_registered());
        assert_eq!(sink.setup_count(), 1);

        assert!(logs_contain("metric registration failed for unary Get"));
    }

    #[tokio::test]
    async fn test_stats() {
        let rejecting = registry(Arc::new(MockSink::failing()));
        rejecting.ensure_registered(CallKind::Unary, "A").await;
        rejecting.ensure_registered(CallKind::Stream, "B").await;

        assert_eq!(
            rejecting.stats(),
            RegistryStats {
                registered: 0,
                failed: 2
            }
        );

        let accepting = registry(Arc::new(MockSink::new()));
        assert!(accepting.is_empty());
        accepting.ensure_registered(CallKind::Unary, "A").await;
        assert_eq!(
            accepting.stats(),
            RegistryStats {
                registered: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_is_registered() {
        let registry = registry(Arc::new(MockSink::new()));

        assert!(!registry.is_registered(CallKind::Unary, "Get"));
        registry.ensure_registered(CallKind::Unary, "Get").await;
        assert!(registry.is_registered(CallKind::Unary, "Get"));
        assert!(!registry.is_registered(CallKind::Stream, "Get"));
    }
}
