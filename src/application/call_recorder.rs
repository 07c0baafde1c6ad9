//! Call Recorder
//!
//! Times one call and forwards its latency and outcome to the sink.

use crate::application::method_registry::{Registration, RegistrationHandle};
use crate::domain::ports::MetricsSink;
use crate::domain::value_objects::CallOutcome;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// In-flight accounting of a single call.
///
/// Created before the method's registration is awaited and finished with
/// the transport's result. If the caller drops the call future at any point
/// before that, the drop records one failure and no latency.
pub struct CallRecorder {
    sink: Arc<dyn MetricsSink>,
    registration: RegistrationHandle,
    started: Instant,
    finished: bool,
}

impl CallRecorder {
    pub fn new(sink: Arc<dyn MetricsSink>, registration: RegistrationHandle) -> Self {
        Self {
            sink,
            registration,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Wait for the method's registration, then start the clock so only the
    /// transport call is timed.
    pub async fn ready(&mut self) {
        self.registration.wait().await;
        self.started = Instant::now();
    }

    /// Classify `result`, emit the samples, and return the measured latency.
    ///
    /// The result itself is only inspected, never altered.
    pub fn finish<T, E>(mut self, result: &Result<T, E>) -> Duration {
        self.finished = true;
        let elapsed = self.started.elapsed();
        self.record(CallOutcome::of(result), Some(elapsed));
        elapsed
    }

    /// Emit now if the registration is known, otherwise once it lands.
    fn record(&self, outcome: CallOutcome, elapsed: Option<Duration>) {
        if let Some(registration) = self.registration.get() {
            emit(self.sink.as_ref(), &registration, outcome, elapsed);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let sink = self.sink.clone();
                let handle = self.registration.clone();
                runtime.spawn(async move {
                    let registration = handle.wait().await;
                    emit(sink.as_ref(), &registration, outcome, elapsed);
                });
            }
            Err(_) => tracing::debug!(
                "no runtime to account {} call, sample skipped",
                self.registration.graphs().method()
            ),
        }
    }
}

impl Drop for CallRecorder {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                "{} call abandoned before completion",
                self.registration.graphs().method()
            );
            self.record(CallOutcome::Fail, None);
        }
    }
}

fn emit(
    sink: &dyn MetricsSink,
    registration: &Registration,
    outcome: CallOutcome,
    elapsed: Option<Duration>,
) {
    let graphs = registration.graphs();

    if !registration.is_registered() {
        tracing::trace!(
            "skipping samples for unregistered method {}",
            graphs.method()
        );
        return;
    }

    if let Some(elapsed) = elapsed {
        sink.notify(graphs.latency_title(), micros(elapsed));
    }
    sink.notify(graphs.counter_title(outcome), 1);

    tracing::trace!(
        "{} {} finished: {:?} in {:?}",
        graphs.kind().as_str(),
        graphs.method(),
        outcome,
        elapsed
    );
}

/// Whole microseconds in `d`, saturating at `i64::MAX`.
pub fn micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}
