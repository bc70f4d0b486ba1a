//! Upload coordination: FIFO queue, bounded-concurrency admission and
//! batch lifecycle.
//!
//! Submissions enter a FIFO queue and are admitted into the active set
//! whenever a slot under the concurrency limit is free. Every completion
//! re-pumps the queue, so the active set stays full until the queue
//! drains. A batch opens on the first submission into an idle pipeline
//! and closes exactly once, when both the queue and the active set are
//! empty.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skylift_transfer::{
    AggregateSnapshot, ProgressAggregator, UploadItem, retry_delays, validate_destination,
};

use crate::endpoint::StorageEndpoint;
use crate::error::UploadError;
use crate::strategy::{build_strategy, select_strategy};
use crate::types::{ProgressSink, ProgressUpdate, UploadEvent, UploadRequest, UploaderConfig};

/// Entry point for the upload pipeline.
///
/// Submissions are non-blocking; transfers run on spawned tasks and
/// report back through [`UploadEvent`]s. Must be created inside a Tokio
/// runtime.
pub struct UploadCoordinator {
    inner: Arc<CoordinatorInner>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
}

struct CoordinatorInner {
    endpoint: Arc<dyn StorageEndpoint>,
    config: UploaderConfig,
    /// Shared backoff schedule, precomputed once from the config.
    delays: Arc<[Duration]>,
    aggregator: Arc<ProgressAggregator>,
    state: Mutex<CoordinatorState>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
}

#[derive(Default)]
struct CoordinatorState {
    next_id: u64,
    queue: VecDeque<UploadItem>,
    active: HashMap<u64, ActiveTransfer>,
    completed: usize,
    failed: usize,
    first_error: Option<String>,
    batch_open: bool,
}

struct ActiveTransfer {
    path: String,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    pub fn new(endpoint: Arc<dyn StorageEndpoint>, config: UploaderConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let aggregator = Arc::new(ProgressAggregator::new());
        let delays: Arc<[Duration]> = retry_delays(
            config.retry_count,
            config.retry_base_delay,
            config.retry_max_delay,
        )
        .into();

        // Strategies report bytes over a channel so they never touch the
        // aggregator lock from transfer tasks directly.
        let sink = aggregator.clone();
        tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                sink.record(update.id, update.bytes);
            }
        });

        Self {
            inner: Arc::new(CoordinatorInner {
                endpoint,
                config,
                delays,
                aggregator,
                state: Mutex::new(CoordinatorState::default()),
                events_tx,
                progress_tx,
            }),
            events_rx: Some(events_rx),
        }
    }

    /// Queues an upload and returns its assigned id.
    ///
    /// Validates the destination synchronously; a rejected path never
    /// enters the queue. Opens a new batch if the pipeline was idle.
    pub fn submit(&self, request: UploadRequest) -> Result<u64, UploadError> {
        validate_destination(&request.path)?;

        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        inner.aggregator.register(id, request.source.len());

        if !state.batch_open {
            state.batch_open = true;
            inner.aggregator.start(inner.config.sample_interval);
            let _ = inner.events_tx.send(UploadEvent::BatchStarted);
            info!("upload batch started");
        }

        let item = UploadItem {
            id,
            path: request.path,
            source: request.source,
            overwrite: request.overwrite,
        };
        debug!(id, path = %item.path, "upload queued");
        state.queue.push_back(item);
        inner.pump(&mut state);
        Ok(id)
    }

    /// Cancels every queued and active transfer and resets the pipeline.
    ///
    /// Active strategies observe their cancellation token at the next
    /// chunk boundary and clean up server state best-effort. No batch
    /// completion event is emitted; the host initiated the teardown and
    /// already knows.
    pub fn abort_all(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        if !state.batch_open {
            return;
        }
        for transfer in state.active.values() {
            transfer.cancel.cancel();
        }
        let aborted = state.queue.len() + state.active.len();
        *state = CoordinatorState {
            next_id: state.next_id,
            ..Default::default()
        };
        // Still under the state lock, so a racing submit cannot open a
        // new batch between the reset and this teardown. Lock order
        // state -> aggregator matches submit.
        inner.aggregator.stop();
        inner.aggregator.reset();
        drop(state);
        info!(aborted, "upload batch aborted");
    }

    /// Current aggregate progress over the batch.
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.inner.aggregator.snapshot()
    }

    /// Items queued or actively transferring.
    pub fn pending_count(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.queue.len() + state.active.len()
    }

    /// First error of the running batch, if any item has failed so far.
    pub fn first_error(&self) -> Option<String> {
        self.inner.state.lock().unwrap().first_error.clone()
    }

    /// Takes the event receiver. Can only be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }
}

impl CoordinatorInner {
    /// Admits queued items into free slots under the concurrency limit.
    ///
    /// Called with the state lock held, from every submission and every
    /// completion.
    fn pump(self: &Arc<Self>, state: &mut CoordinatorState) {
        while state.active.len() < self.config.concurrency_limit {
            let Some(item) = state.queue.pop_front() else {
                break;
            };
            let cancel = CancellationToken::new();
            state.active.insert(
                item.id,
                ActiveTransfer {
                    path: item.path.clone(),
                    cancel: cancel.clone(),
                },
            );
            self.aggregator.begin(item.id);
            let _ = self.events_tx.send(UploadEvent::ItemStarted {
                id: item.id,
                path: item.path.clone(),
            });

            let kind = select_strategy(self.endpoint.capabilities(), &item);
            debug!(id = item.id, path = %item.path, ?kind, "transfer started");
            let strategy = build_strategy(kind, self.endpoint.clone(), self.delays.clone(), cancel);
            let progress = ProgressSink::new(item.id, self.progress_tx.clone());
            let inner = self.clone();
            tokio::spawn(async move {
                let result = strategy.start(&item, &progress).await;
                inner.finish_item(item.id, result);
            });
        }
    }

    fn finish_item(self: &Arc<Self>, id: u64, result: Result<(), UploadError>) {
        let mut state = self.state.lock().unwrap();
        let Some(transfer) = state.active.remove(&id) else {
            // The batch was torn down while this transfer was finishing.
            return;
        };

        match result {
            Ok(()) => {
                self.aggregator.finish(id);
                state.completed += 1;
                debug!(id, path = %transfer.path, "transfer complete");
                let _ = self.events_tx.send(UploadEvent::ItemCompleted {
                    id,
                    path: transfer.path,
                });
            }
            Err(UploadError::Aborted) => {
                debug!(id, path = %transfer.path, "transfer aborted");
            }
            Err(err) => {
                // Failed items are accounted for, not in progress; pinning
                // them at full size keeps the aggregate math consistent.
                self.aggregator.finish(id);
                state.failed += 1;
                let error = err.to_string();
                if state.first_error.is_none() {
                    state.first_error = Some(error.clone());
                }
                warn!(id, path = %transfer.path, "transfer failed: {error}");
                let _ = self.events_tx.send(UploadEvent::ItemFailed {
                    id,
                    path: transfer.path,
                    error,
                });
            }
        }

        self.pump(&mut state);

        // Last one out closes the batch.
        if state.batch_open && state.queue.is_empty() && state.active.is_empty() {
            let completed = state.completed;
            let failed = state.failed;
            let first_error = state.first_error.take();
            *state = CoordinatorState {
                next_id: state.next_id,
                ..Default::default()
            };
            // Still under the state lock, so a racing submit can neither
            // open a new batch between the reset and this teardown nor
            // emit its start event ahead of this completion. Lock order
            // state -> aggregator matches submit; the event channel is
            // unbounded, so sending under the lock never blocks.
            self.aggregator.stop();
            self.aggregator.reset();
            info!(completed, failed, "upload batch finished");
            let _ = self.events_tx.send(UploadEvent::BatchCompleted {
                completed,
                failed,
                first_error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    use skylift_transfer::{ByteSource, TransferError};

    use crate::endpoint::{Capabilities, EndpointFuture, WireChunk};

    /// Endpoint whose chunk/file requests block on a semaphore, so tests
    /// control exactly when transfers complete.
    struct GateEndpoint {
        gate: Semaphore,
        inflight: AtomicUsize,
        peak: AtomicUsize,
        conflict_paths: Mutex<Vec<String>>,
        completed_paths: Mutex<Vec<String>>,
    }

    impl GateEndpoint {
        fn gated() -> Self {
            Self {
                gate: Semaphore::new(0),
                inflight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                conflict_paths: Mutex::new(Vec::new()),
                completed_paths: Mutex::new(Vec::new()),
            }
        }

        fn open() -> Self {
            let endpoint = Self::gated();
            endpoint.gate.add_permits(Semaphore::MAX_PERMITS);
            endpoint
        }

        async fn pass(&self, path: String) -> Result<(), UploadError> {
            let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| UploadError::Endpoint("gate closed".into()))?;
            permit.forget();
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            if self.conflict_paths.lock().unwrap().contains(&path) {
                return Err(UploadError::Conflict);
            }
            self.completed_paths.lock().unwrap().push(path);
            Ok(())
        }
    }

    impl StorageEndpoint for GateEndpoint {
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        fn create_dir(&self, path: &str) -> EndpointFuture<'_, ()> {
            let path = path.to_string();
            Box::pin(self.pass(path))
        }

        fn put_file(&self, path: &str, _overwrite: bool, _data: &[u8]) -> EndpointFuture<'_, ()> {
            let path = path.to_string();
            Box::pin(self.pass(path))
        }

        fn create_session(
            &self,
            _path: &str,
            _overwrite: bool,
            _total_bytes: u64,
        ) -> EndpointFuture<'_, String> {
            Box::pin(async { Err(UploadError::Endpoint("not supported".into())) })
        }

        fn append(&self, _session: &str, _offset: u64, _data: &[u8]) -> EndpointFuture<'_, u64> {
            Box::pin(async { Err(UploadError::Endpoint("not supported".into())) })
        }

        fn probe_offset(&self, _session: &str) -> EndpointFuture<'_, u64> {
            Box::pin(async { Err(UploadError::Endpoint("not supported".into())) })
        }

        fn abort_session(&self, _session: &str) -> EndpointFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn post_chunk(
            &self,
            path: &str,
            _overwrite: bool,
            _chunk: WireChunk<'_>,
        ) -> EndpointFuture<'_, ()> {
            let path = path.to_string();
            Box::pin(self.pass(path))
        }
    }

    fn buffer_request(path: &str) -> UploadRequest {
        UploadRequest {
            path: path.to_string(),
            source: ByteSource::Buffer(vec![0x42; 64]),
            overwrite: false,
        }
    }

    /// Lets spawned transfer tasks run up to their next suspension point.
    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    async fn collect_until_batch_end(
        events: &mut mpsc::UnboundedReceiver<UploadEvent>,
    ) -> Vec<UploadEvent> {
        let mut out = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event stream stalled")
                .expect("event channel closed");
            let done = matches!(event, UploadEvent::BatchCompleted { .. });
            out.push(event);
            if done {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn admission_respects_the_concurrency_limit() {
        let endpoint = Arc::new(GateEndpoint::gated());
        let mut coordinator = UploadCoordinator::new(endpoint.clone(), UploaderConfig::default());
        let mut events = coordinator.take_events().unwrap();

        for i in 0..7 {
            coordinator.submit(buffer_request(&format!("f{i}"))).unwrap();
        }
        settle().await;

        // Five slots filled, two still queued.
        assert_eq!(endpoint.inflight.load(Ordering::SeqCst), 5);
        assert_eq!(coordinator.pending_count(), 7);

        endpoint.gate.add_permits(7);
        let batch = collect_until_batch_end(&mut events).await;

        assert_eq!(endpoint.peak.load(Ordering::SeqCst), 5);
        let Some(UploadEvent::BatchCompleted {
            completed,
            failed,
            first_error,
        }) = batch.last()
        else {
            panic!("missing batch completion");
        };
        assert_eq!(*completed, 7);
        assert_eq!(*failed, 0);
        assert!(first_error.is_none());
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn queued_items_start_in_submission_order() {
        let endpoint = Arc::new(GateEndpoint::open());
        let mut coordinator = UploadCoordinator::new(
            endpoint.clone(),
            UploaderConfig {
                concurrency_limit: 1,
                ..Default::default()
            },
        );
        let mut events = coordinator.take_events().unwrap();

        for path in ["a", "b", "c"] {
            coordinator.submit(buffer_request(path)).unwrap();
        }
        let batch = collect_until_batch_end(&mut events).await;

        let started: Vec<&str> = batch
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ItemStarted { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["a", "b", "c"]);
        assert_eq!(
            *endpoint.completed_paths.lock().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[tokio::test]
    async fn one_failed_item_never_halts_its_siblings() {
        let endpoint = Arc::new(GateEndpoint::open());
        endpoint
            .conflict_paths
            .lock()
            .unwrap()
            .push("taken".to_string());
        let mut coordinator = UploadCoordinator::new(endpoint.clone(), UploaderConfig::default());
        let mut events = coordinator.take_events().unwrap();

        for path in ["a", "b", "taken", "c", "d"] {
            coordinator.submit(buffer_request(path)).unwrap();
        }
        let batch = collect_until_batch_end(&mut events).await;

        let failed_paths: Vec<&str> = batch
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ItemFailed { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(failed_paths, vec!["taken"]);

        let Some(UploadEvent::BatchCompleted {
            completed,
            failed,
            first_error,
        }) = batch.last()
        else {
            panic!("missing batch completion");
        };
        assert_eq!(*completed, 4);
        assert_eq!(*failed, 1);
        assert_eq!(first_error.as_deref(), Some("destination conflict"));
    }

    #[tokio::test]
    async fn a_fresh_batch_opens_after_the_previous_one_closes() {
        let endpoint = Arc::new(GateEndpoint::open());
        let mut coordinator = UploadCoordinator::new(endpoint.clone(), UploaderConfig::default());
        let mut events = coordinator.take_events().unwrap();

        coordinator.submit(buffer_request("first")).unwrap();
        let batch = collect_until_batch_end(&mut events).await;
        assert!(matches!(batch.first(), Some(UploadEvent::BatchStarted)));
        let completions = batch
            .iter()
            .filter(|e| matches!(e, UploadEvent::BatchCompleted { .. }))
            .count();
        assert_eq!(completions, 1);

        coordinator.submit(buffer_request("second")).unwrap();
        let batch = collect_until_batch_end(&mut events).await;
        assert!(matches!(batch.first(), Some(UploadEvent::BatchStarted)));
    }

    #[tokio::test]
    async fn invalid_destinations_are_rejected_before_queueing() {
        let endpoint = Arc::new(GateEndpoint::open());
        let coordinator = UploadCoordinator::new(endpoint.clone(), UploaderConfig::default());

        let err = coordinator
            .submit(buffer_request("../escape"))
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Transfer(TransferError::InvalidDestination(_))
        ));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn abort_clears_the_pipeline_without_a_completion_event() {
        let endpoint = Arc::new(GateEndpoint::gated());
        let mut coordinator = UploadCoordinator::new(endpoint.clone(), UploaderConfig::default());
        let mut events = coordinator.take_events().unwrap();

        coordinator.submit(buffer_request("a")).unwrap();
        coordinator.submit(buffer_request("b")).unwrap();
        settle().await;

        coordinator.abort_all();
        assert_eq!(coordinator.pending_count(), 0);

        // Let the gated transfers drain; their late completions must not
        // resurrect the batch.
        endpoint.gate.add_permits(4);
        settle().await;

        let mut saw = Vec::new();
        while let Ok(event) = events.try_recv() {
            saw.push(event);
        }
        assert!(
            !saw.iter()
                .any(|e| matches!(e, UploadEvent::BatchCompleted { .. })),
            "aborted batch must not complete"
        );
        assert!(
            !saw.iter()
                .any(|e| matches!(e, UploadEvent::ItemCompleted { .. })),
            "aborted items must not complete"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batches_never_overlap_under_racing_submissions() {
        let endpoint = Arc::new(GateEndpoint::open());
        let mut coordinator = UploadCoordinator::new(endpoint.clone(), UploaderConfig::default());
        let mut events = coordinator.take_events().unwrap();
        let coordinator = Arc::new(coordinator);

        let total = 50usize;
        let submitter = coordinator.clone();
        tokio::spawn(async move {
            for i in 0..total {
                submitter.submit(buffer_request(&format!("f{i}"))).unwrap();
                tokio::task::yield_now().await;
            }
        });

        // Submissions race against finalizations, so items may spread
        // over several batches. Every start must follow the previous
        // batch's completion, and the completion counts must account
        // for every item.
        let mut batch_open = false;
        let mut item_completions = 0;
        let mut batch_total = 0;
        while item_completions < total || batch_open {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("event stream stalled")
                .expect("event channel closed");
            match event {
                UploadEvent::BatchStarted => {
                    assert!(!batch_open, "batch started before the previous one closed");
                    batch_open = true;
                }
                UploadEvent::BatchCompleted {
                    completed, failed, ..
                } => {
                    assert!(batch_open, "batch completed without a start");
                    batch_open = false;
                    batch_total += completed + failed;
                }
                UploadEvent::ItemCompleted { .. } => item_completions += 1,
                _ => {}
            }
        }
        assert_eq!(item_completions, total);
        assert_eq!(batch_total, total);
    }

    #[tokio::test]
    async fn ids_stay_monotonic_across_batches() {
        let endpoint = Arc::new(GateEndpoint::open());
        let mut coordinator = UploadCoordinator::new(endpoint.clone(), UploaderConfig::default());
        let mut events = coordinator.take_events().unwrap();

        let first = coordinator.submit(buffer_request("a")).unwrap();
        collect_until_batch_end(&mut events).await;
        let second = coordinator.submit(buffer_request("b")).unwrap();
        assert!(second > first);
    }
}
