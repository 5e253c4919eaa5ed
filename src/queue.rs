/*!
 * Upload Queue
 *
 * A bounded-concurrency task queue: each hashed chunk gets a dedup check and,
 * if absent, an upload, with at most `C` requests in flight at once. Runs on
 * the async orchestration layer — tasks are admitted as `tokio::spawn`'d
 * futures gated by a `tokio::sync::Semaphore` sized to `C`, so "concurrency
 * cap" counts outstanding non-blocking network operations, not OS threads.
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::model::{ChunkDescriptor, QueueStats, TaskStatus, UploadTask};
use crate::transport::RequestStrategy;

#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Emitted once: all chunks hashed, and nothing pending, in flight, or failed.
    Drained,
    /// Emitted once, on the first task failure.
    Aborted { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueStatus {
    Active,
    Drained,
    Aborted,
}

struct QueueInner {
    pending: VecDeque<UploadTask>,
    in_flight: u64,
    completed: u64,
    failed_tasks: Vec<UploadTask>,
    total_chunks: u64,
    all_chunks_hashed: bool,
    status: QueueStatus,
}

/// Callback invoked with a completed chunk's byte size, once per task
/// completion (dedup hit or successful upload) — the Controller uses this to
/// accumulate `uploadedBytes`.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

pub struct UploadQueue {
    strategy: Arc<dyn RequestStrategy>,
    token: String,
    semaphore: Arc<Semaphore>,
    inner: Mutex<QueueInner>,
    bus: crate::events::EventBus<QueueEvent>,
    on_progress: ProgressCallback,
    paused: AtomicBool,
    /// Captured at construction time so tasks can be admitted from handler
    /// callbacks that may run on the Hash Pipeline's own OS threads, not
    /// just from within the async orchestration layer.
    runtime: tokio::runtime::Handle,
}

impl UploadQueue {
    /// Must be called from within a Tokio runtime context (`Handle::current`
    /// is captured here) so admitted tasks can be spawned later regardless
    /// of which thread calls [`UploadQueue::add_chunk_task`].
    pub fn new(
        strategy: Arc<dyn RequestStrategy>,
        token: String,
        concurrency: usize,
        on_progress: ProgressCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            token,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                in_flight: 0,
                completed: 0,
                failed_tasks: Vec::new(),
                total_chunks: 0,
                all_chunks_hashed: false,
                status: QueueStatus::Active,
            }),
            bus: crate::events::EventBus::new(),
            on_progress,
            paused: AtomicBool::new(false),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    pub fn bus(&self) -> &crate::events::EventBus<QueueEvent> {
        &self.bus
    }

    /// Stop admitting new tasks; in-flight requests complete normally.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume admitting tasks from the pending list.
    pub fn resume(self: &Arc<Self>) {
        self.paused.store(false, Ordering::SeqCst);
        self.try_admit();
    }

    /// Enqueue a hashed chunk. No-op once the queue has aborted or drained.
    pub fn add_chunk_task(self: &Arc<Self>, chunk: ChunkDescriptor) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != QueueStatus::Active {
                return;
            }
            inner.total_chunks += 1;
            inner.pending.push_back(UploadTask::new(chunk));
        }
        self.try_admit();
    }

    /// Declare the input stream closed. Required for drain detection: the
    /// queue never emits `Drained` while more chunks might still arrive.
    pub fn mark_all_chunks_hashed(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.all_chunks_hashed = true;
        }
        self.maybe_drain();
    }

    /// Externally assert the logical job is done (e.g. a whole-file dedup
    /// hit). Forces all pending tasks to `completed` and drains immediately,
    /// idempotently regardless of whether uploads are mid-flight.
    pub fn mark_as_completed(self: &Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.status != QueueStatus::Active {
            return;
        }
        let forced = inner.pending.len() as u64;
        inner.pending.clear();
        inner.completed += forced;
        inner.all_chunks_hashed = true;
        inner.status = QueueStatus::Drained;
        drop(inner);
        self.bus.publish(QueueEvent::Drained);
    }

    pub fn get_stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        QueueStats {
            total_chunks: inner.total_chunks,
            pending: inner.pending.len() as u64,
            in_flight: inner.in_flight,
            completed: inner.completed,
            failed: inner.failed_tasks.len() as u64,
            all_chunks_hashed: inner.all_chunks_hashed,
        }
    }

    pub fn get_failed_tasks(&self) -> Vec<UploadTask> {
        self.inner.lock().unwrap().failed_tasks.clone()
    }

    fn try_admit(self: &Arc<Self>) {
        if self.paused.load(Ordering::SeqCst) {
            return;
        }
        loop {
            let task = {
                let mut inner = self.inner.lock().unwrap();
                if inner.status != QueueStatus::Active {
                    return;
                }
                match inner.pending.pop_front() {
                    Some(task) => task,
                    None => return,
                }
            };

            match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    let queue = self.clone();
                    self.runtime.spawn(async move {
                        queue.run_task(task, permit).await;
                    });
                }
                Err(_) => {
                    self.inner.lock().unwrap().pending.push_front(task);
                    return;
                }
            }
        }
    }

    async fn run_task(self: Arc<Self>, mut task: UploadTask, permit: tokio::sync::OwnedSemaphorePermit) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.in_flight += 1;
        }
        task.status = TaskStatus::InFlight;

        let digest = task.chunk.hash.clone().unwrap_or_default();
        let result = match self.strategy.check_chunk(&self.token, &digest).await {
            Ok(true) => Ok(()),
            Ok(false) => self.strategy.upload_chunk(&self.token, &task.chunk).await,
            Err(e) => Err(e),
        };
        drop(permit);

        match result {
            Ok(()) => {
                task.status = TaskStatus::Completed;
                let size = task.chunk.size();
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.in_flight -= 1;
                    inner.completed += 1;
                }
                (self.on_progress)(size);
                self.try_admit();
                self.maybe_drain();
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = Some(e.to_string());
                let mut newly_aborted = false;
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.in_flight -= 1;
                    inner.failed_tasks.push(task);
                    if inner.status == QueueStatus::Active {
                        inner.status = QueueStatus::Aborted;
                        newly_aborted = true;
                    }
                }
                if newly_aborted {
                    self.bus.publish(QueueEvent::Aborted {
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn maybe_drain(self: &Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.status == QueueStatus::Active
            && inner.all_chunks_hashed
            && inner.pending.is_empty()
            && inner.in_flight == 0
            && inner.failed_tasks.is_empty()
        {
            inner.status = QueueStatus::Drained;
            drop(inner);
            self.bus.publish(QueueEvent::Drained);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, UploadError};
    use crate::model::FileMeta;
    use crate::transport::{ChunkRef, MergeResult};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct MockStrategy {
        existing_digests: StdMutex<std::collections::HashSet<String>>,
        fail_upload_for: StdMutex<std::collections::HashSet<u64>>,
        upload_calls: AtomicU64,
    }

    impl MockStrategy {
        fn new() -> Self {
            Self {
                existing_digests: StdMutex::new(Default::default()),
                fail_upload_for: StdMutex::new(Default::default()),
                upload_calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl RequestStrategy for MockStrategy {
        async fn create_session(&self, _meta: &FileMeta, _chunk_count: u64) -> Result<String> {
            Ok("token".to_string())
        }

        async fn check_chunk(&self, _token: &str, digest: &str) -> Result<bool> {
            Ok(self.existing_digests.lock().unwrap().contains(digest))
        }

        async fn check_file(&self, _token: &str, digest: &str) -> Result<bool> {
            Ok(self.existing_digests.lock().unwrap().contains(digest))
        }

        async fn upload_chunk(&self, _token: &str, chunk: &ChunkDescriptor) -> Result<()> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_upload_for.lock().unwrap().contains(&chunk.index) {
                return Err(UploadError::upload(chunk.index, "mock failure"));
            }
            Ok(())
        }

        async fn merge_file(
            &self,
            _token: &str,
            _file_hash: &str,
            _file_name: &str,
            _chunks: &[ChunkRef],
        ) -> Result<MergeResult> {
            Ok(MergeResult {
                locator: "http://example/file".to_string(),
            })
        }
    }

    fn chunk_with_hash(index: u64, size: u64, digest: &str) -> ChunkDescriptor {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; size as usize]).unwrap();
        let source = Arc::new(tmp.reopen().unwrap());
        ChunkDescriptor {
            index,
            start: 0,
            end: size,
            source,
            hash: Some(digest.to_string()),
        }
    }

    async fn wait_for_drain(queue: &Arc<UploadQueue>) -> bool {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        queue.bus().subscribe(move |event: &QueueEvent| {
            let _ = tx.send(event.clone());
        });
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(QueueEvent::Drained)) => true,
            _ => false,
        }
    }

    #[tokio::test]
    async fn uploads_new_chunks_and_drains() {
        let strategy = Arc::new(MockStrategy::new());
        let progress_total = Arc::new(AtomicU64::new(0));
        let progress_total_clone = progress_total.clone();
        let queue = UploadQueue::new(
            strategy,
            "token".to_string(),
            2,
            Arc::new(move |bytes| {
                progress_total_clone.fetch_add(bytes, Ordering::SeqCst);
            }),
        );

        queue.add_chunk_task(chunk_with_hash(0, 10, "h0"));
        queue.add_chunk_task(chunk_with_hash(1, 20, "h1"));
        queue.mark_all_chunks_hashed();

        assert!(wait_for_drain(&queue).await);
        assert_eq!(progress_total.load(Ordering::SeqCst), 30);

        let stats = queue.get_stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn dedup_hit_skips_upload_but_still_credits_progress() {
        let strategy = Arc::new(MockStrategy::new());
        strategy
            .existing_digests
            .lock()
            .unwrap()
            .insert("already-there".to_string());

        let progress_total = Arc::new(AtomicU64::new(0));
        let progress_total_clone = progress_total.clone();
        let strategy_for_assert = strategy.clone();
        let queue = UploadQueue::new(
            strategy,
            "token".to_string(),
            2,
            Arc::new(move |bytes| {
                progress_total_clone.fetch_add(bytes, Ordering::SeqCst);
            }),
        );

        queue.add_chunk_task(chunk_with_hash(0, 42, "already-there"));
        queue.mark_all_chunks_hashed();

        assert!(wait_for_drain(&queue).await);
        assert_eq!(progress_total.load(Ordering::SeqCst), 42);
        assert_eq!(strategy_for_assert.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_upload_aborts_the_queue() {
        let strategy = Arc::new(MockStrategy::new());
        strategy.fail_upload_for.lock().unwrap().insert(0);

        let queue = UploadQueue::new(
            strategy,
            "token".to_string(),
            2,
            Arc::new(|_| {}),
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        queue.bus().subscribe(move |event: &QueueEvent| {
            let _ = tx.send(event.clone());
        });

        queue.add_chunk_task(chunk_with_hash(0, 10, "h0"));
        queue.mark_all_chunks_hashed();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, QueueEvent::Aborted { .. }));
        assert_eq!(queue.get_failed_tasks().len(), 1);
    }

    #[tokio::test]
    async fn mark_as_completed_forces_drain_with_pending_tasks() {
        let strategy = Arc::new(MockStrategy::new());
        let queue = UploadQueue::new(strategy, "token".to_string(), 1, Arc::new(|_| {}));

        // Saturate the single permit so subsequent tasks stay pending.
        queue.add_chunk_task(chunk_with_hash(0, 5, "h0"));
        queue.add_chunk_task(chunk_with_hash(1, 5, "h1"));
        queue.mark_as_completed();

        let stats = queue.get_stats();
        assert_eq!(stats.pending, 0);
        assert!(stats.all_chunks_hashed);
    }

    #[tokio::test]
    async fn never_exceeds_configured_concurrency() {
        struct SlowStrategy {
            in_flight: AtomicU64,
            max_seen: AtomicU64,
        }

        #[async_trait]
        impl RequestStrategy for SlowStrategy {
            async fn create_session(&self, _meta: &FileMeta, _chunk_count: u64) -> Result<String> {
                Ok("token".into())
            }
            async fn check_chunk(&self, _token: &str, _digest: &str) -> Result<bool> {
                let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(false)
            }
            async fn check_file(&self, _token: &str, _digest: &str) -> Result<bool> {
                Ok(false)
            }
            async fn upload_chunk(&self, _token: &str, _chunk: &ChunkDescriptor) -> Result<()> {
                Ok(())
            }
            async fn merge_file(
                &self,
                _token: &str,
                _file_hash: &str,
                _file_name: &str,
                _chunks: &[ChunkRef],
            ) -> Result<MergeResult> {
                Ok(MergeResult {
                    locator: "x".into(),
                })
            }
        }

        let strategy = Arc::new(SlowStrategy {
            in_flight: AtomicU64::new(0),
            max_seen: AtomicU64::new(0),
        });
        let strategy_for_assert = strategy.clone();
        let queue = UploadQueue::new(strategy, "token".to_string(), 3, Arc::new(|_| {}));

        for i in 0..10 {
            queue.add_chunk_task(chunk_with_hash(i, 1, &format!("h{i}")));
        }
        queue.mark_all_chunks_hashed();

        assert!(wait_for_drain(&queue).await);
        assert!(strategy_for_assert.max_seen.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn paused_queue_does_not_admit_new_tasks() {
        let strategy = Arc::new(MockStrategy::new());
        let queue = UploadQueue::new(strategy.clone(), "token".to_string(), 2, Arc::new(|_| {}));

        queue.pause();
        queue.add_chunk_task(chunk_with_hash(0, 5, "h0"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.get_stats().pending, 1);
        assert_eq!(strategy.upload_calls.load(Ordering::SeqCst), 0);

        queue.resume();
        queue.mark_all_chunks_hashed();
        assert!(wait_for_drain(&queue).await);
    }
}
