/*!
 * Controller
 *
 * The top-level state machine: creates an upload session with the server,
 * wires the Hash Pipeline into the Upload Queue, performs the whole-file
 * dedup check, issues the final merge call, and emits `progress`/`end`/
 * `error` to its own subscribers.
 */

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::chunker;
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::model::FileMeta;
use crate::pipeline::{HashPipeline, PipelineEvent};
use crate::queue::{QueueEvent, UploadQueue};
use crate::transport::{ChunkRef, RequestStrategy};

/// Outcome of a successful run: the merge response's opaque locator.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub locator: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Progress { uploaded_bytes: u64, file_size: u64 },
    End(UploadOutcome),
    Error(String),
}

struct RunState {
    pipeline: Arc<HashPipeline>,
    queue: Arc<UploadQueue>,
    token: String,
    file_name: String,
    file_size: u64,
    uploaded_bytes: AtomicU64,
    file_hash: Mutex<Option<String>>,
    /// Shared with the Upload Queue's progress callback (constructed before
    /// `RunState` itself exists) so progress events stop the instant a run
    /// terminates, even for tasks that were already in flight when the
    /// terminal outcome fired.
    finished: Arc<AtomicBool>,
    chunk_digests: Mutex<Vec<ChunkRef>>,
    /// Captured in `start()` (itself async, so run within a runtime context)
    /// so pipeline-thread event handlers can spawn follow-up async work
    /// regardless of which OS thread they run on.
    runtime: tokio::runtime::Handle,
}

/// Drives one upload of one file from start to finish. Not reused across
/// runs: construct a new `Controller` per file.
pub struct Controller {
    strategy: Arc<dyn RequestStrategy>,
    config: UploadConfig,
    bus: crate::events::EventBus<ControllerEvent>,
    run: Mutex<Option<Arc<RunState>>>,
}

impl Controller {
    pub fn new(strategy: Arc<dyn RequestStrategy>, config: UploadConfig) -> Self {
        Self {
            strategy,
            config,
            bus: crate::events::EventBus::new(),
            run: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &crate::events::EventBus<ControllerEvent> {
        &self.bus
    }

    /// Begin uploading `path`. Resolves once the session is created and
    /// hashing/uploading has started; terminal outcomes (`end`/`error`)
    /// arrive later as events on [`Controller::bus`].
    pub async fn start(self: &Arc<Self>, path: &Path) -> Result<()> {
        self.config.validate()?;

        let file_size = std::fs::metadata(path)?.len();
        let meta = FileMeta::from_path(path, file_size);
        let chunk_count = chunker::chunk_count(file_size, self.config.chunk_size as u64);

        info!(file_name = %meta.file_name, file_size, chunk_count, "creating upload session");
        let token = self
            .strategy
            .create_session(&meta, chunk_count)
            .await
            .map_err(|e| {
                self.bus.publish(ControllerEvent::Error(e.to_string()));
                e
            })?;

        let chunks = chunker::chunk_file(path, self.config.chunk_size as u64)?;

        let pipeline = Arc::new(HashPipeline::new());
        let finished = Arc::new(AtomicBool::new(false));

        let queue = {
            let controller_for_progress = self.clone();
            let file_size_for_progress = file_size;
            let progress_acc = Arc::new(AtomicU64::new(0));
            let finished_for_progress = finished.clone();
            let on_progress: crate::queue::ProgressCallback = {
                let controller = controller_for_progress;
                let acc = progress_acc.clone();
                Arc::new(move |size: u64| {
                    // A task that was already in flight when the run reached
                    // a terminal outcome (e.g. a whole-file dedup hit) must
                    // not push uploaded_bytes past the final value it
                    // already published.
                    if finished_for_progress.load(Ordering::SeqCst) {
                        return;
                    }
                    let uploaded = acc.fetch_add(size, Ordering::SeqCst) + size;
                    controller.bus.publish(ControllerEvent::Progress {
                        uploaded_bytes: uploaded,
                        file_size: file_size_for_progress,
                    });
                })
            };
            UploadQueue::new(
                self.strategy.clone(),
                token.clone(),
                self.config.concurrency,
                on_progress,
            )
        };

        let run = Arc::new(RunState {
            pipeline: pipeline.clone(),
            queue,
            token: token.clone(),
            file_name: meta.file_name.clone(),
            file_size,
            uploaded_bytes: AtomicU64::new(0),
            file_hash: Mutex::new(None),
            finished,
            chunk_digests: Mutex::new(Vec::new()),
            runtime: tokio::runtime::Handle::current(),
        });

        *self.run.lock().unwrap() = Some(run.clone());

        self.wire_pipeline_events(run.clone());
        self.wire_queue_events(run.clone());

        pipeline.start(chunks, self.config.resolved_worker_count());

        Ok(())
    }

    fn wire_pipeline_events(self: &Arc<Self>, run: Arc<RunState>) {
        let controller = self.clone();
        let run_for_pipeline = run.clone();
        run.pipeline.bus().subscribe(move |event: &PipelineEvent| {
            match event {
                PipelineEvent::Chunks(batch) => {
                    for chunk in batch {
                        run_for_pipeline
                            .chunk_digests
                            .lock()
                            .unwrap()
                            .push(ChunkRef {
                                index: chunk.index,
                                hash: chunk.hash.clone().unwrap_or_default(),
                            });
                        run_for_pipeline.queue.add_chunk_task(chunk.clone());
                    }
                }
                PipelineEvent::WholeHash(digest) => {
                    *run_for_pipeline.file_hash.lock().unwrap() = Some(digest.clone());
                    let controller = controller.clone();
                    let run = run_for_pipeline.clone();
                    let digest = digest.clone();
                    run_for_pipeline.runtime.spawn(async move {
                        controller.check_whole_file_dedup(run, digest).await;
                    });
                }
                PipelineEvent::Drain => {
                    run_for_pipeline.queue.mark_all_chunks_hashed();
                }
                PipelineEvent::Error { index, message } => {
                    controller.fail(
                        &run_for_pipeline,
                        UploadError::hash(*index, message.clone()),
                    );
                }
            }
        });
    }

    fn wire_queue_events(self: &Arc<Self>, run: Arc<RunState>) {
        let controller = self.clone();
        let run_for_queue = run.clone();
        run.queue.bus().subscribe(move |event: &QueueEvent| match event {
            QueueEvent::Drained => {
                let controller = controller.clone();
                let run = run_for_queue.clone();
                run_for_queue.runtime.spawn(async move {
                    controller.maybe_merge(run).await;
                });
            }
            QueueEvent::Aborted { error } => {
                controller.fail(&run_for_queue, UploadError::network(error.clone()));
            }
        });
    }

    async fn check_whole_file_dedup(self: Arc<Self>, run: Arc<RunState>, digest: String) {
        match self.strategy.check_file(&run.token, &digest).await {
            Ok(true) => {
                // Claim the terminal state before touching the queue: once
                // `mark_as_completed` publishes `Drained` synchronously, its
                // handler spawns `maybe_merge` on another runtime worker
                // thread, which only checks `finished` for its own
                // short-circuit. If that happened before this flag were set,
                // `maybe_merge` could run `merge_file` before `finish` ever
                // fires below.
                if run.finished.swap(true, Ordering::SeqCst) {
                    return;
                }
                debug!(token = %run.token, "whole-file dedup hit, short-circuiting");
                run.queue.mark_as_completed();
                run.uploaded_bytes.store(run.file_size, Ordering::SeqCst);
                self.bus.publish(ControllerEvent::Progress {
                    uploaded_bytes: run.file_size,
                    file_size: run.file_size,
                });
                self.finish_claimed(
                    &run,
                    ControllerEvent::End(UploadOutcome { locator: None }),
                );
            }
            Ok(false) => {}
            Err(e) => self.fail(&run, e),
        }
    }

    async fn maybe_merge(self: Arc<Self>, run: Arc<RunState>) {
        if run.finished.load(Ordering::SeqCst) {
            return;
        }
        let file_hash = match run.file_hash.lock().unwrap().clone() {
            Some(h) => h,
            None => return,
        };

        let mut chunks = run.chunk_digests.lock().unwrap().clone();
        chunks.sort_by_key(|c| c.index);

        info!(token = %run.token, chunk_count = chunks.len(), "queue drained, merging");
        match self
            .strategy
            .merge_file(&run.token, &file_hash, &run.file_name, &chunks)
            .await
        {
            Ok(merge_result) => self.finish(
                &run,
                ControllerEvent::End(UploadOutcome {
                    locator: Some(merge_result.locator),
                }),
            ),
            Err(e) => self.fail(&run, e),
        }
    }

    fn fail(&self, run: &Arc<RunState>, error: UploadError) {
        if run.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(error = %error, "upload terminated with error");
        self.dispose_pipeline(run);
        self.bus.publish(ControllerEvent::Error(error.to_string()));
    }

    fn finish(&self, run: &Arc<RunState>, event: ControllerEvent) {
        if run.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.finish_claimed(run, event);
    }

    /// Finalize a run whose terminal state has already been claimed (i.e.
    /// `run.finished` was swapped to `true` by the caller itself, not by
    /// this method). Used where the claim has to happen before some other
    /// side effect (see `check_whole_file_dedup`).
    fn finish_claimed(&self, run: &Arc<RunState>, event: ControllerEvent) {
        self.dispose_pipeline(run);
        self.bus.publish(event);
    }

    /// Terminate the pipeline's worker and fold threads on a blocking task
    /// rather than inline — `fail`/`finish` can themselves be invoked from a
    /// handler running on the pipeline's own fold thread (e.g. a hashing
    /// error), and `HashPipeline::dispose` joins that thread; joining it from
    /// itself would deadlock.
    fn dispose_pipeline(&self, run: &Arc<RunState>) {
        let pipeline = run.pipeline.clone();
        run.runtime.spawn_blocking(move || pipeline.dispose());
    }

    /// Forward to both the Hash Pipeline (stop emitting new `chunks`
    /// batches) and the Upload Queue (stop admitting new tasks); in-flight
    /// requests complete normally.
    pub fn pause(&self) {
        if let Some(run) = self.run.lock().unwrap().as_ref() {
            run.pipeline.pause();
            run.queue.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(run) = self.run.lock().unwrap().as_ref() {
            run.pipeline.resume();
            run.queue.resume();
        }
    }
}
