/*!
 * Hash Pipeline
 *
 * Turns an ordered chunk sequence into a stream of hashed chunk batches plus
 * one whole-file digest, computed on a pool of native OS threads — hashing
 * is CPU-bound and gets real parallelism, never the cooperative executor the
 * orchestration layer (Controller, Upload Queue) runs on.
 *
 * Dispatch partitions the chunk array into contiguous index-ranges, one per
 * worker; completion flows back over a single `crossbeam-channel`, mirroring
 * the message-passing shape the rest of this codebase uses for cross-thread
 * handoff. A fold stage on that channel maintains a pending map and a
 * `nextToFold` cursor so the whole-file digest is a pure function of file
 * contents, independent of which worker finishes which chunk first.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::hash::Accumulator;
use crate::model::ChunkDescriptor;

/// Events emitted by the Hash Pipeline over its lifetime.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A batch of chunks finished hashing (digest filled in). Normally one
    /// chunk per batch; while paused, several accumulate into one batch.
    Chunks(Vec<ChunkDescriptor>),
    /// The whole-file digest, emitted exactly once, after which `Drain`
    /// follows.
    WholeHash(String),
    /// All chunks have been hashed and folded.
    Drain,
    /// A worker failed to hash a chunk. Terminal: no `WholeHash` or `Drain`
    /// follows an `Error`.
    Error { index: u64, message: String },
}

enum WorkerMessage {
    Hashed(ChunkDescriptor),
    Failed { index: u64, message: String },
}

#[derive(Default)]
struct PipelineBuffer {
    chunks: Vec<ChunkDescriptor>,
    /// Whole-file digest, set when hashing finished while paused so `Drain`
    /// can wait for the buffered chunks ahead of it to flush first.
    pending_finish: Option<String>,
}

struct PipelineState {
    paused: AtomicBool,
    stopped: AtomicBool,
    buffer: Mutex<PipelineBuffer>,
}

/// A running (or idle) hash pipeline. Construct with [`HashPipeline::new`],
/// call [`HashPipeline::start`] once per file, then subscribe to
/// [`HashPipeline::bus`] for [`PipelineEvent`]s.
pub struct HashPipeline {
    bus: Arc<crate::events::EventBus<PipelineEvent>>,
    state: Arc<PipelineState>,
    worker_handles: Mutex<Vec<thread::JoinHandle<()>>>,
    fold_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HashPipeline {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(crate::events::EventBus::new()),
            state: Arc::new(PipelineState {
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                buffer: Mutex::new(PipelineBuffer::default()),
            }),
            worker_handles: Mutex::new(Vec::new()),
            fold_handle: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &crate::events::EventBus<PipelineEvent> {
        &self.bus
    }

    /// Begin hashing `chunks` on `worker_count` OS threads (0 is treated as
    /// the platform's hardware-parallelism hint, falling back to 4).
    pub fn start(&self, chunks: Vec<ChunkDescriptor>, worker_count: usize) {
        let total = chunks.len() as u64;

        if total == 0 {
            let digest = Accumulator::new().end();
            self.bus.publish(PipelineEvent::WholeHash(digest));
            self.bus.publish(PipelineEvent::Drain);
            return;
        }

        let worker_count = resolve_worker_count(worker_count).min(chunks.len()).max(1);
        let (completion_tx, completion_rx): (Sender<WorkerMessage>, Receiver<WorkerMessage>) =
            bounded(chunks.len());

        let partitions = partition(chunks, worker_count);
        let mut handles = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let tx = completion_tx.clone();
            let stopped = self.state.clone();
            handles.push(thread::spawn(move || {
                for chunk in partition {
                    if stopped.stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    let msg = match chunk.read_bytes() {
                        Ok(bytes) => WorkerMessage::Hashed(chunk.with_hash(crate::hash::hash(&bytes))),
                        Err(e) => WorkerMessage::Failed {
                            index: chunk.index,
                            message: e.to_string(),
                        },
                    };
                    if tx.send(msg).is_err() {
                        return;
                    }
                }
            }));
        }
        drop(completion_tx);
        *self.worker_handles.lock().unwrap() = handles;

        let bus = self.bus.clone();
        let state = self.state.clone();
        let fold_handle = thread::spawn(move || {
            let mut pending: HashMap<u64, ChunkDescriptor> = HashMap::new();
            let mut next_to_fold = 0u64;
            let mut accumulator = Accumulator::new();
            let mut hashed_count = 0u64;

            for message in completion_rx.iter() {
                match message {
                    WorkerMessage::Failed { index, message } => {
                        bus.publish(PipelineEvent::Error { index, message });
                        return;
                    }
                    WorkerMessage::Hashed(chunk) => {
                        let index = chunk.index;
                        pending.insert(index, chunk);
                        while let Some(folded) = pending.remove(&next_to_fold) {
                            accumulator.append_digest(folded.hash.as_deref().unwrap_or(""));
                            next_to_fold += 1;

                            let mut buf = state.buffer.lock().unwrap();
                            if state.paused.load(Ordering::SeqCst) {
                                buf.chunks.push(folded);
                            } else {
                                drop(buf);
                                bus.publish(PipelineEvent::Chunks(vec![folded]));
                            }
                        }
                        hashed_count += 1;
                        if hashed_count == total {
                            let digest = accumulator.end();
                            let mut buf = state.buffer.lock().unwrap();
                            if state.paused.load(Ordering::SeqCst) {
                                // Chunks folded while paused are sitting in
                                // `buf.chunks`, not yet delivered to the
                                // queue; publishing `Drain` now would let the
                                // queue see "all chunks hashed" before it has
                                // actually received them. `resume` flushes
                                // both together, in order.
                                buf.pending_finish = Some(digest);
                            } else {
                                drop(buf);
                                bus.publish(PipelineEvent::WholeHash(digest));
                                bus.publish(PipelineEvent::Drain);
                            }
                            return;
                        }
                    }
                }
            }
        });

        *self.fold_handle.lock().unwrap() = Some(fold_handle);
    }

    /// Stop emitting `Chunks` events; hashing and whole-file folding continue
    /// in the background (cheap relative to the bandwidth pause is meant to
    /// save).
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    /// Flush any batch buffered while paused, then resume live emission. If
    /// hashing finished while paused, the deferred `WholeHash`/`Drain` pair
    /// follows the flushed batch so the queue never sees `Drain` ahead of the
    /// chunks it's draining.
    pub fn resume(&self) {
        let mut buf = self.state.buffer.lock().unwrap();
        self.state.paused.store(false, Ordering::SeqCst);
        let batch = std::mem::take(&mut buf.chunks);
        let pending_finish = buf.pending_finish.take();
        drop(buf);

        if !batch.is_empty() {
            self.bus.publish(PipelineEvent::Chunks(batch));
        }
        if let Some(digest) = pending_finish {
            self.bus.publish(PipelineEvent::WholeHash(digest));
            self.bus.publish(PipelineEvent::Drain);
        }
    }

    /// Terminate all worker handles. Safe to call whether or not `start` was
    /// ever invoked.
    pub fn dispose(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        for handle in self.worker_handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.fold_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Drop any buffered chunk batches, releasing the backing file views
    /// they hold.
    pub fn clear(&self) {
        self.state.buffer.lock().unwrap().chunks.clear();
    }
}

impl Default for HashPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_worker_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Split `chunks` into `worker_count` contiguous, near-equal partitions.
fn partition(chunks: Vec<ChunkDescriptor>, worker_count: usize) -> Vec<Vec<ChunkDescriptor>> {
    let total = chunks.len();
    let base = total / worker_count;
    let extra = total % worker_count;

    let mut out = Vec::with_capacity(worker_count);
    let mut iter = chunks.into_iter();
    for w in 0..worker_count {
        let take = base + usize::from(w < extra);
        out.push(iter.by_ref().take(take).collect());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_descriptors;
    use std::io::Write;
    use std::sync::mpsc;
    use std::time::Duration;

    fn temp_file(bytes: &[u8]) -> Arc<std::fs::File> {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        Arc::new(tmp.reopen().unwrap())
    }

    fn collect_events(pipeline: &HashPipeline, expected_drains: usize) -> Vec<PipelineEvent> {
        let (tx, rx) = mpsc::channel();
        pipeline.bus().subscribe(move |event: &PipelineEvent| {
            let _ = tx.send(event.clone());
        });
        let mut events = Vec::new();
        let mut drains = 0;
        while drains < expected_drains {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(event) => {
                    if matches!(event, PipelineEvent::Drain | PipelineEvent::Error { .. }) {
                        drains += 1;
                    }
                    events.push(event);
                }
                Err(_) => break,
            }
        }
        events
    }

    #[test]
    fn hashes_every_chunk_and_emits_whole_hash_then_drain() {
        let handle = temp_file(&vec![9u8; 30]);
        let chunks = chunk_descriptors(handle, 30, 10);

        let pipeline = HashPipeline::new();
        pipeline.start(chunks, 2);
        let events = collect_events(&pipeline, 1);
        pipeline.dispose();

        let mut seen_indices = std::collections::HashSet::new();
        let mut saw_whole_hash = false;
        let mut saw_drain = false;
        for event in &events {
            match event {
                PipelineEvent::Chunks(batch) => {
                    for chunk in batch {
                        assert!(chunk.hash.is_some());
                        seen_indices.insert(chunk.index);
                    }
                }
                PipelineEvent::WholeHash(_) => saw_whole_hash = true,
                PipelineEvent::Drain => saw_drain = true,
                PipelineEvent::Error { .. } => panic!("unexpected error"),
            }
        }

        assert_eq!(seen_indices.len(), 3);
        assert!(saw_whole_hash);
        assert!(saw_drain);
    }

    #[test]
    fn whole_hash_is_order_independent_of_worker_completion() {
        let handle = temp_file(&vec![3u8; 40]);
        let chunks_a = chunk_descriptors(handle.clone(), 40, 10);
        let chunks_b = chunk_descriptors(handle, 40, 10);

        let pipeline_a = HashPipeline::new();
        pipeline_a.start(chunks_a, 4);
        let events_a = collect_events(&pipeline_a, 1);
        pipeline_a.dispose();

        let pipeline_b = HashPipeline::new();
        pipeline_b.start(chunks_b, 1);
        let events_b = collect_events(&pipeline_b, 1);
        pipeline_b.dispose();

        let whole_hash = |events: &[PipelineEvent]| {
            events.iter().find_map(|e| match e {
                PipelineEvent::WholeHash(h) => Some(h.clone()),
                _ => None,
            })
        };

        assert_eq!(whole_hash(&events_a), whole_hash(&events_b));
    }

    #[test]
    fn zero_byte_file_emits_whole_hash_and_drain_with_no_chunks() {
        let pipeline = HashPipeline::new();
        pipeline.start(Vec::new(), 2);
        let events = collect_events(&pipeline, 1);
        pipeline.dispose();

        assert!(events
            .iter()
            .all(|e| !matches!(e, PipelineEvent::Chunks(_))));
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::WholeHash(_))));
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::Drain)));
    }

    #[test]
    fn pause_before_hashing_finishes_defers_whole_hash_and_drain_until_resume() {
        let handle = temp_file(&vec![4u8; 30]);
        let chunks = chunk_descriptors(handle, 30, 10);

        let pipeline = HashPipeline::new();
        pipeline.pause();
        pipeline.start(chunks, 2);

        let (tx, rx) = mpsc::channel();
        pipeline.bus().subscribe(move |event: &PipelineEvent| {
            let _ = tx.send(event.clone());
        });

        // Hashing finishes in the background while paused; neither `Chunks`
        // nor `WholeHash`/`Drain` should reach the subscriber yet.
        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());

        pipeline.resume();

        let mut saw_whole_hash = false;
        let mut saw_drain = false;
        let mut seen_indices = std::collections::HashSet::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(PipelineEvent::Chunks(batch)) => {
                    for chunk in batch {
                        seen_indices.insert(chunk.index);
                    }
                }
                Ok(PipelineEvent::WholeHash(_)) => saw_whole_hash = true,
                Ok(PipelineEvent::Drain) => {
                    saw_drain = true;
                    break;
                }
                Ok(PipelineEvent::Error { .. }) => panic!("unexpected error"),
                Err(_) => break,
            }
        }
        pipeline.dispose();

        assert_eq!(seen_indices.len(), 3);
        assert!(saw_whole_hash);
        assert!(saw_drain);
    }

    #[test]
    fn partition_splits_near_equally_and_preserves_all_chunks() {
        let handle = temp_file(&vec![1u8; 17]);
        let chunks = chunk_descriptors(handle, 17, 5);
        let total = chunks.len();
        let parts = partition(chunks, 3);

        assert_eq!(parts.iter().map(|p| p.len()).sum::<usize>(), total);
        assert!(parts.iter().map(|p| p.len()).max().unwrap() - parts.iter().map(|p| p.len()).min().unwrap() <= 1);
    }

    #[test]
    fn resolve_worker_count_falls_back_when_zero_requested() {
        assert_eq!(resolve_worker_count(3), 3);
        assert!(resolve_worker_count(0) >= 1);
    }
}
