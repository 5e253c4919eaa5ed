/*!
 * haul - client-side large-file upload engine
 *
 * Splits a file into chunks, hashes them in parallel, deduplicates against
 * a server over a pluggable transport, and drives a bounded-concurrency
 * upload queue through to a final merge call.
 *
 * Five components, leaves first: [`hash`] (the digest primitive), [`chunker`]
 * (file → chunk descriptors), [`pipeline`] (parallel hashing + ordered
 * whole-file fold), [`queue`] (bounded-concurrency dedup/upload), and
 * [`controller`] (the state machine tying the others together). The
 * transport the Controller drives is expressed as a trait in [`transport`],
 * with one bundled `reqwest`-based implementation.
 */

pub mod chunker;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod hash;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod transport;

pub use config::UploadConfig;
pub use controller::{Controller, ControllerEvent, UploadOutcome};
pub use error::{Result, UploadError};
pub use model::{ChunkDescriptor, FileMeta, QueueStats, Session, TaskStatus, UploadTask};
pub use pipeline::{HashPipeline, PipelineEvent};
pub use queue::{QueueEvent, UploadQueue};
pub use transport::http::HttpRequestStrategy;
pub use transport::{ChunkRef, MergeResult, RequestStrategy};
