pub mod buffer_pool;
pub mod chunker;
pub mod engine;
pub mod io;
pub mod progress;
pub mod reassembler;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod stream;

pub use chunker::{ChunkDescriptor, ChunkPlan, SequentialChunker};
pub use engine::{BatchReport, Downloader, Uploader};
pub use progress::{FileStatus, ProgressTracker, TransferProgress};
pub use reassembler::{DigestStatus, Reassembler, TransferResult};
pub use retry::{ChunkId, RetryPolicy};
pub use scheduler::{run_bounded, BoundedScheduler};
pub use sink::{FileSink, MemorySink, PlaintextSink};
