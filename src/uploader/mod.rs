// 上传编排模块
//
// - 指数退避与重试执行器
// - 分片规划与并发上传池（Semaphore + JoinSet）
// - 单会话断点续传
// - 分片合并与完成轮询

pub mod backoff;
pub mod chunk;
pub mod engine;
pub mod merge;
pub mod pool;
pub mod resume;
pub mod retry;

pub use backoff::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_JITTER};
pub use chunk::{plan_chunks, ChunkDescriptor, DEFAULT_CHUNK_SIZE};
pub use engine::UploadEngine;
pub use merge::{MergeCoordinator, DEFAULT_MERGE_TIMEOUT, DEFAULT_POLL_INTERVAL};
pub use pool::{ChunkWorkerPool, FailureCell, DEFAULT_MAX_CONCURRENT_CHUNKS};
pub use resume::{ResumeUploader, DEFAULT_RESUME_ATTEMPTS, DEFAULT_RESUME_INTERVAL};
pub use retry::{LogRetryNotifier, RetryExecutor, RetryNotifier};
