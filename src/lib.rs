// tus-laser
// 基于 tus 可恢复上传协议的并发分片上传库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 可恢复上传协议模块
pub mod tus;

// 本地文件访问模块
pub mod filesystem;

// 上传编排模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, UploadConfig, UploadMode};
pub use filesystem::{split_file, split_in_half, SectionReader, SourceFile};
pub use tus::{
    Capabilities, Metadata, SessionHandle, TusClient, UploadError, UploadResult,
    UploadSessionService, UploadStream,
};
pub use uploader::{
    plan_chunks, BackoffPolicy, ChunkDescriptor, ChunkWorkerPool, MergeCoordinator,
    ResumeUploader, RetryExecutor, UploadEngine,
};
