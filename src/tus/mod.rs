// 可恢复上传协议模块
//
// - 会话类型与元数据编码
// - 错误分类（可重试 / 致命 / 中止）
// - 会话服务抽象与 HTTP 实现
// - 只追加写入流

pub mod client;
pub mod error;
pub mod service;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{TusClient, TUS_VERSION};
pub use error::{UploadError, UploadResult};
pub use service::UploadSessionService;
pub use stream::{UploadStream, DEFAULT_WRITE_BUFFER_SIZE};
pub use types::{Capabilities, Metadata, SessionHandle, METADATA_FILENAME};
