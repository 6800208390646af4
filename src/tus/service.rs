// 上传会话服务抽象
//
// 编排层只依赖这个 trait，HTTP 细节由 TusClient 实现

use async_trait::async_trait;

use crate::tus::{Metadata, SessionHandle, UploadResult};

/// 上传会话服务（已完成能力协商）
#[async_trait]
pub trait UploadSessionService: Send + Sync {
    /// 创建会话
    ///
    /// `partial` 为 true 时创建分片会话，之后用于合并
    async fn create_session(
        &self,
        size: u64,
        partial: bool,
        metadata: &Metadata,
    ) -> UploadResult<SessionHandle>;

    /// 从 `offset` 开始追加数据，返回服务端确认的新偏移量
    ///
    /// 服务端可能只接收部分数据，调用方以返回值为准
    async fn write_at(&self, location: &str, offset: u64, data: Vec<u8>) -> UploadResult<u64>;

    /// 查询会话当前的偏移量与大小
    async fn get_session(&self, location: &str) -> UploadResult<SessionHandle>;

    /// 按顺序合并分片会话
    async fn concatenate_sessions(
        &self,
        parts: &[SessionHandle],
        metadata: &Metadata,
    ) -> UploadResult<SessionHandle>;

    /// 终止（删除）会话
    async fn terminate_session(&self, location: &str) -> UploadResult<()>;
}
