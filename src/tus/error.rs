// 上传错误分类
//
// 可重试：Network、ChecksumMismatch
// 不可重试：Protocol、Io、InvalidArgument
// 终止类：Abort、RetriesExhausted、PartialUploadFailure、MergeTimeout、Cancelled

use std::time::Duration;
use thiserror::Error;

/// 上传结果
pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 网络错误（暂时性，可重试）
    #[error("网络错误: {0}")]
    Network(String),

    /// 服务端校验和不匹配（暂时性，可重试）
    #[error("校验和不匹配: {location}")]
    ChecksumMismatch { location: String },

    /// 协议错误（请求被拒绝、能力不支持、偏移量不一致等）
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 主动中止重试循环，包装导致中止的错误
    #[error("任务已中止: {0}")]
    Abort(Box<UploadError>),

    /// 超过最大重试次数
    #[error("超过最大重试次数 ({attempts} 次): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<UploadError>,
    },

    /// 分片上传失败，合并被放弃
    #[error("分片上传错误: {failed}/{total} 个分片失败, {skipped} 个分片被跳过: {first}")]
    PartialUploadFailure {
        failed: usize,
        skipped: usize,
        total: usize,
        /// 已成功创建但不会被合并的分片会话
        orphans: Vec<String>,
        #[source]
        first: Box<UploadError>,
    },

    /// 等待合并完成超时
    #[error("等待合并完成超时: {location} (已等待 {waited:?})")]
    MergeTimeout { location: String, waited: Duration },

    /// 上传已取消
    #[error("上传已取消")]
    Cancelled,

    /// 参数错误
    #[error("参数错误: {0}")]
    InvalidArgument(String),

    /// 本地 IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// 是否为暂时性错误（网络错误与校验和不匹配同等对待）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Network(_) | UploadError::ChecksumMismatch { .. }
        )
    }

    /// 是否为中止信号
    pub fn is_abort(&self) -> bool {
        matches!(self, UploadError::Abort(_) | UploadError::Cancelled)
    }

    /// 包装为中止信号，重试执行器遇到后立即返回
    pub fn abort(inner: UploadError) -> Self {
        match inner {
            UploadError::Abort(_) | UploadError::Cancelled => inner,
            other => UploadError::Abort(Box::new(other)),
        }
    }

    /// 不可重试的错误转换为中止信号，可重试的错误保持原样
    pub fn into_abortable(self) -> Self {
        if self.is_retryable() {
            self
        } else {
            UploadError::abort(self)
        }
    }

    /// 剥离 Abort 包装，得到根本原因
    pub fn root(&self) -> &UploadError {
        match self {
            UploadError::Abort(inner) => inner.root(),
            UploadError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}
