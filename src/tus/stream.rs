// 上传写入流
//
// 只追加写入：每次写入都从服务端确认的偏移量开始，
// 偏移量以服务端返回为准（服务端可能只接收了部分数据）。

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::filesystem::SectionReader;
use crate::tus::{SessionHandle, UploadError, UploadResult, UploadSessionService};

/// 默认单次写入（PATCH 请求体）大小: 2MB
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// 会话写入流
pub struct UploadStream {
    service: Arc<dyn UploadSessionService>,
    session: SessionHandle,
    buffer_size: usize,
    cancel_token: Option<CancellationToken>,
}

impl UploadStream {
    /// 打开写入流
    pub fn new(service: Arc<dyn UploadSessionService>, session: SessionHandle) -> Self {
        Self {
            service,
            session,
            buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            cancel_token: None,
        }
    }

    /// 设置单次写入大小
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// 设置取消令牌，复制循环在每次写入前检查
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    /// 服务端确认的偏移量
    pub fn tell(&self) -> u64 {
        self.session.remote_offset.unwrap_or(0)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn into_session(self) -> SessionHandle {
        self.session
    }

    /// 向服务端查询最新偏移量
    pub async fn sync(&mut self) -> UploadResult<u64> {
        let remote = self.service.get_session(&self.session.location).await?;
        let offset = remote.remote_offset.unwrap_or(0);

        debug!(
            "同步偏移量: location={}, local={}, remote={}",
            self.session.location,
            self.tell(),
            offset
        );

        self.session.remote_offset = Some(offset);
        if remote.remote_size.is_some() {
            self.session.remote_size = remote.remote_size;
        }
        Ok(offset)
    }

    /// 追加一段数据，返回新的确认偏移量
    pub async fn write(&mut self, data: Vec<u8>) -> UploadResult<u64> {
        let offset = self.tell();
        let len = data.len() as u64;
        let new_offset = self
            .service
            .write_at(&self.session.location, offset, data)
            .await?;

        if new_offset < offset || new_offset > offset + len {
            return Err(UploadError::Protocol(format!(
                "服务端返回的偏移量无效: location={}, offset={}, sent={}, returned={}",
                self.session.location, offset, len, new_offset
            )));
        }

        self.session.remote_offset = Some(new_offset);
        Ok(new_offset)
    }

    /// 把区间视图从当前位置复制到末尾，返回服务端新确认的字节数
    ///
    /// 区间视图的位置与流的偏移量一一对应（都从 0 开始），
    /// 服务端只接收部分数据时，视图回退到确认的偏移量后继续。
    pub async fn copy_from(&mut self, source: &mut SectionReader) -> UploadResult<u64> {
        let start = self.tell();
        if source.position() != start {
            source.seek(start)?;
        }

        loop {
            if let Some(token) = &self.cancel_token {
                if token.is_cancelled() {
                    return Err(UploadError::Cancelled);
                }
            }

            let data = source.read(self.buffer_size).await?;
            if data.is_empty() {
                break;
            }

            let offset = self.tell();
            let new_offset = self.write(data).await?;
            if new_offset == offset {
                // 交给重试或续传预算处理，避免原地重发
                return Err(UploadError::Network(format!(
                    "服务端未接收任何数据: location={}, offset={}",
                    self.session.location, offset
                )));
            }
            if new_offset != source.position() {
                debug!(
                    "服务端只接收了部分数据: location={}, confirmed={}, sent_to={}",
                    self.session.location,
                    new_offset,
                    source.position()
                );
                source.seek(new_offset)?;
            }
        }

        Ok(self.tell() - start)
    }
}
