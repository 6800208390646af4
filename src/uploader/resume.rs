// 断点续传上传器
//
// 驱动单个长会话上传到结束：
// - 每次尝试前向服务端同步偏移量，并把源视图定位到该偏移量
// - 网络错误 / 校验失败后固定间隔等待再续传
// - 其他错误立即返回
// - 已确认的字节不会重复发送

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::filesystem::SectionReader;
use crate::tus::{UploadError, UploadResult, UploadStream};

/// 默认续传次数
pub const DEFAULT_RESUME_ATTEMPTS: u32 = 10;

/// 默认续传间隔
pub const DEFAULT_RESUME_INTERVAL: Duration = Duration::from_secs(5);

/// 断点续传上传器
#[derive(Debug, Clone)]
pub struct ResumeUploader {
    interval: Duration,
    cancel_token: CancellationToken,
}

impl ResumeUploader {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            interval: DEFAULT_RESUME_INTERVAL,
            cancel_token,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 上传源视图剩余部分，失败后从服务端确认的偏移量续传
    ///
    /// # 参数
    /// * `stream` - 写入流（可以是已部分写入的会话）
    /// * `source` - 源数据视图，位置与流偏移量对应
    /// * `max_attempts` - 首次失败后最多续传次数
    ///
    /// # 返回
    /// 上传完成后服务端确认的偏移量
    pub async fn upload_with_resume(
        &self,
        stream: &mut UploadStream,
        source: &mut SectionReader,
        max_attempts: u32,
    ) -> UploadResult<u64> {
        let location = stream.session().location.clone();
        let mut last_error = None;

        for attempt in 0..=max_attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = self.cancel_token.cancelled() => return Err(UploadError::Cancelled),
                }
            }
            if self.cancel_token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let result: UploadResult<u64> = async {
                // 以服务端偏移量为准，而不是本地读取位置
                let offset = stream.sync().await?;
                source.seek(offset)?;
                if attempt > 0 {
                    info!(
                        "续传: location={}, 从偏移量 {} 继续 (共 {} 字节)",
                        location,
                        offset,
                        source.len()
                    );
                }
                stream.copy_from(source).await
            }
            .await;

            match result {
                Ok(_) => {
                    info!("上传完成: location={}, 大小={}", location, stream.tell());
                    return Ok(stream.tell());
                }
                Err(e) if e.is_retryable() => {
                    if attempt < max_attempts {
                        warn!(
                            "上传中断: {}，{:.1} 秒后续传 (第 {}/{} 次)",
                            e,
                            self.interval.as_secs_f64(),
                            attempt + 1,
                            max_attempts
                        );
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(UploadError::RetriesExhausted {
            attempts: max_attempts + 1,
            last: Box::new(
                last_error
                    .unwrap_or_else(|| UploadError::Protocol("没有执行任何尝试".into())),
            ),
        })
    }
}
