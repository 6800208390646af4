// 分片合并
//
// 合并请求只发送一次（不自动重试），服务端异步合并，
// 之后按固定间隔轮询最终会话，直到偏移量等于总大小。

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tus::{Metadata, SessionHandle, UploadError, UploadResult, UploadSessionService};

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 默认最长等待时间
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(3600);

/// 合并协调器
#[derive(Clone)]
pub struct MergeCoordinator {
    service: Arc<dyn UploadSessionService>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    cancel_token: CancellationToken,
}

impl MergeCoordinator {
    pub fn new(service: Arc<dyn UploadSessionService>, cancel_token: CancellationToken) -> Self {
        Self {
            service,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: Some(DEFAULT_MERGE_TIMEOUT),
            cancel_token,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// 设置最长等待时间，`None` 表示一直等待（仍可取消）
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// 请求合并并等待完成
    ///
    /// # 参数
    /// * `parts` - 按分片序号排列的分片会话
    /// * `metadata` - 最终会话的元数据
    ///
    /// # 返回
    /// 合并完成后的最终会话
    pub async fn merge_and_await(
        &self,
        parts: &[SessionHandle],
        metadata: &Metadata,
    ) -> UploadResult<SessionHandle> {
        if self.cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let merged = self.service.concatenate_sessions(parts, metadata).await?;
        info!(
            "已请求合并 {} 个分片: location={}",
            parts.len(),
            merged.location
        );

        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let session = self.service.get_session(&merged.location).await?;
            polls += 1;

            if session.is_complete() {
                info!(
                    "✓ 合并完成: location={}, 大小={:?}, 轮询 {} 次",
                    session.location, session.remote_size, polls
                );
                return Ok(session);
            }

            debug!(
                "等待合并: location={}, offset={:?}, size={:?}",
                session.location, session.remote_offset, session.remote_size
            );

            if let Some(max_wait) = self.max_wait {
                let waited = start.elapsed();
                if waited >= max_wait {
                    warn!("合并超时: location={}, 已等待 {:?}", merged.location, waited);
                    return Err(UploadError::MergeTimeout {
                        location: merged.location,
                        waited,
                    });
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel_token.cancelled() => return Err(UploadError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tus::testing::MockSessionService;
    use std::sync::atomic::Ordering;

    async fn complete_parts(mock: &MockSessionService, parts: &[&[u8]]) -> Vec<SessionHandle> {
        let mut handles = Vec::new();
        for data in parts {
            let meta = Metadata::new().with("filename", "part.bin");
            let mut session = mock
                .create_session(data.len() as u64, true, &meta)
                .await
                .unwrap();
            let offset = mock
                .write_at(&session.location, 0, data.to_vec())
                .await
                .unwrap();
            session.remote_offset = Some(offset);
            handles.push(session);
        }
        handles
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_offsets_match() {
        let mock = Arc::new(MockSessionService::new());
        let parts = complete_parts(&mock, &[b"hello ".as_slice(), b"world".as_slice()]).await;
        mock.script_polls(vec![(None, None), (None, Some(11)), (Some(11), Some(11))]);

        let meta = Metadata::new()
            .with("filename", "hello.txt")
            .with("Upload-Copy-Path", "/dest/hello.txt");
        let start = Instant::now();
        let merged = MergeCoordinator::new(mock.clone(), CancellationToken::new())
            .merge_and_await(&parts, &meta)
            .await
            .unwrap();

        assert_eq!(mock.get_calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), DEFAULT_POLL_INTERVAL * 2);
        assert!(merged.is_complete());
        assert_eq!(mock.content(&merged.location), b"hello world");
        assert_eq!(
            mock.metadata(&merged.location).unwrap().get("Upload-Copy-Path"),
            Some("/dest/hello.txt")
        );
        assert_eq!(
            mock.concatenations(),
            vec![vec![parts[0].location.clone(), parts[1].location.clone()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait() {
        let mock = Arc::new(MockSessionService::new());
        let parts = complete_parts(&mock, &[b"abc".as_slice()]).await;
        mock.script_polls(vec![(None, Some(3)); 100]);

        let err = MergeCoordinator::new(mock.clone(), CancellationToken::new())
            .with_max_wait(Some(Duration::from_secs(5)))
            .merge_and_await(&parts, &Metadata::new())
            .await
            .unwrap_err();

        match err {
            UploadError::MergeTimeout { waited, .. } => assert_eq!(waited, Duration::from_secs(5)),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(mock.get_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_polling() {
        let mock = Arc::new(MockSessionService::new());
        let parts = complete_parts(&mock, &[b"abc".as_slice()]).await;
        mock.script_polls(vec![(None, None); 100]);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let err = MergeCoordinator::new(mock.clone(), token)
            .with_max_wait(None)
            .merge_and_await(&parts, &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(mock.get_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concatenate_failure_is_not_retried() {
        let mock = Arc::new(MockSessionService::new());
        // 分片未写完，服务端拒绝合并
        let session = mock
            .create_session(10, true, &Metadata::new())
            .await
            .unwrap();

        let err = MergeCoordinator::new(mock.clone(), CancellationToken::new())
            .merge_and_await(&[session], &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));
        assert_eq!(mock.get_calls.load(Ordering::SeqCst), 0);
    }
}
