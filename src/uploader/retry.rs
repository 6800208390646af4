// 重试执行器
//
// 顺序执行操作，最多 max_attempts 次：
// - 成功立即返回
// - 遇到中止信号（Abort / Cancelled）立即返回，不消耗剩余次数
// - 其他失败按退避策略等待后重试，最后一次失败后不再等待
// - 次数耗尽返回 RetriesExhausted，记录最后一次错误

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tus::{UploadError, UploadResult};
use crate::uploader::BackoffPolicy;

/// 重试进度通知（仅用于观测，不影响控制流）
pub trait RetryNotifier: Send + Sync {
    /// 第 `attempt` 次（从 1 开始）失败后、等待 `wait` 前调用
    fn on_retry(&self, attempt: u32, max_attempts: u32, wait: Duration, error: &UploadError);
}

/// 输出到日志的通知器
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRetryNotifier;

impl RetryNotifier for LogRetryNotifier {
    fn on_retry(&self, attempt: u32, max_attempts: u32, wait: Duration, error: &UploadError) {
        warn!(
            "重试中... 等待 {:.1} 秒 (第 {}/{} 次): {}",
            wait.as_secs_f64(),
            attempt,
            max_attempts,
            error
        );
    }
}

/// 重试执行器
#[derive(Clone)]
pub struct RetryExecutor {
    policy: Arc<BackoffPolicy>,
    notifier: Arc<dyn RetryNotifier>,
    cancel_token: CancellationToken,
}

impl RetryExecutor {
    pub fn new(policy: Arc<BackoffPolicy>, cancel_token: CancellationToken) -> Self {
        Self {
            policy,
            notifier: Arc::new(LogRetryNotifier),
            cancel_token,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RetryNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// 执行操作
    ///
    /// `max_attempts` 小于 1 时按 1 处理
    pub async fn execute<T, F, Fut>(&self, max_attempts: u32, mut op: F) -> UploadResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = UploadResult<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if self.cancel_token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let error = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("第 {} 次尝试成功", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_abort() => return Err(e),
                Err(e) => e,
            };

            if attempt + 1 < max_attempts {
                let wait = self.policy.wait(attempt);
                self.notifier.on_retry(attempt + 1, max_attempts, wait, &error);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.cancel_token.cancelled() => return Err(UploadError::Cancelled),
                }
            }
            last_error = Some(error);
        }

        Err(UploadError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(
                last_error
                    .unwrap_or_else(|| UploadError::Protocol("没有执行任何尝试".into())),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<(u32, u32, Duration)>>,
    }

    impl RetryNotifier for RecordingNotifier {
        fn on_retry(&self, attempt: u32, max_attempts: u32, wait: Duration, _error: &UploadError) {
            self.events.lock().push((attempt, max_attempts, wait));
        }
    }

    fn executor() -> RetryExecutor {
        RetryExecutor::new(Arc::new(BackoffPolicy::immediate()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_always_failing_runs_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: UploadResult<()> = executor()
            .execute(4, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UploadError::Network("reset".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result.unwrap_err() {
            UploadError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, UploadError::Network(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_abort_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: UploadResult<()> = executor()
            .execute(10, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UploadError::abort(UploadError::Protocol("400".into()))) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let calls = AtomicU32::new(0);
        let notifier = Arc::new(RecordingNotifier::default());
        let result = executor()
            .with_notifier(notifier.clone())
            .execute(5, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(UploadError::ChecksumMismatch {
                            location: "/files/a".into(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let events = notifier.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 1);
        assert_eq!(events[1].0, 2);
        assert_eq!(events[1].1, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_and_no_sleep_after_last() {
        let policy = Arc::new(BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::from_secs(60),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let executor =
            RetryExecutor::new(policy, CancellationToken::new()).with_notifier(notifier.clone());

        let start = tokio::time::Instant::now();
        let result: UploadResult<()> = executor
            .execute(3, || async { Err(UploadError::Network("timeout".into())) })
            .await;
        assert!(result.is_err());

        // 1s + 2s，第三次失败后不再等待
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        let waits: Vec<_> = notifier.events.lock().iter().map(|e| e.2).collect();
        assert_eq!(waits, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let token = CancellationToken::new();
        let executor = RetryExecutor::new(Arc::new(BackoffPolicy::default()), token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let result: UploadResult<()> = executor
            .execute(10, || async { Err(UploadError::Network("down".into())) })
            .await;
        assert!(matches!(result.unwrap_err(), UploadError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_attempts_normalized() {
        let calls = AtomicU32::new(0);
        let result: UploadResult<()> = executor()
            .execute(0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UploadError::Network("x".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            UploadError::RetriesExhausted { attempts: 1, .. }
        ));
    }
}
