// 并发分片上传池
//
// 并发上传策略：
// - 使用 Semaphore 控制最大并发分片数，按规划顺序获取许可
// - 使用 JoinSet 管理并发任务，全部完成后才返回
// - 结果按传入位置写入预分配槽位，与完成顺序无关
// - 任一分片重试耗尽后记录到 FailureCell：
//   之后开始的分片直接跳过，正在上传的分片不会被中断，合并被放弃

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::tus::{SessionHandle, UploadError, UploadResult};
use crate::uploader::{ChunkDescriptor, RetryExecutor};

/// 默认最大并发分片数
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 4;

/// 首个失败记录（只写一次）
#[derive(Debug, Default)]
pub struct FailureCell {
    failed: AtomicBool,
    first: Mutex<Option<(usize, UploadError)>>,
}

impl FailureCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已有分片失败
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// 记录失败，返回是否为第一个失败
    pub fn record(&self, index: usize, error: UploadError) -> bool {
        let mut first = self.first.lock();
        self.failed.store(true, Ordering::SeqCst);
        if first.is_none() {
            *first = Some((index, error));
            true
        } else {
            false
        }
    }

    /// 取出第一个失败
    pub fn take(&self) -> Option<(usize, UploadError)> {
        self.first.lock().take()
    }
}

/// 单个分片任务的结果
enum JobOutcome {
    Uploaded(SessionHandle),
    Skipped,
    Failed,
}

/// 并发分片上传池
#[derive(Clone)]
pub struct ChunkWorkerPool {
    concurrency_limit: usize,
    retry: RetryExecutor,
}

impl ChunkWorkerPool {
    /// 创建上传池
    ///
    /// `concurrency_limit` 小于 1 时按 1 处理
    pub fn new(concurrency_limit: usize, retry: RetryExecutor) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            retry,
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// 并发上传所有分片，返回按分片序号排列的会话列表
    ///
    /// # 参数
    /// * `chunks` - 待上传的分片（序号从 1 开始，可以不连续）
    /// * `retries` - 每个分片的最大尝试次数
    /// * `upload_one` - 上传单个分片；可重试错误由重试执行器处理，其余错误立即失败
    ///
    /// # 返回
    /// 按传入顺序排列的会话列表
    pub async fn run_all<F, Fut>(
        &self,
        chunks: Vec<ChunkDescriptor>,
        retries: u32,
        upload_one: F,
    ) -> UploadResult<Vec<SessionHandle>>
    where
        F: Fn(ChunkDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UploadResult<SessionHandle>> + Send + 'static,
    {
        if let Some(chunk) = chunks.iter().find(|c| c.index == 0) {
            return Err(UploadError::InvalidArgument(format!(
                "分片序号必须从 1 开始: offset={}, size={}",
                chunk.offset, chunk.size
            )));
        }

        let total = chunks.len();
        let total_bytes: u64 = chunks.iter().map(|c| c.size).sum();

        info!(
            "[并发上传] 开始上传 {} 个分片，并发数: {}",
            total, self.concurrency_limit
        );

        // 信号量控制并发数
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let failure = Arc::new(FailureCell::new());
        let upload_one = Arc::new(upload_one);
        let cancel_token = self.retry.cancel_token().clone();

        // 进度计数
        let completed_chunks = Arc::new(AtomicUsize::new(0));
        let uploaded_bytes = Arc::new(AtomicU64::new(0));

        // JoinSet 管理并发任务
        let mut join_set: JoinSet<(usize, JobOutcome)> = JoinSet::new();

        for (position, chunk) in chunks.into_iter().enumerate() {
            // 按规划顺序获取许可，满时等待有分片完成
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = cancel_token.cancelled() => {
                    failure.record(chunk.index, UploadError::Cancelled);
                    break;
                }
            };

            let failure = failure.clone();
            let upload_one = upload_one.clone();
            let retry = self.retry.clone();
            let completed_chunks = completed_chunks.clone();
            let uploaded_bytes = uploaded_bytes.clone();

            join_set.spawn(async move {
                // 已有分片失败，跳过（不创建会话）
                if failure.is_failed() {
                    debug!("[分片#{}] 已有分片失败，跳过", chunk.index);
                    drop(permit);
                    return (position, JobOutcome::Skipped);
                }

                debug!(
                    "[分片#{}] 开始上传 (范围: {}-{}, 大小: {} bytes)",
                    chunk.index,
                    chunk.offset,
                    chunk.offset + chunk.size,
                    chunk.size
                );

                let result = retry
                    .execute(retries, || {
                        let upload_one = upload_one.clone();
                        async move { upload_one(chunk).await.map_err(UploadError::into_abortable) }
                    })
                    .await;

                let outcome = match result {
                    Ok(session) => {
                        let done = completed_chunks.fetch_add(1, Ordering::SeqCst) + 1;
                        let bytes = uploaded_bytes.fetch_add(chunk.size, Ordering::SeqCst)
                            + chunk.size;
                        info!(
                            "[分片#{}] ✓ 上传成功 ({}/{} 完成, {}/{} bytes)",
                            chunk.index, done, total, bytes, total_bytes
                        );
                        JobOutcome::Uploaded(session)
                    }
                    Err(e) => {
                        error!("[分片#{}] 上传失败: {}", chunk.index, e);
                        failure.record(chunk.index, e);
                        JobOutcome::Failed
                    }
                };

                // 记录结果后再释放许可，保证之后开始的分片能看到失败
                drop(permit);
                (position, outcome)
            });
        }

        // 等待所有任务完成
        let mut slots: Vec<Option<SessionHandle>> = vec![None; total];
        let mut failed = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, JobOutcome::Uploaded(session))) => slots[position] = Some(session),
                Ok((_, JobOutcome::Skipped)) => {}
                Ok((_, JobOutcome::Failed)) => failed += 1,
                Err(e) => {
                    // 任务 panic
                    error!("分片任务异常: {}", e);
                    failure.record(0, UploadError::Protocol(format!("分片任务异常: {}", e)));
                    failed += 1;
                }
            }
        }

        let uploaded: Vec<SessionHandle> = slots.into_iter().flatten().collect();

        if failure.is_failed() {
            let (index, first) = failure
                .take()
                .unwrap_or((0, UploadError::Protocol("分片上传错误".into())));
            // 调度中途取消时，未开始的分片也计入跳过
            let skipped = total - uploaded.len() - failed;
            warn!(
                "[并发上传] 分片#{} 失败，放弃合并: 成功={}, 失败={}, 跳过={}",
                index,
                uploaded.len(),
                failed,
                skipped
            );
            return Err(UploadError::PartialUploadFailure {
                failed,
                skipped,
                total,
                orphans: uploaded.into_iter().map(|s| s.location).collect(),
                first: Box::new(first),
            });
        }

        info!("[并发上传] 所有 {} 个分片上传完成", total);
        Ok(uploaded)
    }
}
