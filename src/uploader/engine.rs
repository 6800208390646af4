// 上传引擎
//
// 核心功能：
// 1. 分片模式：规划分片 → 并发上传分片会话 → 服务端合并 → 轮询完成
// 2. 顺序模式：单个会话顺序上传，失败后从服务端偏移量续传
// 3. 分片失败时清理已上传的孤立分片会话
//
// 元数据约定：
// - 分片会话只带文件名
// - 最终会话带文件名和目标路径映射

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{UploadConfig, UploadMode};
use crate::filesystem::{RandomAccessSource, SectionReader, SourceFile};
use crate::tus::{
    Metadata, SessionHandle, UploadError, UploadResult, UploadSessionService, UploadStream,
    METADATA_FILENAME,
};
use crate::uploader::{
    plan_chunks, BackoffPolicy, ChunkDescriptor, ChunkWorkerPool, LogRetryNotifier,
    MergeCoordinator, ResumeUploader, RetryExecutor, RetryNotifier,
};

// =====================================================
// 上传引擎
// =====================================================

/// 上传引擎
///
/// 负责单个文件的完整上传过程
pub struct UploadEngine {
    /// 会话服务
    service: Arc<dyn UploadSessionService>,
    /// 上传配置
    config: UploadConfig,
    /// 退避策略
    backoff: Arc<BackoffPolicy>,
    /// 重试通知
    notifier: Arc<dyn RetryNotifier>,
    /// 取消令牌
    cancel_token: CancellationToken,
}

impl UploadEngine {
    pub fn new(
        service: Arc<dyn UploadSessionService>,
        config: UploadConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        let backoff = BackoffPolicy::default().with_max_delay(config.backoff_max());
        Self {
            service,
            config,
            backoff: Arc::new(backoff),
            notifier: Arc::new(LogRetryNotifier),
            cancel_token,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RetryNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 按配置的模式上传
    pub async fn upload(&self, path: impl AsRef<Path>) -> UploadResult<SessionHandle> {
        match self.config.mode {
            UploadMode::Concat => self.upload_by_concat(path).await,
            UploadMode::Sequential => self.upload_sequential(path).await,
        }
    }

    /// 分片并发上传后合并
    pub async fn upload_by_concat(&self, path: impl AsRef<Path>) -> UploadResult<SessionHandle> {
        let path = path.as_ref();
        let file = SourceFile::open(path).await?;
        let file_name = file.file_name();
        let file_size = file.len();

        let chunks = plan_chunks(file_size, self.config.chunk_size)?;
        if chunks.is_empty() {
            // 没有分片可合并
            info!("空文件，改用顺序上传: {:?}", path);
            return self.upload_sequential(path).await;
        }

        info!(
            "开始分片上传: {:?}, 大小={}, 分片数={}, 分片大小={}",
            path,
            file_size,
            chunks.len(),
            self.config.chunk_size
        );
        let started = Instant::now();

        let source: Arc<dyn RandomAccessSource> = Arc::new(file);
        let service = self.service.clone();
        let part_metadata = Metadata::new().with(METADATA_FILENAME, file_name.clone());
        let buffer_size = self.config.write_buffer_size;
        let cancel_token = self.cancel_token.clone();

        let upload_one = move |chunk: ChunkDescriptor| {
            let service = service.clone();
            let source = source.clone();
            let metadata = part_metadata.clone();
            let cancel_token = cancel_token.clone();
            async move {
                let session = service.create_session(chunk.size, true, &metadata).await?;
                info!("[分片#{}] 会话已创建: {}", chunk.index, session.location);

                let mut stream = UploadStream::new(service, session)
                    .with_buffer_size(buffer_size)
                    .with_cancel_token(cancel_token);
                let mut view = chunk.source_view(source);
                stream.copy_from(&mut view).await?;

                if stream.tell() != chunk.size {
                    return Err(UploadError::Protocol(format!(
                        "分片#{} 上传不完整: {}/{}",
                        chunk.index,
                        stream.tell(),
                        chunk.size
                    )));
                }
                Ok(stream.into_session())
            }
        };

        let pool = ChunkWorkerPool::new(self.config.max_concurrent_chunks, self.retry_executor());
        let parts = match pool
            .run_all(chunks, self.config.max_retries, upload_one)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                if let UploadError::PartialUploadFailure { orphans, .. } = &e {
                    self.cleanup_orphans(orphans).await;
                }
                return Err(e);
            }
        };

        let merged = self
            .merge_coordinator()
            .merge_and_await(&parts, &self.final_metadata(&file_name))
            .await?;

        info!(
            "✓ 上传完成: {:?} → {}, 耗时 {:.1} 秒",
            path,
            merged.location,
            started.elapsed().as_secs_f64()
        );
        Ok(merged)
    }

    /// 单会话顺序上传，失败后续传
    pub async fn upload_sequential(&self, path: impl AsRef<Path>) -> UploadResult<SessionHandle> {
        let path = path.as_ref();
        let file = SourceFile::open(path).await?;
        let file_name = file.file_name();
        let file_size = file.len();
        let started = Instant::now();

        let session = self
            .service
            .create_session(file_size, false, &self.final_metadata(&file_name))
            .await?;
        info!(
            "开始顺序上传: {:?} → {}, 大小={}",
            path, session.location, file_size
        );

        let source: Arc<dyn RandomAccessSource> = Arc::new(file);
        let mut reader = SectionReader::whole(source);
        let mut stream = UploadStream::new(self.service.clone(), session)
            .with_buffer_size(self.config.write_buffer_size)
            .with_cancel_token(self.cancel_token.clone());

        ResumeUploader::new(self.cancel_token.clone())
            .with_interval(self.config.resume_interval())
            .upload_with_resume(&mut stream, &mut reader, self.config.resume_attempts)
            .await?;

        let session = stream.into_session();
        info!(
            "✓ 上传完成: {:?} → {}, 耗时 {:.1} 秒",
            path,
            session.location,
            started.elapsed().as_secs_f64()
        );
        Ok(session)
    }

    /// 最终会话的元数据
    fn final_metadata(&self, file_name: &str) -> Metadata {
        let mut metadata = Metadata::new().with(METADATA_FILENAME, file_name);
        if let Some(mapping) = &self.config.mapping {
            metadata.insert(self.config.copy_path_key.clone(), mapping.clone());
        }
        metadata
    }

    fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.backoff.clone(), self.cancel_token.clone())
            .with_notifier(self.notifier.clone())
    }

    fn merge_coordinator(&self) -> MergeCoordinator {
        MergeCoordinator::new(self.service.clone(), self.cancel_token.clone())
            .with_poll_interval(self.config.merge_poll_interval())
            .with_max_wait(self.config.merge_timeout())
    }

    /// 删除已上传但不会被合并的分片会话（失败只记录日志）
    async fn cleanup_orphans(&self, orphans: &[String]) {
        if orphans.is_empty() {
            return;
        }
        if !self.config.cleanup_orphans {
            warn!("保留 {} 个未合并的分片会话: {:?}", orphans.len(), orphans);
            return;
        }

        info!("清理 {} 个未合并的分片会话", orphans.len());
        for location in orphans {
            match self.service.terminate_session(location).await {
                Ok(()) => info!("已删除分片会话: {}", location),
                Err(e) => error!("删除分片会话失败: {}, 错误: {}", location, e),
            }
        }
    }
}
