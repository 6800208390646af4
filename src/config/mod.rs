// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 上传服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 上传端点（创建会话的地址）
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 单个请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 写入时附带 sha1 校验和（服务端支持时生效）
    #[serde(default = "default_checksum")]
    pub checksum: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/files/".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_checksum() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            checksum: default_checksum(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 上传模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// 并发上传分片后由服务端合并
    #[default]
    Concat,
    /// 单会话顺序上传，失败后续传
    Sequential,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 待上传的文件
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    /// 上传模式
    #[serde(default)]
    pub mode: UploadMode,
    /// 分片大小（字节，默认 1MB）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 最大并发分片数
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
    /// 每个分片的最大尝试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 顺序上传的最大续传次数
    #[serde(default = "default_resume_attempts")]
    pub resume_attempts: u32,
    /// 续传间隔（秒）
    #[serde(default = "default_resume_interval_secs")]
    pub resume_interval_secs: u64,
    /// 单次写入大小（字节，默认 2MB）
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    /// 最大退避延迟（秒）
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// 合并轮询间隔（毫秒）
    #[serde(default = "default_merge_poll_interval_ms")]
    pub merge_poll_interval_ms: u64,
    /// 合并最长等待时间（秒），不设置则一直等待
    #[serde(default = "default_merge_timeout_secs")]
    pub merge_timeout_secs: Option<u64>,
    /// 目标路径映射的元数据键
    #[serde(default = "default_copy_path_key")]
    pub copy_path_key: String,
    /// 目标路径映射（只写入最终会话）
    #[serde(default)]
    pub mapping: Option<String>,
    /// 分片失败后删除已上传的分片会话
    #[serde(default = "default_cleanup_orphans")]
    pub cleanup_orphans: bool,
}

fn default_chunk_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_max_concurrent_chunks() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_resume_attempts() -> u32 {
    10
}

fn default_resume_interval_secs() -> u64 {
    5
}

fn default_write_buffer_size() -> usize {
    2 * 1024 * 1024 // 2MB
}

fn default_backoff_max_secs() -> u64 {
    60
}

fn default_merge_poll_interval_ms() -> u64 {
    1000
}

fn default_merge_timeout_secs() -> Option<u64> {
    Some(3600)
}

fn default_copy_path_key() -> String {
    "Upload-Copy-Path".to_string()
}

fn default_cleanup_orphans() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            mode: UploadMode::default(),
            chunk_size: default_chunk_size(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            max_retries: default_max_retries(),
            resume_attempts: default_resume_attempts(),
            resume_interval_secs: default_resume_interval_secs(),
            write_buffer_size: default_write_buffer_size(),
            backoff_max_secs: default_backoff_max_secs(),
            merge_poll_interval_ms: default_merge_poll_interval_ms(),
            merge_timeout_secs: default_merge_timeout_secs(),
            copy_path_key: default_copy_path_key(),
            mapping: None,
            cleanup_orphans: default_cleanup_orphans(),
        }
    }
}

impl UploadConfig {
    pub fn resume_interval(&self) -> Duration {
        Duration::from_secs(self.resume_interval_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn merge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.merge_poll_interval_ms)
    }

    pub fn merge_timeout(&self) -> Option<Duration> {
        self.merge_timeout_secs.map(Duration::from_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 保留的日志文件数（按天滚动）
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
            max_files: default_log_max_files(),
        }
    }
}

impl AppConfig {
    /// 检查配置是否可用
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.server.base_url)
            .with_context(|| format!("上传端点地址无效: {}", self.server.base_url))?;

        if self.upload.chunk_size == 0 {
            anyhow::bail!("分片大小必须大于 0");
        }
        if self.upload.max_concurrent_chunks == 0 {
            anyhow::bail!("最大并发分片数必须大于 0");
        }
        if self.upload.write_buffer_size == 0 {
            anyhow::bail!("单次写入大小必须大于 0");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 首次启动：写出默认配置方便修改
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload.chunk_size, 1024 * 1024);
        assert_eq!(config.upload.max_concurrent_chunks, 4);
        assert_eq!(config.upload.resume_attempts, 10);
        assert_eq!(config.upload.mode, UploadMode::Concat);
        assert_eq!(config.upload.copy_path_key, "Upload-Copy-Path");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.upload.mode = UploadMode::Sequential;
        config.upload.mapping = Some("/backup/tmp.zip".to_string());
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.upload.mode, UploadMode::Sequential);
        assert_eq!(loaded.upload.mapping.as_deref(), Some("/backup/tmp.zip"));
        assert_eq!(loaded.server.base_url, config.server.base_url);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            base_url = "https://upload.example.com/files/"

            [upload]
            source_path = "tmp.zip"
            mode = "sequential"
            chunk_size = 4194304
            "#,
        )
        .unwrap();

        assert_eq!(config.server.base_url, "https://upload.example.com/files/");
        assert!(config.server.checksum);
        assert_eq!(config.upload.source_path, Some(PathBuf::from("tmp.zip")));
        assert_eq!(config.upload.mode, UploadMode::Sequential);
        assert_eq!(config.upload.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.upload.merge_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.upload.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.max_concurrent_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.upload.chunk_size, 1024 * 1024);
        assert!(std::path::Path::new(path).exists());
    }
}
