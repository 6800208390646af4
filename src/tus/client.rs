// tus 1.0.0 协议客户端
//
// 只负责单个请求的收发与错误分类，重试与编排由 uploader 模块负责

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode, Url};
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::tus::{
    Capabilities, Metadata, SessionHandle, UploadError, UploadResult, UploadSessionService,
};

/// 协议版本
pub const TUS_VERSION: &str = "1.0.0";

const HEADER_TUS_RESUMABLE: &str = "Tus-Resumable";
const HEADER_TUS_VERSION: &str = "Tus-Version";
const HEADER_TUS_EXTENSION: &str = "Tus-Extension";
const HEADER_TUS_MAX_SIZE: &str = "Tus-Max-Size";
const HEADER_TUS_CHECKSUM_ALGORITHM: &str = "Tus-Checksum-Algorithm";
const HEADER_UPLOAD_OFFSET: &str = "Upload-Offset";
const HEADER_UPLOAD_LENGTH: &str = "Upload-Length";
const HEADER_UPLOAD_METADATA: &str = "Upload-Metadata";
const HEADER_UPLOAD_CONCAT: &str = "Upload-Concat";
const HEADER_UPLOAD_CHECKSUM: &str = "Upload-Checksum";

const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// 服务端校验和不匹配状态码（tus checksum 扩展）
const STATUS_CHECKSUM_MISMATCH: u16 = 460;

/// tus 客户端
#[derive(Debug, Clone)]
pub struct TusClient {
    /// HTTP客户端
    client: Client,
    /// 创建端点，例如 `http://127.0.0.1:8080/files/`
    base_url: Url,
    /// 是否发送 `Upload-Checksum`
    checksum: bool,
}

impl TusClient {
    /// 创建客户端
    ///
    /// # 参数
    /// * `base_url` - 创建端点
    /// * `timeout` - 单个请求超时
    pub fn new(base_url: &str, timeout: Duration) -> UploadResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            UploadError::InvalidArgument(format!("无效的端点 {}: {}", base_url, e))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Protocol(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("初始化 tus 客户端: endpoint={}", base_url);

        Ok(Self {
            client,
            base_url,
            checksum: false,
        })
    }

    /// 启用 sha1 校验和
    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// 查询服务端能力（OPTIONS）
    pub async fn update_capabilities(&self) -> UploadResult<Capabilities> {
        let response = self
            .client
            .request(reqwest::Method::OPTIONS, self.base_url.clone())
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "查询服务端能力", self.base_url.as_str()));
        }

        let headers = response.headers();
        let capabilities = Capabilities {
            versions: header_list(headers, HEADER_TUS_VERSION),
            extensions: header_list(headers, HEADER_TUS_EXTENSION),
            checksum_algorithms: header_list(headers, HEADER_TUS_CHECKSUM_ALGORITHM),
            max_size: header_u64(headers, HEADER_TUS_MAX_SIZE)?,
        };

        info!(
            "服务端能力: versions={:?}, extensions={:?}, checksum={:?}",
            capabilities.versions, capabilities.extensions, capabilities.checksum_algorithms
        );

        Ok(capabilities)
    }

    /// 把 `Location` 解析为绝对地址
    fn resolve_location(&self, headers: &HeaderMap) -> UploadResult<String> {
        let raw = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| UploadError::Protocol("响应缺少 Location 头".into()))?;

        self.base_url
            .join(raw)
            .map(|u| u.to_string())
            .map_err(|e| UploadError::Protocol(format!("无效的 Location {}: {}", raw, e)))
    }

    fn location_url(&self, location: &str) -> UploadResult<Url> {
        self.base_url.join(location).map_err(|e| {
            UploadError::InvalidArgument(format!("无效的会话地址 {}: {}", location, e))
        })
    }
}

#[async_trait]
impl UploadSessionService for TusClient {
    async fn create_session(
        &self,
        size: u64,
        partial: bool,
        metadata: &Metadata,
    ) -> UploadResult<SessionHandle> {
        let mut request = self
            .client
            .post(self.base_url.clone())
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .header(HEADER_UPLOAD_LENGTH, size.to_string());

        if partial {
            request = request.header(HEADER_UPLOAD_CONCAT, "partial");
        }
        if !metadata.is_empty() {
            request = request.header(HEADER_UPLOAD_METADATA, metadata.to_header());
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(status_error(status, "创建会话", self.base_url.as_str()));
        }

        let location = self.resolve_location(response.headers())?;
        info!(
            "创建会话成功: location={}, size={}, partial={}",
            location, size, partial
        );

        Ok(SessionHandle {
            location,
            remote_offset: Some(0),
            remote_size: Some(size),
            partial,
            metadata: metadata.clone(),
        })
    }

    async fn write_at(&self, location: &str, offset: u64, data: Vec<u8>) -> UploadResult<u64> {
        let url = self.location_url(location)?;
        let len = data.len();

        let mut request = self
            .client
            .patch(url)
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .header(HEADER_UPLOAD_OFFSET, offset.to_string())
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM);

        if self.checksum {
            let digest = Sha1::digest(&data);
            request = request.header(
                HEADER_UPLOAD_CHECKSUM,
                format!("sha1 {}", STANDARD.encode(digest)),
            );
        }

        let response = request.body(data).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "写入数据", location));
        }

        let new_offset = header_u64(response.headers(), HEADER_UPLOAD_OFFSET)?
            .ok_or_else(|| UploadError::Protocol("写入响应缺少 Upload-Offset 头".into()))?;

        debug!(
            "写入数据: location={}, offset={}, size={}, new_offset={}",
            location, offset, len, new_offset
        );

        Ok(new_offset)
    }

    async fn get_session(&self, location: &str) -> UploadResult<SessionHandle> {
        let url = self.location_url(location)?;
        let response = self
            .client
            .head(url)
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "查询会话", location));
        }

        let headers = response.headers();
        let metadata = match header_str(headers, HEADER_UPLOAD_METADATA) {
            Some(raw) => Metadata::from_header(raw)?,
            None => Metadata::new(),
        };
        let partial = header_str(headers, HEADER_UPLOAD_CONCAT)
            .map(|v| v.trim() == "partial")
            .unwrap_or(false);

        Ok(SessionHandle {
            location: location.to_string(),
            remote_offset: header_u64(headers, HEADER_UPLOAD_OFFSET)?,
            remote_size: header_u64(headers, HEADER_UPLOAD_LENGTH)?,
            partial,
            metadata,
        })
    }

    async fn concatenate_sessions(
        &self,
        parts: &[SessionHandle],
        metadata: &Metadata,
    ) -> UploadResult<SessionHandle> {
        if parts.is_empty() {
            return Err(UploadError::InvalidArgument("合并列表为空".into()));
        }

        let concat = format!(
            "final;{}",
            parts
                .iter()
                .map(|p| p.location.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut request = self
            .client
            .post(self.base_url.clone())
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .header(HEADER_UPLOAD_CONCAT, concat);
        if !metadata.is_empty() {
            request = request.header(HEADER_UPLOAD_METADATA, metadata.to_header());
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(status_error(status, "合并会话", self.base_url.as_str()));
        }

        let location = self.resolve_location(response.headers())?;
        info!("合并请求成功: location={}, parts={}", location, parts.len());

        Ok(SessionHandle {
            location,
            remote_offset: None,
            remote_size: None,
            partial: false,
            metadata: metadata.clone(),
        })
    }

    async fn terminate_session(&self, location: &str) -> UploadResult<()> {
        let url = self.location_url(location)?;
        let response = self
            .client
            .delete(url)
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "终止会话", location));
        }
        debug!("终止会话: location={}", location);
        Ok(())
    }
}

/// 传输层错误分类
fn transport_error(error: reqwest::Error) -> UploadError {
    if error.is_builder() {
        UploadError::Protocol(format!("构建请求失败: {}", error))
    } else if let Some(status) = error.status() {
        status_error(status, "请求", error.url().map(|u| u.as_str()).unwrap_or(""))
    } else {
        // 连接、超时、请求体、响应体错误都视为暂时性网络错误
        UploadError::Network(error.to_string())
    }
}

/// HTTP 状态码分类
fn status_error(status: StatusCode, action: &str, location: &str) -> UploadError {
    let code = status.as_u16();
    if code == STATUS_CHECKSUM_MISMATCH {
        return UploadError::ChecksumMismatch {
            location: location.to_string(),
        };
    }

    let message = format!("{}失败: status={}, location={}", action, status, location);
    match code {
        408 | 423 | 429 | 500..=599 => {
            warn!("{}（可重试）", message);
            UploadError::Network(message)
        }
        _ => UploadError::Protocol(message),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_u64(headers: &HeaderMap, name: &str) -> UploadResult<Option<u64>> {
    match header_str(headers, name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| UploadError::Protocol(format!("无效的 {} 头 {:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}

fn header_list(headers: &HeaderMap, name: &str) -> Vec<String> {
    header_str(headers, name)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
