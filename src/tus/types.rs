// 上传会话类型定义

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::tus::{UploadError, UploadResult};

/// 文件名元数据键
pub const METADATA_FILENAME: &str = "filename";

/// 上传元数据（有序键值对，创建时设置，之后不可变）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入键值对，已存在的键会被覆盖（保持原位置）
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// 链式插入
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 编码为 `Upload-Metadata` 头格式：`key base64(value)`，逗号分隔
    pub fn to_header(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{} {}", k, STANDARD.encode(v.as_bytes()))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// 解析 `Upload-Metadata` 头
    pub fn from_header(header: &str) -> UploadResult<Self> {
        let mut metadata = Metadata::new();
        for pair in header.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut parts = pair.splitn(2, ' ');
            let key = parts.next().unwrap_or_default();
            let value = match parts.next() {
                Some(encoded) => {
                    let raw = STANDARD.decode(encoded.trim()).map_err(|e| {
                        UploadError::Protocol(format!("元数据 {} 解码失败: {}", key, e))
                    })?;
                    String::from_utf8(raw).map_err(|e| {
                        UploadError::Protocol(format!("元数据 {} 不是 UTF-8: {}", key, e))
                    })?
                }
                None => String::new(),
            };
            metadata.insert(key, value);
        }
        Ok(metadata)
    }
}

/// 远程上传会话
///
/// `location` 由服务端在创建时分配，之后不变；
/// `remote_offset` 为服务端确认已接收的字节数，单调不减；
/// 合并完成前 `remote_offset` / `remote_size` 可能未知（`None`）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHandle {
    /// 会话地址
    pub location: String,
    /// 服务端确认的偏移量
    pub remote_offset: Option<u64>,
    /// 声明的总大小
    pub remote_size: Option<u64>,
    /// 是否为分片会话（待合并）
    pub partial: bool,
    /// 元数据
    pub metadata: Metadata,
}

impl SessionHandle {
    pub fn new(location: impl Into<String>, remote_size: Option<u64>) -> Self {
        Self {
            location: location.into(),
            remote_offset: Some(0),
            remote_size,
            partial: false,
            metadata: Metadata::new(),
        }
    }

    /// 服务端是否已接收全部数据（合并完成判定）
    pub fn is_complete(&self) -> bool {
        match (self.remote_offset, self.remote_size) {
            (Some(offset), Some(size)) => offset == size,
            _ => false,
        }
    }
}

/// 服务端能力
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// 支持的协议版本
    pub versions: Vec<String>,
    /// 支持的扩展（creation、concatenation、checksum、termination ...）
    pub extensions: Vec<String>,
    /// 支持的校验算法
    pub checksum_algorithms: Vec<String>,
    /// 最大上传大小
    pub max_size: Option<u64>,
}

impl Capabilities {
    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn supports_checksum(&self, algorithm: &str) -> bool {
        self.supports("checksum")
            && self
                .checksum_algorithms
                .iter()
                .any(|a| a.eq_ignore_ascii_case(algorithm))
    }
}
