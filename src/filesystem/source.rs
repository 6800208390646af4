// 随机读取数据源
//
// 并发分片上传时，所有分片共享同一个文件句柄，
// 但每个 SectionReader 持有自己的读取位置，使用定位读取（pread），
// 互不干扰，不存在共享游标。

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// 支持按偏移量读取的数据源
#[async_trait]
pub trait RandomAccessSource: Send + Sync + fmt::Debug {
    /// 数据总长度
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从 `offset` 读取最多 `len` 字节，到达末尾时返回的数据可能更短
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// 本地文件数据源
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    file: Arc<std::fs::File>,
    len: u64,
}

impl SourceFile {
    /// 打开文件（只读）
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();
        let (file, len) = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&open_path)?;
            let len = file.metadata()?.len();
            Ok::<_, io::Error>((file, len))
        })
        .await
        .map_err(io::Error::other)??;

        debug!("打开上传源文件: {:?}, 大小={} bytes", path, len);

        Ok(Self {
            path,
            file: Arc::new(file),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件名（不含目录）
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RandomAccessSource for SourceFile {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                let n = positional_read(&file, &mut buffer[filled..], offset + filled as u64)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buffer.truncate(filled);
            Ok(buffer)
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[cfg(unix)]
fn positional_read(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positional_read(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// 内存数据源
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(data.into()),
        }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("len", &self.data.len())
            .finish()
    }
}

#[async_trait]
impl RandomAccessSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }
}

/// 数据源上的一个字节区间视图 `[base, base + size)`
///
/// 读取位置相对区间起点，每个视图独立维护
#[derive(Debug, Clone)]
pub struct SectionReader {
    source: Arc<dyn RandomAccessSource>,
    base: u64,
    size: u64,
    position: u64,
}

impl SectionReader {
    /// 创建区间视图，超出数据源末尾的部分会被截断
    pub fn new(source: Arc<dyn RandomAccessSource>, base: u64, size: u64) -> Self {
        let available = source.len().saturating_sub(base);
        Self {
            source,
            base,
            size: size.min(available),
            position: 0,
        }
    }

    /// 覆盖整个数据源的视图
    pub fn whole(source: Arc<dyn RandomAccessSource>) -> Self {
        let len = source.len();
        Self::new(source, 0, len)
    }

    /// 区间长度
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 当前读取位置（相对区间起点）
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.position
    }

    /// 定位到区间内的绝对位置
    pub fn seek(&mut self, position: u64) -> io::Result<u64> {
        if position > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("定位超出区间: position={}, size={}", position, self.size),
            ));
        }
        self.position = position;
        Ok(position)
    }

    /// 读取最多 `max` 字节，区间结束时返回空
    pub async fn read(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let want = (self.remaining().min(max as u64)) as usize;
        if want == 0 {
            return Ok(Vec::new());
        }
        let data = self.source.read_at(self.base + self.position, want).await?;
        if data.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "数据源提前结束: offset={}, expected={} bytes",
                    self.base + self.position,
                    want
                ),
            ));
        }
        self.position += data.len() as u64;
        Ok(data)
    }
}
