// 上传分片规划
//
// 把 [0, 文件大小) 划分为固定大小、互不重叠、按序覆盖的分片：
// - 分片序号从 1 开始，按偏移量递增
// - 除最后一个分片外，大小都等于 chunk_size
// - 纯函数，相同输入得到相同结果

use std::ops::Range;
use std::sync::Arc;

use crate::filesystem::{RandomAccessSource, SectionReader};
use crate::tus::{UploadError, UploadResult};

/// 默认分片大小: 1MB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// 分片描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 分片序号（从 1 开始）
    pub index: usize,
    /// 在源文件中的起始偏移量
    pub offset: u64,
    /// 分片大小
    pub size: u64,
}

impl ChunkDescriptor {
    /// 字节范围
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.size
    }

    /// 源文件上对应本分片的独立视图
    pub fn source_view(&self, source: Arc<dyn RandomAccessSource>) -> SectionReader {
        SectionReader::new(source, self.offset, self.size)
    }
}

/// 规划分片
///
/// # 参数
/// * `file_size` - 文件大小，为 0 时返回空列表
/// * `chunk_size` - 分片大小，必须大于 0
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> UploadResult<Vec<ChunkDescriptor>> {
    if chunk_size == 0 {
        return Err(UploadError::InvalidArgument("分片大小必须大于 0".into()));
    }

    let mut chunks = Vec::with_capacity(file_size.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;
    let mut index = 1;

    while offset < file_size {
        let end = std::cmp::min(offset.saturating_add(chunk_size), file_size);
        chunks.push(ChunkDescriptor {
            index,
            offset,
            size: end - offset,
        });
        offset = end;
        index += 1;
    }

    Ok(chunks)
}
