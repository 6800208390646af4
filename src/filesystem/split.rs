// 文件拆分工具
//
// 把一个文件拆成两个片段，与上传路径共用顺序区间复制

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

/// 拆分结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub part1: PathBuf,
    pub part1_size: u64,
    pub part2: PathBuf,
    pub part2_size: u64,
}

/// 从 `reader` 当前位置顺序复制 `len` 字节到 `writer`
async fn copy_range(reader: &mut File, writer: &mut File, len: u64) -> Result<u64> {
    let mut limited = reader.take(len);
    let copied = tokio::io::copy(&mut limited, writer)
        .await
        .context("复制文件区间失败")?;
    if copied != len {
        anyhow::bail!("源文件提前结束: 期望 {} 字节, 实际 {} 字节", len, copied);
    }
    writer.flush().await.context("刷新分片文件失败")?;
    Ok(copied)
}

/// 在 `split_at` 处把文件拆为两部分
///
/// # 参数
/// * `input` - 原始文件
/// * `part1` - 第一部分 `[0, split_at)`
/// * `part2` - 第二部分 `[split_at, 文件大小)`
/// * `split_at` - 拆分位置，必须在 (0, 文件大小) 之间
pub async fn split_file(
    input: impl AsRef<Path>,
    part1: impl AsRef<Path>,
    part2: impl AsRef<Path>,
    split_at: u64,
) -> Result<SplitReport> {
    let input = input.as_ref();
    let part1 = part1.as_ref();
    let part2 = part2.as_ref();

    let mut file = File::open(input)
        .await
        .with_context(|| format!("打开原始文件失败: {:?}", input))?;
    let total_size = file
        .metadata()
        .await
        .context("读取文件信息失败")?
        .len();

    if split_at == 0 || split_at >= total_size {
        anyhow::bail!(
            "split_at 必须在 (0, 文件大小) 之间，当前文件大小：{}",
            total_size
        );
    }

    let mut out1 = File::create(part1)
        .await
        .with_context(|| format!("创建分片文件失败: {:?}", part1))?;
    let part1_size = copy_range(&mut file, &mut out1, split_at).await?;

    let mut out2 = File::create(part2)
        .await
        .with_context(|| format!("创建分片文件失败: {:?}", part2))?;
    let part2_size = copy_range(&mut file, &mut out2, total_size - split_at).await?;

    info!(
        "文件已拆分为两部分: {:?} ({} 字节), {:?} ({} 字节)",
        part1, part1_size, part2, part2_size
    );

    Ok(SplitReport {
        part1: part1.to_path_buf(),
        part1_size,
        part2: part2.to_path_buf(),
        part2_size,
    })
}

/// 从中间拆分
pub async fn split_in_half(
    input: impl AsRef<Path>,
    part1: impl AsRef<Path>,
    part2: impl AsRef<Path>,
) -> Result<SplitReport> {
    let size = tokio::fs::metadata(input.as_ref())
        .await
        .with_context(|| format!("读取文件信息失败: {:?}", input.as_ref()))?
        .len();
    split_file(input, part1, part2, size / 2).await
}
