// 本地文件访问模块
//
// - 随机读取数据源与独立游标的区间视图
// - 文件拆分工具

pub mod source;
pub mod split;

pub use source::{MemorySource, RandomAccessSource, SectionReader, SourceFile};
pub use split::{split_file, split_in_half, SplitReport};
