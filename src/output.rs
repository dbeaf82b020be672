use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CaptionError, Result};

/// 单个视频的最终字幕
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionRecord {
    /// 视频文件名（含扩展名）
    pub filename: String,
    /// 总结后的字幕
    pub caption: String,
}

/// CSV 表头
pub const CSV_HEADER: [&str; 2] = ["filename", "caption"];

/// 把全部字幕写入 CSV，覆盖已有文件
///
/// 父目录不存在时自动创建。没有记录时只写表头。
pub fn write_captions_csv(path: &Path, records: &[CaptionRecord]) -> Result<()> {
    let io_error = |source: std::io::Error| CaptionError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)
        .map_err(|e| io_error(e.into()))?;

    writer.write_record(CSV_HEADER).map_err(|e| io_error(e.into()))?;
    for record in records {
        writer
            .write_record([record.filename.as_str(), record.caption.as_str()])
            .map_err(|e| io_error(e.into()))?;
    }
    writer.flush().map_err(io_error)?;

    Ok(())
}
