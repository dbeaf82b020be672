use std::path::PathBuf;
use thiserror::Error;

/// 视频字幕生成过程中的错误类型
#[derive(Error, Debug)]
pub enum CaptionError {
    /// 视频无法打开或解码
    #[error("无法读取视频源 {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// 目标采样率不小于视频帧率，采样间隔为 0
    #[error("采样率 {target_rate} 对帧率为 {fps:.2} 的视频无效：采样间隔为 0")]
    InvalidSampleRate { fps: f64, target_rate: f64 },

    /// 图像描述模型调用失败
    #[error("帧描述生成失败: {0}")]
    Captioning(String),

    /// 文本总结模型调用失败
    #[error("字幕总结失败: {0}")]
    Summarization(String),

    /// 输出目录或 CSV 文件写入失败
    #[error("写入输出文件失败 {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 提示词文件无法读取
    #[error("读取提示词文件失败 {path}: {source}")]
    PromptUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置无效: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CaptionError>;

impl CaptionError {
    pub(crate) fn source_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CaptionError::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
