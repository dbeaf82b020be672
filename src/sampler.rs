use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{CaptionError, Result};
use crate::frame::Frame;

/// 可以按顺序逐帧解码的视频源
pub trait FrameSource {
    /// 视频报告的帧率
    fn fps(&self) -> f64;

    /// 解码下一帧，视频结束时返回 `Ok(None)`
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// 根据路径打开视频源
///
/// 返回的 `Source` 在被 drop 时释放解码句柄。
pub trait VideoBackend {
    type Source: FrameSource;

    fn open(&self, path: &Path) -> Result<Self::Source>;
}

/// 计算采样间隔：`floor(fps / target_rate)`
///
/// 间隔为 0（目标采样率不小于帧率）时返回 `InvalidSampleRate`。
pub fn sampling_interval(fps: f64, target_rate: f64) -> Result<usize> {
    if !target_rate.is_finite() || target_rate <= 0.0 || !fps.is_finite() || fps <= 0.0 {
        return Err(CaptionError::InvalidSampleRate { fps, target_rate });
    }
    let interval = (fps / target_rate).floor();
    if interval < 1.0 {
        return Err(CaptionError::InvalidSampleRate { fps, target_rate });
    }
    Ok(interval as usize)
}

/// 帧采样器，按目标采样率从视频中挑选帧
pub struct FrameSampler<B> {
    backend: B,
}

impl<B: VideoBackend> FrameSampler<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// 打开视频并按 `target_rate`（每秒帧数）采样
    ///
    /// 视频源在函数返回前释放，无论成功或失败。
    pub fn sample(&self, video_path: &Path, target_rate: f64) -> Result<Vec<Frame>> {
        let mut source = self.backend.open(video_path)?;
        sample_source(&mut source, target_rate)
    }
}

/// 从已打开的视频源中按间隔保留帧：序号 `p` 满足 `p % interval == 0` 时保留
pub fn sample_source<S: FrameSource>(source: &mut S, target_rate: f64) -> Result<Vec<Frame>> {
    let fps = source.fps();
    let interval = sampling_interval(fps, target_rate)?;
    let start = Instant::now();
    debug!("帧率 {:.2} fps，采样率 {:.2} fps，采样间隔 {} 帧", fps, target_rate, interval);

    let mut frames = Vec::new();
    let mut position = 0usize;
    while let Some(frame) = source.next_frame()? {
        if position % interval == 0 {
            frames.push(frame);
        }
        position += 1;
    }

    info!(
        "✅ [抽帧] 解码 {} 帧，保留 {} 帧，耗时: {:.2}秒",
        position,
        frames.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(frames)
}
