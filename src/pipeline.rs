use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::captioner::ImageCaptioner;
use crate::error::Result;
use crate::sampler::{FrameSampler, VideoBackend};

/// 单个视频的字幕流水线：抽帧，然后逐帧生成描述
pub struct CaptionPipeline<B, C> {
    sampler: FrameSampler<B>,
    captioner: C,
}

impl<B: VideoBackend, C: ImageCaptioner> CaptionPipeline<B, C> {
    pub fn new(backend: B, captioner: C) -> Self {
        Self {
            sampler: FrameSampler::new(backend),
            captioner,
        }
    }

    pub fn captioner(&self) -> &C {
        &self.captioner
    }

    /// 返回每个采样帧的描述，顺序与采样顺序一致
    ///
    /// 任意一帧描述失败都会使整个调用失败。
    pub async fn run(&self, video_path: &Path, target_rate: f64) -> Result<Vec<String>> {
        let extract_start = Instant::now();
        info!("⏳ [字幕生成] 正在提取视频帧（采样率: {:.1} fps）: {}", target_rate, video_path.display());
        let frames = self.sampler.sample(video_path, target_rate)?;
        info!(
            "✅ [字幕生成] 提取视频帧完成，共 {} 帧，耗时: {:.2}秒",
            frames.len(),
            extract_start.elapsed().as_secs_f64()
        );

        let caption_start = Instant::now();
        let total = frames.len();
        let mut captions = Vec::with_capacity(total);
        for (i, frame) in frames.iter().enumerate() {
            info!("📝 [字幕生成] 正在描述第 {}/{} 帧", i + 1, total);
            let caption = self.captioner.caption(frame).await?;
            debug!("  • 帧 {} ({:?}s): {}", frame.index, frame.timestamp, caption);
            captions.push(caption);
        }

        let elapsed = caption_start.elapsed();
        let avg_frame_time = if total > 0 {
            elapsed.as_millis() as f64 / total as f64
        } else {
            0.0
        };
        info!(
            "✅ [字幕生成] 帧描述完成，耗时: {:.2}秒，平均每帧: {:.2}ms",
            elapsed.as_secs_f64(),
            avg_frame_time
        );

        Ok(captions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptionError;
    use crate::frame::Frame;
    use crate::sampler::tests::SyntheticSource;
    use std::cell::Cell;

    struct FixedBackend {
        fps: f64,
        total: usize,
    }

    impl VideoBackend for FixedBackend {
        type Source = SyntheticSource;

        fn open(&self, _path: &Path) -> Result<SyntheticSource> {
            Ok(SyntheticSource::new(self.fps, self.total))
        }
    }

    /// 用帧序号作为描述，第 `fail_on` 次调用时失败
    struct IndexCaptioner {
        calls: Cell<usize>,
        fail_on: Option<usize>,
    }

    impl ImageCaptioner for IndexCaptioner {
        async fn caption(&self, frame: &Frame) -> Result<String> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            if self.fail_on == Some(call) {
                return Err(CaptionError::Captioning("device out of memory".to_string()));
            }
            Ok(format!("frame {}", frame.index))
        }
    }

    #[tokio::test]
    async fn test_captions_follow_sampling_order() {
        let pipeline = CaptionPipeline::new(
            FixedBackend { fps: 10.0, total: 35 },
            IndexCaptioner { calls: Cell::new(0), fail_on: None },
        );
        let captions = pipeline.run(Path::new("clip.mp4"), 1.0).await.unwrap();
        assert_eq!(captions, vec!["frame 0", "frame 10", "frame 20", "frame 30"]);
        assert_eq!(pipeline.captioner().calls.get(), 4);
    }

    #[tokio::test]
    async fn test_single_frame_failure_fails_whole_run() {
        let pipeline = CaptionPipeline::new(
            FixedBackend { fps: 10.0, total: 35 },
            IndexCaptioner { calls: Cell::new(0), fail_on: Some(2) },
        );
        let result = pipeline.run(Path::new("clip.mp4"), 1.0).await;
        assert!(matches!(result, Err(CaptionError::Captioning(_))));
        // 失败后不再继续描述后续帧
        assert_eq!(pipeline.captioner().calls.get(), 3);
    }

    #[tokio::test]
    async fn test_empty_video_yields_no_captions() {
        let pipeline = CaptionPipeline::new(
            FixedBackend { fps: 25.0, total: 0 },
            IndexCaptioner { calls: Cell::new(0), fail_on: None },
        );
        let captions = pipeline.run(Path::new("empty.mp4"), 1.0).await.unwrap();
        assert!(captions.is_empty());
    }
}
