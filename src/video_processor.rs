use ffmpeg_next as ffmpeg;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CaptionError, Result};
use crate::frame::Frame;
use crate::sampler::{FrameSource, VideoBackend};

/// 基于 FFmpeg 的视频解码后端
#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(|e| CaptionError::Config(format!("初始化 FFmpeg 失败: {}", e)))?;

        // 只显示错误和致命错误
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        Ok(Self)
    }
}

impl VideoBackend for FfmpegBackend {
    type Source = VideoProcessor;

    fn open(&self, path: &Path) -> Result<VideoProcessor> {
        VideoProcessor::open(path)
    }
}

/// 视频处理器，负责顺序解码视频并把每一帧转换为 RGB 图像
///
/// 持有输入上下文和解码器，drop 时一并释放。
pub struct VideoProcessor {
    path: PathBuf,
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    fps: f64,
    position: usize,
    eof_sent: bool,
}

impl VideoProcessor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |reason: String| CaptionError::source_unavailable(&path, reason);

        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| unavailable(format!("无法打开视频文件: {}", e)))?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| unavailable("未找到视频流".to_string()))?;

        let stream_index = video_stream.index();
        let time_base = video_stream.time_base();

        let fps = rational_to_f64(video_stream.avg_frame_rate())
            .or_else(|| {
                warn!("⚠️  [抽帧] 平均帧率不可用，改用基础帧率: {}", path.display());
                rational_to_f64(video_stream.rate())
            })
            .ok_or_else(|| unavailable("无法获取视频帧率".to_string()))?;

        let decoder_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
                .map_err(|e| unavailable(format!("无法创建解码器上下文: {}", e)))?;

        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(|e| unavailable(format!("无法创建视频解码器: {}", e)))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| unavailable(format!("无法创建缩放器: {}", e)))?;

        debug!(
            "打开视频: {} ({}x{}, {:.2} fps)",
            path.display(),
            decoder.width(),
            decoder.height(),
            fps
        );

        Ok(Self {
            path,
            ictx,
            decoder,
            scaler,
            stream_index,
            time_base,
            fps,
            position: 0,
            eof_sent: false,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .map_err(|e| CaptionError::source_unavailable(&self.path, format!("帧格式转换失败: {}", e)))?;

        let timestamp = decoded.timestamp().map(|ts| {
            ts as f64 * self.time_base.numerator() as f64 / self.time_base.denominator().max(1) as f64
        });

        let frame = Frame::new(self.position, timestamp, frame_to_image(&rgb_frame));
        self.position += 1;
        Ok(frame)
    }
}

impl FrameSource for VideoProcessor {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match classify_receive(self.decoder.receive_frame(&mut decoded)) {
                Ok(ReceiveOutcome::Frame) => return self.convert(&decoded).map(Some),
                Ok(ReceiveOutcome::Finished) => return Ok(None),
                Ok(ReceiveOutcome::NeedInput) if self.eof_sent => return Ok(None),
                Ok(ReceiveOutcome::NeedInput) => {}
                Err(e) => {
                    return Err(CaptionError::source_unavailable(
                        &self.path,
                        format!("解码第 {} 帧失败: {}", self.position, e),
                    ))
                }
            }

            match self.ictx.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    self.decoder.send_packet(&packet).map_err(|e| {
                        CaptionError::source_unavailable(&self.path, format!("解码数据包失败: {}", e))
                    })?;
                }
                None => {
                    // 刷新解码器中缓存的帧
                    self.decoder.send_eof().map_err(|e| {
                        CaptionError::source_unavailable(&self.path, format!("刷新解码器失败: {}", e))
                    })?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReceiveOutcome {
    Frame,
    NeedInput,
    Finished,
}

/// 只有 EAGAIN 表示需要继续送入数据包，其他错误不能吞掉，否则后续帧序号会错位
fn classify_receive(
    result: std::result::Result<(), ffmpeg::Error>,
) -> std::result::Result<ReceiveOutcome, ffmpeg::Error> {
    match result {
        Ok(()) => Ok(ReceiveOutcome::Frame),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
            Ok(ReceiveOutcome::NeedInput)
        }
        Err(ffmpeg::Error::Eof) => Ok(ReceiveOutcome::Finished),
        Err(e) => Err(e),
    }
}

fn rational_to_f64(rate: ffmpeg::Rational) -> Option<f64> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(rate.numerator() as f64 / rate.denominator() as f64)
    } else {
        None
    }
}

/// 将 RGB24 格式的 FFmpeg 帧转换为 DynamicImage
fn frame_to_image(frame: &ffmpeg::frame::Video) -> DynamicImage {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_len = width as usize * 3;

    let mut buf = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        buf.extend_from_slice(&data[start..start + row_len]);
    }

    // 缓冲区长度与宽高严格对应
    image::RgbImage::from_raw(width, height, buf)
        .map(DynamicImage::ImageRgb8)
        .unwrap_or_else(|| DynamicImage::new_rgb8(width, height))
}
