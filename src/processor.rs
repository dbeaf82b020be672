use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::captioner::ImageCaptioner;
use crate::config::{CaptionConfig, FailurePolicy};
use crate::error::{CaptionError, Result};
use crate::output::{write_captions_csv, CaptionRecord};
use crate::pipeline::CaptionPipeline;
use crate::sampler::VideoBackend;
use crate::summarizer::{load_prompt, summarize_captions, TextSummarizer};

/// 批处理参数
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub extension: String,
    pub prompt_path: PathBuf,
    pub output_path: PathBuf,
    pub sample_rate: f64,
    pub failure_policy: FailurePolicy,
}

impl From<&CaptionConfig> for BatchOptions {
    fn from(config: &CaptionConfig) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            extension: config.extension.clone(),
            prompt_path: config.prompt_path.clone(),
            output_path: config.output_path.clone(),
            sample_rate: config.sample_rate,
            failure_policy: config.failure_policy,
        }
    }
}

/// 处理失败的视频
#[derive(Debug)]
pub struct VideoFailure {
    pub filename: String,
    pub error: CaptionError,
}

/// 批处理结果
#[derive(Debug)]
pub struct BatchReport {
    /// 成功的记录，按文件名排序
    pub records: Vec<CaptionRecord>,
    /// 失败的视频（仅在 `FailurePolicy::Continue` 下出现）
    pub failures: Vec<VideoFailure>,
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// 列出目录下指定扩展名的文件名，按字典序排序
pub fn list_videos(dir: &Path, extension: &str) -> Result<Vec<String>> {
    let extension = extension.trim_start_matches('.');
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CaptionError::source_unavailable(dir, format!("无法读取输入目录: {}", e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| CaptionError::source_unavailable(dir, format!("无法读取目录项: {}", e)))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => files.push(name.to_string()),
            None => warn!("⚠️  [批处理] 文件名不是合法的 UTF-8，已跳过: {}", path.display()),
        }
    }

    files.sort();
    Ok(files)
}

/// 处理单个视频：抽帧描述后交给总结模型
pub async fn process_video<B, C, S>(
    pipeline: &CaptionPipeline<B, C>,
    summarizer: &S,
    prompt: &str,
    video_path: &Path,
    sample_rate: f64,
) -> Result<CaptionRecord>
where
    B: VideoBackend,
    C: ImageCaptioner,
    S: TextSummarizer,
{
    let filename = video_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| CaptionError::source_unavailable(video_path, "无效的文件名"))?;

    let captions = pipeline.run(video_path, sample_rate).await?;

    let summary_start = Instant::now();
    info!("⏳ [字幕总结] 正在总结 {} 条帧描述...", captions.len());
    let caption = summarize_captions(summarizer, &captions, prompt).await?;
    info!("✅ [字幕总结] 总结完成，耗时: {:.2}秒", summary_start.elapsed().as_secs_f64());

    Ok(CaptionRecord { filename, caption })
}

/// 处理整个目录并写出 CSV
///
/// 所有视频处理完后才写文件；`FailFast` 下任一视频失败都不会产生输出。
pub async fn process_batch<B, C, S>(
    pipeline: &CaptionPipeline<B, C>,
    summarizer: &S,
    options: &BatchOptions,
) -> Result<BatchReport>
where
    B: VideoBackend,
    C: ImageCaptioner,
    S: TextSummarizer,
{
    if !options.sample_rate.is_finite() || options.sample_rate <= 0.0 {
        return Err(CaptionError::Config(format!(
            "采样率必须大于 0，当前为 {}",
            options.sample_rate
        )));
    }

    let total_start = Instant::now();
    info!("🎬 [批处理] 输入目录: {}", options.input_dir.display());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let prompt = load_prompt(&options.prompt_path)?;
    let videos = list_videos(&options.input_dir, &options.extension)?;
    info!("  • 待处理视频: {} 个", videos.len());
    info!("  • 失败策略: {}", options.failure_policy.as_str());

    let mut records = Vec::with_capacity(videos.len());
    let mut failures = Vec::new();

    for (i, video_file) in videos.iter().enumerate() {
        info!("🎞️  [批处理] 正在处理视频 {}/{}: {}", i + 1, videos.len(), video_file);
        let video_path = options.input_dir.join(video_file);

        match process_video(pipeline, summarizer, &prompt, &video_path, options.sample_rate).await {
            Ok(record) => {
                println!("\n----------------------------------- 字幕结果 ({}) -----------------------------------\n", video_file);
                println!("{}", record.caption);
                println!("\n--------------------------------------------------------------------------------------\n");
                records.push(record);
            }
            Err(e) => match options.failure_policy {
                FailurePolicy::FailFast => {
                    error!("❌ [批处理] 处理视频失败，终止批处理: {} - {}", video_file, e);
                    return Err(e);
                }
                FailurePolicy::Continue => {
                    error!("❌ [批处理] 处理视频失败，跳过: {} - {}", video_file, e);
                    failures.push(VideoFailure {
                        filename: video_file.clone(),
                        error: e,
                    });
                }
            },
        }
    }

    write_captions_csv(&options.output_path, &records)?;

    let elapsed = total_start.elapsed();
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("🎉 [批处理] 处理完成！总耗时: {:.2}秒", elapsed.as_secs_f64());
    info!("  • 成功: {} 个", records.len());
    if !failures.is_empty() {
        info!("  • 失败: {} 个", failures.len());
    }
    info!("📁 [批处理] 输出文件: {}", options.output_path.display());

    Ok(BatchReport {
        records,
        failures,
        output_path: options.output_path.clone(),
        elapsed,
    })
}
