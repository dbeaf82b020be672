use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use video_caption::{
    config::ConfigLoader, process_batch, BatchOptions, CaptionConfig, CaptionPipeline, ConfigOverrides, FailurePolicy,
    FfmpegBackend, OllamaCaptioner, OllamaSummarizer,
};

/// 视频字幕工具 - 逐帧生成描述并总结为每个视频一句字幕
#[derive(Parser, Debug)]
#[command(name = "video-caption")]
#[command(about = "视频字幕工具：抽帧、逐帧描述、总结并写出 CSV", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 帧采样率（每秒采样多少帧）
    /// 可通过环境变量 VIDEO_CAPTION_SAMPLE_RATE 或配置文件设置
    #[arg(long, global = true)]
    sample_rate: Option<f64>,

    /// 模型服务地址
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// 图像描述模型名称
    #[arg(long, global = true)]
    caption_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 批处理模式：处理目录下所有视频并写出 CSV
    Run {
        /// 输入视频目录
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// 输出 CSV 路径
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 总结提示词文件
        #[arg(long)]
        prompt: Option<PathBuf>,

        /// 文本总结模型名称
        #[arg(long)]
        summary_model: Option<String>,

        /// 单个视频失败时跳过并继续（默认遇错即停）
        #[arg(long)]
        keep_going: bool,
    },
    /// 单视频模式：输出每个采样帧的描述
    Caption {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,
    },
    /// 生成默认配置文件
    InitConfig {
        #[arg(default_value = "video-caption.ini")]
        path: PathBuf,
    },
}

fn init_logging(level: &str) {
    let level = level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn build_pipeline(config: &CaptionConfig) -> Result<CaptionPipeline<FfmpegBackend, OllamaCaptioner>> {
    let backend = FfmpegBackend::new().context("初始化视频解码器失败")?;
    let captioner = OllamaCaptioner::new(
        config.endpoint.clone(),
        config.caption_model.clone(),
        config.request_timeout(),
    )
    .with_prompt(config.caption_prompt.clone());
    Ok(CaptionPipeline::new(backend, captioner))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Commands::InitConfig { path } = &args.command {
        ConfigLoader::create_default_config(path)?;
        println!("已生成配置文件: {}", path.display());
        return Ok(());
    }

    let mut overrides = ConfigOverrides {
        sample_rate: args.sample_rate,
        endpoint: args.endpoint,
        caption_model: args.caption_model,
        ..ConfigOverrides::default()
    };
    if let Commands::Run {
        input,
        output,
        prompt,
        summary_model,
        keep_going,
    } = &args.command
    {
        overrides.input_dir = input.clone();
        overrides.output_path = output.clone();
        overrides.prompt_path = prompt.clone();
        overrides.summary_model = summary_model.clone();
        if *keep_going {
            overrides.failure_policy = Some(FailurePolicy::Continue);
        }
    }

    let config = ConfigLoader::load_config(args.config.as_deref(), overrides)
        .context("加载配置失败")?;

    // 初始化日志
    init_logging(&config.log_level);

    tracing::info!(
        "使用配置: sample_rate={:.2} fps, caption_model={}, summary_model={}, endpoint={}",
        config.sample_rate,
        config.caption_model,
        config.summary_model,
        config.endpoint
    );

    match args.command {
        Commands::Run { .. } => {
            let pipeline = build_pipeline(&config)?;
            let summarizer = OllamaSummarizer::new(
                config.endpoint.clone(),
                config.summary_model.clone(),
                config.request_timeout(),
            );
            let report = process_batch(&pipeline, &summarizer, &BatchOptions::from(&config))
                .await
                .context("批处理失败")?;

            for failure in &report.failures {
                eprintln!("跳过 {}: {}", failure.filename, failure.error);
            }
            println!(
                "已写出 {} 条字幕到 {}",
                report.records.len(),
                report.output_path.display()
            );
        }
        Commands::Caption { input } => {
            let pipeline = build_pipeline(&config)?;
            let captions = pipeline
                .run(&input, config.sample_rate)
                .await
                .context("生成帧描述失败")?;
            for (i, caption) in captions.iter().enumerate() {
                println!("{:>4}: {}", i, caption);
            }
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}
