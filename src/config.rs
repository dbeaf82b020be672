use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::captioner::DEFAULT_CAPTION_PROMPT;
use crate::error::CaptionError;

/// 单个视频失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// 遇到第一个失败立即终止整个批次
    #[default]
    FailFast,
    /// 记录失败并继续处理下一个视频
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = CaptionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail-fast" | "fail_fast" | "failfast" => Ok(FailurePolicy::FailFast),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(CaptionError::Config(format!("未知的失败策略: {}", other))),
        }
    }
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailFast => "fail-fast",
            FailurePolicy::Continue => "continue",
        }
    }
}

/// 批处理配置
#[derive(Debug, Clone)]
pub struct CaptionConfig {
    /// 视频所在目录
    pub input_dir: PathBuf,
    /// 参与处理的文件扩展名（不含点）
    pub extension: String,
    /// 总结提示词文件
    pub prompt_path: PathBuf,
    /// 输出 CSV 路径
    pub output_path: PathBuf,
    /// 帧采样率（每秒采样多少帧）
    pub sample_rate: f64,
    /// 单个视频失败时的策略
    pub failure_policy: FailurePolicy,
    /// 模型服务地址
    pub endpoint: String,
    /// 图像描述模型
    pub caption_model: String,
    /// 发给图像描述模型的提示词
    pub caption_prompt: String,
    /// 文本总结模型
    pub summary_model: String,
    /// 单次模型请求超时（秒）
    pub request_timeout_secs: u64,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("real_videos"),
            extension: "mp4".to_string(),
            prompt_path: PathBuf::from("src/prompt.txt"),
            output_path: PathBuf::from("output/video_captions.csv"),
            sample_rate: 1.0,
            failure_policy: FailurePolicy::FailFast,
            endpoint: "http://localhost:11434".to_string(),
            caption_model: "llava".to_string(),
            caption_prompt: DEFAULT_CAPTION_PROMPT.to_string(),
            summary_model: "llama3".to_string(),
            request_timeout_secs: 120,
            log_level: "info".to_string(),
        }
    }
}

impl CaptionConfig {
    /// 校验配置，采样率必须是有限正数
    pub fn validate(&self) -> std::result::Result<(), CaptionError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(CaptionError::Config(format!(
                "采样率必须大于 0，当前为 {}",
                self.sample_rate
            )));
        }
        if self.extension.trim_start_matches('.').is_empty() {
            return Err(CaptionError::Config("文件扩展名不能为空".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(CaptionError::Config("请求超时必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 命令行覆盖项，None 表示未指定
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input_dir: Option<PathBuf>,
    pub prompt_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub sample_rate: Option<f64>,
    pub failure_policy: Option<FailurePolicy>,
    pub endpoint: Option<String>,
    pub caption_model: Option<String>,
    pub summary_model: Option<String>,
}

/// 从配置文件或环境变量读到的原始值
#[derive(Debug, Clone, Default)]
struct PartialConfig {
    input_dir: Option<PathBuf>,
    extension: Option<String>,
    prompt_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    sample_rate: Option<f64>,
    failure_policy: Option<FailurePolicy>,
    endpoint: Option<String>,
    caption_model: Option<String>,
    caption_prompt: Option<String>,
    summary_model: Option<String>,
    request_timeout_secs: Option<u64>,
    log_level: Option<String>,
}

/// 解析数值配置项，格式错误时报错而不是回退到默认值
fn parse_setting<T: FromStr>(key: &str, value: &str) -> std::result::Result<T, CaptionError> {
    value
        .trim()
        .parse()
        .map_err(|_| CaptionError::Config(format!("配置项 {} 的值无效: {}", key, value)))
}

const ENV_PREFIX: &str = "VIDEO_CAPTION_";
const CONFIG_FILE_NAME: &str = "video-caption.ini";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, overrides: ConfigOverrides) -> Result<CaptionConfig> {
        // 显式指定的配置文件必须可读
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };
        let env_config = Self::load_from_env(|key| env::var(key).ok())?;

        let config = Self::merge(overrides, env_config, file_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: ConfigOverrides, env: PartialConfig, file: PartialConfig) -> CaptionConfig {
        let defaults = CaptionConfig::default();
        CaptionConfig {
            input_dir: cli
                .input_dir
                .or(env.input_dir)
                .or(file.input_dir)
                .unwrap_or(defaults.input_dir),
            extension: env
                .extension
                .or(file.extension)
                .map(|e| e.trim_start_matches('.').to_string())
                .unwrap_or(defaults.extension),
            prompt_path: cli
                .prompt_path
                .or(env.prompt_path)
                .or(file.prompt_path)
                .unwrap_or(defaults.prompt_path),
            output_path: cli
                .output_path
                .or(env.output_path)
                .or(file.output_path)
                .unwrap_or(defaults.output_path),
            sample_rate: cli
                .sample_rate
                .or(env.sample_rate)
                .or(file.sample_rate)
                .unwrap_or(defaults.sample_rate),
            failure_policy: cli
                .failure_policy
                .or(env.failure_policy)
                .or(file.failure_policy)
                .unwrap_or(defaults.failure_policy),
            endpoint: cli
                .endpoint
                .or(env.endpoint)
                .or(file.endpoint)
                .unwrap_or(defaults.endpoint),
            caption_model: cli
                .caption_model
                .or(env.caption_model)
                .or(file.caption_model)
                .unwrap_or(defaults.caption_model),
            caption_prompt: env
                .caption_prompt
                .or(file.caption_prompt)
                .unwrap_or(defaults.caption_prompt),
            summary_model: cli
                .summary_model
                .or(env.summary_model)
                .or(file.summary_model)
                .unwrap_or(defaults.summary_model),
            request_timeout_secs: env
                .request_timeout_secs
                .or(file.request_timeout_secs)
                .unwrap_or(defaults.request_timeout_secs),
            log_level: env
                .log_level
                .or(file.log_level)
                .unwrap_or(defaults.log_level),
        }
    }

    /// 从环境变量加载配置
    fn load_from_env(get: impl Fn(&str) -> Option<String>) -> Result<PartialConfig> {
        let var = |name: &str| get(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        Ok(PartialConfig {
            input_dir: var("INPUT_DIR").map(PathBuf::from),
            extension: var("EXTENSION"),
            prompt_path: var("PROMPT_PATH").map(PathBuf::from),
            output_path: var("OUTPUT_PATH").map(PathBuf::from),
            sample_rate: var("SAMPLE_RATE")
                .map(|v| parse_setting::<f64>("SAMPLE_RATE", &v))
                .transpose()?,
            failure_policy: var("FAILURE_POLICY").map(|v| v.parse::<FailurePolicy>()).transpose()?,
            endpoint: var("ENDPOINT"),
            caption_model: var("CAPTION_MODEL"),
            caption_prompt: var("CAPTION_PROMPT"),
            summary_model: var("SUMMARY_MODEL"),
            request_timeout_secs: var("REQUEST_TIMEOUT_SECS")
                .map(|v| parse_setting::<u64>("REQUEST_TIMEOUT_SECS", &v))
                .transpose()?,
            log_level: var("LOG_LEVEL"),
        })
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = configparser::ini::Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 先读指定节，没有则使用 [DEFAULT] 节
        let get = |section: &str, key: &str| {
            config_parser
                .get(section, key)
                .or_else(|| config_parser.get("DEFAULT", key))
                .filter(|v| !v.is_empty())
        };

        Ok(PartialConfig {
            input_dir: get("video_caption", "input_dir").map(PathBuf::from),
            extension: get("video_caption", "extension"),
            prompt_path: get("video_caption", "prompt_path").map(PathBuf::from),
            output_path: get("video_caption", "output_path").map(PathBuf::from),
            sample_rate: get("video_caption", "sample_rate")
                .map(|v| parse_setting::<f64>("sample_rate", &v))
                .transpose()?,
            failure_policy: get("video_caption", "failure_policy")
                .map(|v| v.parse::<FailurePolicy>())
                .transpose()?,
            endpoint: get("models", "endpoint"),
            caption_model: get("models", "caption_model"),
            caption_prompt: get("models", "caption_prompt"),
            summary_model: get("models", "summary_model"),
            request_timeout_secs: get("models", "request_timeout_secs")
                .map(|v| parse_setting::<u64>("request_timeout_secs", &v))
                .transpose()?,
            log_level: get("logging", "level"),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        let mut candidates = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from(format!(".{}", CONFIG_FILE_NAME)),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(format!(".{}", CONFIG_FILE_NAME)));
        }
        candidates.push(PathBuf::from("/etc").join(CONFIG_FILE_NAME));

        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from_file(&candidate);
            }
        }

        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = CaptionConfig::default();
        let mut config_parser = configparser::ini::Ini::new();
        let mut set = |section: &str, key: &str, value: String| {
            config_parser.set(section, key, Some(value));
        };
        set("video_caption", "input_dir", defaults.input_dir.display().to_string());
        set("video_caption", "extension", defaults.extension.clone());
        set("video_caption", "prompt_path", defaults.prompt_path.display().to_string());
        set("video_caption", "output_path", defaults.output_path.display().to_string());
        set("video_caption", "sample_rate", defaults.sample_rate.to_string());
        set("video_caption", "failure_policy", defaults.failure_policy.as_str().to_string());
        set("models", "endpoint", defaults.endpoint.clone());
        set("models", "caption_model", defaults.caption_model.clone());
        set("models", "caption_prompt", defaults.caption_prompt.clone());
        set("models", "summary_model", defaults.summary_model.clone());
        set("models", "request_timeout_secs", defaults.request_timeout_secs.to_string());
        set("logging", "level", defaults.log_level.clone());

        config_parser
            .write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}
