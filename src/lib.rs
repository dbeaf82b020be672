pub mod error;
pub mod frame;
pub mod sampler;
pub mod video_processor;
pub mod captioner;
pub mod pipeline;
pub mod summarizer;
pub mod output;
pub mod processor;
pub mod config;

pub use error::{CaptionError, Result};
pub use frame::{Frame, serialize_captions};
pub use sampler::{FrameSampler, FrameSource, VideoBackend, sampling_interval};
pub use video_processor::{FfmpegBackend, VideoProcessor};
pub use captioner::{ImageCaptioner, OllamaCaptioner};
pub use pipeline::CaptionPipeline;
pub use summarizer::{OllamaSummarizer, TextSummarizer};
pub use output::{CaptionRecord, write_captions_csv};
pub use processor::{BatchOptions, BatchReport, process_batch, process_video};
pub use config::{CaptionConfig, ConfigLoader, ConfigOverrides, FailurePolicy};
