use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

use crate::error::{CaptionError, Result};
use crate::frame::Frame;

/// 为单帧图像生成文字描述的能力
#[allow(async_fn_in_trait)]
pub trait ImageCaptioner {
    async fn caption(&self, frame: &Frame) -> Result<String>;
}

/// 模型输出中需要去掉的控制 token
const SPECIAL_TOKENS: &[&str] = &[
    "<|endoftext|>",
    "<|eot_id|>",
    "<|im_end|>",
    "<s>",
    "</s>",
    "<pad>",
    "[CLS]",
    "[SEP]",
    "[PAD]",
];

pub const DEFAULT_CAPTION_PROMPT: &str = "Describe this image in one short sentence.";

/// 去掉控制 token 并规整空白
pub fn clean_caption(raw: &str) -> String {
    let mut text = raw.to_string();
    for token in SPECIAL_TOKENS {
        text = text.replace(token, " ");
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// 通过 Ollama 兼容的 `/api/generate` 接口调用视觉语言模型
pub struct OllamaCaptioner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    prompt: String,
    timeout: Duration,
}

impl OllamaCaptioner {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            prompt: DEFAULT_CAPTION_PROMPT.to_string(),
            timeout,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    fn url(&self) -> String {
        format!("{}/api/generate", self.endpoint)
    }

    fn request(&self, image: String) -> GenerateRequest<'_> {
        GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![image],
            stream: false,
        }
    }
}

/// 把帧编码为 base64 的 JPEG
pub fn encode_frame(frame: &Frame) -> Result<String> {
    let mut bytes = Cursor::new(Vec::new());
    // JPEG 不支持透明通道，统一转为 RGB
    DynamicImage::ImageRgb8(frame.image.to_rgb8())
        .write_to(&mut bytes, ImageOutputFormat::Jpeg(90))
        .map_err(|e| CaptionError::Captioning(format!("第 {} 帧编码失败: {}", frame.index, e)))?;
    Ok(STANDARD.encode(bytes.into_inner()))
}

impl ImageCaptioner for OllamaCaptioner {
    async fn caption(&self, frame: &Frame) -> Result<String> {
        let request = self.request(encode_frame(frame)?);

        let response = self
            .client
            .post(self.url())
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CaptionError::Captioning(format!("请求视觉模型失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CaptionError::Captioning(format!(
                "视觉模型返回错误状态: {} - {}",
                status, error_text
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CaptionError::Captioning(format!("解析视觉模型响应失败: {}", e)))?;

        let caption = clean_caption(&body.response);
        debug!("第 {} 帧描述: {}", frame.index, caption);
        Ok(caption)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 本地一次性 HTTP 服务：读完一个请求后回复 `response`，返回服务地址
    pub(crate) async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
        let body_len = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + body_len
    }

    pub(crate) const INTERNAL_ERROR: &str =
        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\nboom";

    fn black_frame() -> Frame {
        Frame::new(0, None, DynamicImage::ImageRgb8(ImageBuffer::from_fn(4, 4, |_, _| Rgb([0, 0, 0]))))
    }

    #[test]
    fn test_clean_caption_strips_control_tokens() {
        assert_eq!(clean_caption("<s> a man riding a horse </s>"), "a man riding a horse");
        assert_eq!(clean_caption("[CLS] a cat [SEP] [PAD][PAD]"), "a cat");
        assert_eq!(clean_caption("  two dogs\nplaying<|endoftext|>"), "two dogs playing");
        assert_eq!(clean_caption("</s>"), "");
    }

    #[test]
    fn test_encode_frame_is_jpeg() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(8, 8, |x, y| Rgb([x as u8 * 30, y as u8 * 30, 0])));
        let encoded = encode_frame(&Frame::new(0, None, img)).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        // JPEG SOI 标记
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_generate_request_shape() {
        let captioner = OllamaCaptioner::new("http://localhost:11434", "llava", Duration::from_secs(5));
        let value = serde_json::to_value(captioner.request("abc".to_string())).unwrap();
        assert_eq!(value["model"], "llava");
        assert_eq!(value["prompt"], DEFAULT_CAPTION_PROMPT);
        assert_eq!(value["images"][0], "abc");
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_custom_prompt_is_sent() {
        let captioner = OllamaCaptioner::new("http://localhost:11434", "llava", Duration::from_secs(5))
            .with_prompt("What is happening in this frame?");
        let value = serde_json::to_value(captioner.request("abc".to_string())).unwrap();
        assert_eq!(value["prompt"], "What is happening in this frame?");
    }

    #[test]
    fn test_generate_response_missing_field() {
        let body: GenerateResponse = serde_json::from_str(r#"{"done": true}"#).unwrap();
        assert!(body.response.is_empty());
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let captioner = OllamaCaptioner::new("http://localhost:11434/", "llava", Duration::from_secs(5));
        assert_eq!(captioner.url(), "http://localhost:11434/api/generate");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_captioning_error() {
        let captioner = OllamaCaptioner::new("http://127.0.0.1:1", "llava", Duration::from_secs(2));
        let result = captioner.caption(&black_frame()).await;
        assert!(matches!(result, Err(CaptionError::Captioning(_))));
    }

    #[tokio::test]
    async fn test_error_status_is_captioning_error() {
        let endpoint = serve_once(INTERNAL_ERROR).await;
        let captioner = OllamaCaptioner::new(endpoint, "llava", Duration::from_secs(5));

        match captioner.caption(&black_frame()).await {
            Err(CaptionError::Captioning(message)) => {
                assert!(message.contains("500"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_caption_is_cleaned() {
        let endpoint = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 35\r\nconnection: close\r\n\r\n{\"response\":\" a black square </s>\"}",
        )
        .await;
        let captioner = OllamaCaptioner::new(endpoint, "llava", Duration::from_secs(5));
        assert_eq!(captioner.caption(&black_frame()).await.unwrap(), "a black square");
    }
}
