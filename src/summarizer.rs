use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{CaptionError, Result};
use crate::frame::serialize_captions;

/// 根据指令提示词把一段文本总结为一句话的能力
#[allow(async_fn_in_trait)]
pub trait TextSummarizer {
    async fn summarize(&self, prompt: &str, payload: &str) -> Result<String>;
}

/// 读取提示词文件的全部内容，原样使用
pub fn load_prompt(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CaptionError::PromptUnavailable {
        path: path.to_path_buf(),
        source,
    })
}

/// 把逐帧描述列表序列化后交给总结模型，返回模型原始回复
pub async fn summarize_captions<S: TextSummarizer>(
    summarizer: &S,
    captions: &[String],
    prompt: &str,
) -> Result<String> {
    let payload = serialize_captions(captions);
    summarizer.summarize(prompt, &payload).await
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl ChatResponse {
    fn into_content(self) -> Result<String> {
        match self.message {
            Some(message) if !message.content.is_empty() => Ok(message.content),
            _ => Err(CaptionError::Summarization("模型没有返回内容".to_string())),
        }
    }
}

/// 通过 Ollama 兼容的 `/api/chat` 接口调用文本生成模型
pub struct OllamaSummarizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaSummarizer {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        }
    }

    fn url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }
}

impl TextSummarizer for OllamaSummarizer {
    async fn summarize(&self, prompt: &str, payload: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt,
                },
                ChatMessage {
                    role: "user",
                    content: payload,
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(self.url())
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CaptionError::Summarization(format!("请求文本模型失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CaptionError::Summarization(format!(
                "文本模型返回错误状态: {} - {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CaptionError::Summarization(format!("解析文本模型响应失败: {}", e)))?;

        let content = body.into_content()?;
        debug!("总结结果: {}", content);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captioner::tests::{serve_once, INTERNAL_ERROR};
    use std::cell::RefCell;

    struct RecordingSummarizer {
        calls: RefCell<Vec<(String, String)>>,
    }

    impl TextSummarizer for RecordingSummarizer {
        async fn summarize(&self, prompt: &str, payload: &str) -> Result<String> {
            self.calls
                .borrow_mut()
                .push((prompt.to_string(), payload.to_string()));
            Ok(format!("summary: {}", payload))
        }
    }

    #[tokio::test]
    async fn test_summarize_captions_passes_prompt_and_serialized_list() {
        let summarizer = RecordingSummarizer {
            calls: RefCell::new(Vec::new()),
        };
        let captions = vec!["a cat".to_string(), "a dog".to_string()];
        let result = summarize_captions(&summarizer, &captions, "Summarize:")
            .await
            .unwrap();

        assert_eq!(result, r#"summary: ["a cat","a dog"]"#);
        let calls = summarizer.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Summarize:");
        assert_eq!(calls[0].1, r#"["a cat","a dog"]"#);
    }

    #[test]
    fn test_load_prompt_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "You are a video narrator.\nCombine the captions.\n").unwrap();
        assert_eq!(
            load_prompt(&path).unwrap(),
            "You are a video narrator.\nCombine the captions.\n"
        );
    }

    #[test]
    fn test_load_prompt_missing() {
        let result = load_prompt(Path::new("no/such/prompt.txt"));
        assert!(matches!(result, Err(CaptionError::PromptUnavailable { .. })));
    }

    #[test]
    fn test_chat_response_content() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"message": {"role": "assistant", "content": "A dog runs."}}"#)
                .unwrap();
        assert_eq!(body.into_content().unwrap(), "A dog runs.");
    }

    #[test]
    fn test_chat_response_empty_is_error() {
        let empty: ChatResponse =
            serde_json::from_str(r#"{"message": {"role": "assistant", "content": ""}}"#).unwrap();
        assert!(matches!(empty.into_content(), Err(CaptionError::Summarization(_))));

        let missing: ChatResponse = serde_json::from_str(r#"{"done": true}"#).unwrap();
        assert!(matches!(missing.into_content(), Err(CaptionError::Summarization(_))));
    }

    #[test]
    fn test_chat_request_roles() {
        let request = ChatRequest {
            model: "llama3",
            messages: vec![
                ChatMessage { role: "system", content: "p" },
                ChatMessage { role: "user", content: "[]" },
            ],
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "[]");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_summarization_error() {
        let summarizer = OllamaSummarizer::new("http://127.0.0.1:1", "llama3", Duration::from_secs(2));
        let result = summarizer.summarize("Summarize.", "[]").await;
        assert!(matches!(result, Err(CaptionError::Summarization(_))));
    }

    #[tokio::test]
    async fn test_error_status_is_summarization_error() {
        let endpoint = serve_once(INTERNAL_ERROR).await;
        let summarizer = OllamaSummarizer::new(endpoint, "llama3", Duration::from_secs(5));

        match summarizer.summarize("Summarize.", r#"["a cat"]"#).await {
            Err(CaptionError::Summarization(message)) => {
                assert!(message.contains("500"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
