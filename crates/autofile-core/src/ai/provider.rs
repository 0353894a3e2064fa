use crate::config::{ProviderKind, ProviderSettings};
use crate::error::{AutoFileError, Result};
use crate::redact::redact_secrets;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 语言模型：输入 prompt，返回原始文本。不做重试。
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// 安全地截取字符串到指定字符数，确保在字符边界处分割
fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        return s;
    }
    s.char_indices()
        .nth(max_chars)
        .map(|(idx, _)| &s[..idx])
        .unwrap_or(s)
}

/// 提供商配置
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            api_key: settings.resolve_api_key().unwrap_or_default(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| settings.default_base_url().to_string()),
            model: settings.model.clone(),
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AutoFileError::ProviderError(format!("创建 HTTP 客户端失败: {}", e)))
    }

    fn map_transport_error(&self, provider: &str, e: reqwest::Error) -> AutoFileError {
        if e.is_timeout() {
            AutoFileError::ProviderTimeout(self.timeout.as_secs())
        } else {
            AutoFileError::ProviderError(redact_secrets(&format!("{} 请求失败: {}", provider, e)))
        }
    }
}

/// 非 2xx 响应转为 ProviderError，并去除其中的密钥
async fn error_for_status(provider: &str, response: reqwest::Response) -> AutoFileError {
    let status = response.status();
    let error_text = redact_secrets(&response.text().await.unwrap_or_default());
    AutoFileError::ProviderError(format!(
        "{} 返回错误: {} - {}",
        provider,
        status,
        safe_truncate(&error_text, 800)
    ))
}

/// 按配置构建语言模型
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn LanguageModel>> {
    let config = ProviderConfig::from_settings(settings);
    if settings.kind != ProviderKind::Ollama && config.api_key.is_empty() {
        return Err(AutoFileError::Config(format!(
            "provider {:?} requires an API key (set {})",
            settings.kind,
            settings.api_key_env.as_deref().unwrap_or(match settings.kind {
                ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
                _ => "OPENAI_API_KEY",
            })
        )));
    }
    tracing::info!("使用模型 {:?}/{} @ {}", settings.kind, config.model, config.base_url);

    let model: Arc<dyn LanguageModel> = match settings.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider { config }),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider { config }),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider { config }),
    };
    Ok(model)
}

// ==================== Ollama ====================

pub struct OllamaProvider {
    config: ProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

/// Ollama 返回 NDJSON，逐行拼接 `response` 字段；无法解析的行跳过
fn parse_ollama_body(body: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct GenerateChunk {
        response: Option<String>,
        error: Option<String>,
    }

    let mut text = String::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<GenerateChunk>(line) {
            Ok(chunk) => {
                if let Some(err) = chunk.error {
                    return Err(AutoFileError::ProviderError(redact_secrets(&err)));
                }
                if let Some(part) = chunk.response {
                    text.push_str(&part);
                }
            }
            Err(_) => tracing::debug!("跳过无法解析的 NDJSON 行: {}", safe_truncate(line, 100)),
        }
    }

    let text = text.trim();
    if text.is_empty() {
        return Err(AutoFileError::ProviderError("Ollama 返回了空内容".into()));
    }
    Ok(text.to_string())
}

#[async_trait]
impl LanguageModel for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct GenerateRequest<'a> {
            model: &'a str,
            prompt: &'a str,
            stream: bool,
            options: GenerateOptions,
        }

        #[derive(Serialize)]
        struct GenerateOptions {
            temperature: f32,
        }

        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };

        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        tracing::debug!("Ollama: 发送请求到 {}, prompt 长度 {} 字符", url, prompt.len());
        let start = std::time::Instant::now();

        let client = self.config.http_client()?;
        let response = client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.config.map_transport_error("Ollama", e))?;

        tracing::info!(
            "Ollama: 收到响应, 耗时 {}ms, status={}",
            start.elapsed().as_millis(),
            response.status()
        );

        if !response.status().is_success() {
            return Err(error_for_status("Ollama", response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.config.map_transport_error("Ollama", e))?;
        parse_ollama_body(&body)
    }
}

// ==================== OpenAI 兼容 ====================

pub struct OpenAiProvider {
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

/// 智能处理 URL：如果已经包含 /chat/completions 则不再追加
fn openai_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

fn parse_openai_body(body: &str) -> Result<String> {
    #[derive(Deserialize, Debug)]
    struct ChatResponse {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize, Debug)]
    struct Choice {
        message: Option<MessageResponse>,
        // 某些 API 使用 text 字段（旧版 OpenAI 格式）
        text: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    struct MessageResponse {
        content: Option<String>,
        // 部分 OpenAI 兼容实现会把“推理/思考”放到该字段
        reasoning_content: Option<String>,
    }

    let result: ChatResponse = serde_json::from_str(body).map_err(|e| {
        AutoFileError::ProviderError(format!(
            "解析 OpenAI Chat API 响应失败: {} - {}",
            e,
            safe_truncate(&redact_secrets(body), 200)
        ))
    })?;

    let choice = result
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AutoFileError::ProviderError("OpenAI API 返回空选择".into()))?;

    let (content, reasoning) = match choice.message {
        Some(m) => (m.content, m.reasoning_content),
        None => (None, None),
    };

    // content 为空时，JSON 答复可能只出现在 reasoning_content 的末尾
    let content = content
        .filter(|c| !c.trim().is_empty())
        .or(choice.text)
        .filter(|c| !c.trim().is_empty())
        .or_else(|| {
            reasoning.and_then(|r| {
                tracing::debug!("content 为空，使用 reasoning_content，长度: {}", r.len());
                r.lines()
                    .rev()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(str::to_string)
            })
        })
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(AutoFileError::ProviderError("API 返回了空内容，请检查模型配置".into()));
    }
    Ok(content)
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            max_tokens: u32,
            temperature: f32,
        }

        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: 256,
            temperature: self.config.temperature,
        };

        let url = openai_url(&self.config.base_url);
        tracing::info!("OpenAI: 发送请求到 {}", url);
        let start = std::time::Instant::now();

        let client = self.config.http_client()?;
        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.config.map_transport_error("OpenAI Chat API", e))?;

        tracing::info!(
            "OpenAI: 收到响应, 耗时 {}ms, status={}",
            start.elapsed().as_millis(),
            response.status()
        );

        if !response.status().is_success() {
            return Err(error_for_status("OpenAI Chat API", response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.config.map_transport_error("OpenAI Chat API", e))?;
        tracing::debug!("OpenAI API 原始响应: {}", safe_truncate(&redact_secrets(&body), 1000));
        parse_openai_body(&body)
    }
}

// ==================== Anthropic ====================

pub struct AnthropicProvider {
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

/// 智能处理 URL：如果已经包含 /v1/messages 则不再追加
fn anthropic_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1/messages") || base.ends_with("/messages") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/messages", base)
    } else {
        format!("{}/v1/messages", base)
    }
}

fn parse_anthropic_body(body: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct ChatResponse {
        content: Vec<ContentBlock>,
    }

    #[derive(Deserialize)]
    struct ContentBlock {
        #[serde(default)]
        text: String,
    }

    let result: ChatResponse = serde_json::from_str(body).map_err(|e| {
        AutoFileError::ProviderError(format!("解析 Anthropic Chat API 响应失败: {}", e))
    })?;

    let text: String = result.content.into_iter().map(|b| b.text).collect();
    if text.trim().is_empty() {
        return Err(AutoFileError::ProviderError("Anthropic API 返回空内容".into()));
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            messages: Vec<Message<'a>>,
        }

        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        let request = ChatRequest {
            model: &self.config.model,
            max_tokens: 256,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let url = anthropic_url(&self.config.base_url);
        tracing::info!("Anthropic: 发送请求到 {}", url);

        let client = self.config.http_client()?;
        let response = client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.config.map_transport_error("Anthropic Chat API", e))?;

        if !response.status().is_success() {
            return Err(error_for_status("Anthropic Chat API", response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.config.map_transport_error("Anthropic Chat API", e))?;
        parse_anthropic_body(&body)
    }
}
