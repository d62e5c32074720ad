//! # 📡 THE OPENAI-COMPATIBLE BACKEND
//!
//! 🎬 COLD OPEN. INT. CLUSTER, 4:02 AM
//!
//! A router service forwards to a vLLM pod with `maxNumSeqs=1`. It serves one
//! generation at a time, like a deli counter with a single very slow, very
//! smart employee. Take a number. The number is always 1.
//!
//! 🚀 This module speaks `POST /chat/completions` with inline `data:` image URLs
//! and hands back `choices[0].message.content`. It does not retry. It does not
//! wait for warm-up. It reports what happened and lets the grown-ups decide.
//!
//! ⚠️ The request timeout has no default on purpose. The server's cold start and
//! your page count are things only you know. Pick a number. Write it down.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::endpoints::{ContentPart, InferenceEndpoint, InferenceRequest};
use crate::error::TransportError;

// 🔧 OpenAiCompatibleConfig, co-located with the thing it configures. Socks near feet.
#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiCompatibleConfig {
    /// 📡 Base URL including the `/v1`, e.g. `http://vllm-router/v1`.
    pub base_url: String,
    /// 🔒 Sent as a bearer token when present. vLLM usually accepts literally anything.
    #[serde(default)]
    pub api_key: Option<String>,
    /// ⏱️ Whole-request ceiling in seconds. Required.
    pub request_timeout_secs: u64,
    /// ⏱️ TCP connect ceiling in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// 🔧 10 seconds to shake hands. If the router can't manage that, it's not ready anyway.
fn default_connect_timeout_secs() -> u64 {
    10
}

/// 📦 A reqwest client pointed at one chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleEndpoint {
    client: reqwest::Client,
    completions_url: String,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleEndpoint {
    /// 🚀 Build the client. No network traffic happens here; the readiness gate
    /// is the one that knocks on the door.
    pub fn new(config: OpenAiCompatibleConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS backend having a moment.")?;
        let completions_url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            completions_url,
            config,
        })
    }
}

#[async_trait]
impl InferenceEndpoint for OpenAiCompatibleEndpoint {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, TransportError> {
        let body = ChatCompletionRequest::from(request);
        let mut http_request = self.client.post(&self.completions_url).json(&body);
        if let Some(ref api_key) = self.config.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        trace!(
            url = %self.completions_url,
            images = request.image_count(),
            "📨 sending chat completion"
        );
        let response = http_request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|err| TransportError::Malformed(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TransportError::Malformed("no choices[0].message.content in response".to_string()))
    }
}

// ===== Wire format =====

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    ImageUrl { image_url: ImageUrl },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl<'a> From<&'a InferenceRequest> for ChatCompletionRequest<'a> {
    fn from(request: &'a InferenceRequest) -> Self {
        let content = request
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Image(image) => WirePart::ImageUrl {
                    image_url: ImageUrl { url: image.data_url() },
                },
                ContentPart::Text(text) => WirePart::Text { text: text.as_str() },
            })
            .collect();
        Self {
            model: &request.model,
            messages: [ChatMessage { role: "user", content }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
