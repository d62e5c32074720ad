//! 🔌 Endpoints: where the requests actually go.
//!
//! 🚰 Pages go in as base64, text comes out as... text. Hopefully. Sometimes a 503.
//!
//! 🎭 Same casting agency as ever: one trait, one enum that dispatches to the
//! concrete backends. The dispatcher never needs to know whether it's talking to
//! a vLLM router across the cluster or a scripted stunt double in RAM.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use async_trait::async_trait;
use serde::Deserialize;

use crate::encoder::EncodedItem;
use crate::error::TransportError;

pub mod in_mem;
pub mod openai_compat;

pub use in_mem::{ScriptedEndpoint, ScriptedReply};
pub use openai_compat::{OpenAiCompatibleConfig, OpenAiCompatibleEndpoint};

/// 🧩 One piece of a multimodal prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Image(EncodedItem),
    Text(String),
}

/// 📨 A fully-assembled inference request: images first, then words.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl InferenceRequest {
    /// 🏗️ Every image in order, followed by exactly one trailing instruction.
    pub fn new(model: &str, images: Vec<EncodedItem>, instruction: &str, temperature: f32, max_tokens: u32) -> Self {
        let mut parts: Vec<ContentPart> = images.into_iter().map(ContentPart::Image).collect();
        parts.push(ContentPart::Text(instruction.to_string()));
        Self {
            model: model.to_string(),
            parts,
            temperature,
            max_tokens,
        }
    }

    pub fn image_count(&self) -> usize {
        self.parts.iter().filter(|p| matches!(p, ContentPart::Image(_))).count()
    }

    pub fn instruction(&self) -> Option<&str> {
        self.parts.iter().rev().find_map(|p| match p {
            ContentPart::Text(text) => Some(text.as_str()),
            ContentPart::Image(_) => None,
        })
    }
}

/// 📡 Something that turns an [`InferenceRequest`] into text.
///
/// # Contract
/// - One call, one request, no retries. Retrying is the executor's job; swallowing
///   errors during warm-up is the readiness gate's job. Endpoints just report.
/// - `Ok` carries the raw completion text, which may be empty. Empty is not an
///   error here; the readiness gate decides what empty means.
/// - Must be `Send + Sync`: it is shared read-only for the lifetime of a run.
#[async_trait]
pub trait InferenceEndpoint: std::fmt::Debug + Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, TransportError>;
}

/// 🔧 Which endpoint to build. Externally tagged, so TOML reads `[endpoint.OpenAiCompatible]`.
/// The lowercase aliases are what env vars turn into once figment is done with them.
#[derive(Debug, Deserialize, Clone)]
pub enum EndpointConfig {
    #[serde(alias = "openaicompatible")]
    OpenAiCompatible(OpenAiCompatibleConfig),
    /// 🎭 Dry-run mode: every request gets the same canned answer.
    #[serde(alias = "inmemory")]
    InMemory {
        #[serde(default = "default_canned_reply")]
        reply: String,
    },
}

fn default_canned_reply() -> String {
    "<page_number>1</page_number> lorem ipsum, but make it OCR".to_string()
}

/// 🎭 The many faces of an endpoint.
#[derive(Debug)]
pub enum EndpointBackend {
    OpenAiCompatible(OpenAiCompatibleEndpoint),
    InMemory(ScriptedEndpoint),
}

impl EndpointBackend {
    /// 🚀 Build the backend the config asks for.
    pub fn from_config(config: &EndpointConfig) -> anyhow::Result<Self> {
        Ok(match config {
            EndpointConfig::OpenAiCompatible(c) => {
                EndpointBackend::OpenAiCompatible(OpenAiCompatibleEndpoint::new(c.clone())?)
            }
            EndpointConfig::InMemory { reply } => {
                EndpointBackend::InMemory(ScriptedEndpoint::always(ScriptedReply::Text(reply.clone())))
            }
        })
    }
}

#[async_trait]
impl InferenceEndpoint for EndpointBackend {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, TransportError> {
        match self {
            EndpointBackend::OpenAiCompatible(e) => e.complete(request).await,
            EndpointBackend::InMemory(e) => e.complete(request).await,
        }
    }
}
