use anyhow::Result;
use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};

use crate::llm::LlmClientConfig;

/// One exchange in a chat-style completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_owned(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: content.into(),
        }
    }
}

/// The result of one successful completion call.
///
/// Token accounting for the Rating Processor's token-proportion multiplier (`spec.md` §4.5) is
/// *not* derived here: the spec's "token" is a character count of the prompt and reply
/// (`examples/original_source/game/avalon_game_helper.py`'s `len(prompt)` / `len(response)`), not
/// whatever a provider's `usage` field reports, so the gateway computes it itself from `content`
/// and the prompt it sent.
#[derive(Debug, Clone)]
pub struct ChatCompletionResult {
    pub content: String,
}

/// Sampling parameters for one completion call.
#[derive(Debug, Clone, Copy)]
pub struct ChatCompletionParams {
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub max_tokens: u32,
}

impl Default for ChatCompletionParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            presence_penalty: DEFAULT_PRESENCE_PENALTY,
            frequency_penalty: DEFAULT_FREQUENCY_PENALTY,
            max_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

/// Backend abstraction over a chat-completion API, implemented once against a real HTTP
/// provider and once as an in-memory test double (`avalon-test-utils`).
///
/// Grounded on `other_examples/CloudLLM-ai-cloudllm`'s provider-trait shape: this crate has no
/// LLM HTTP client of its own, so the dependency and its usage pattern (`reqwest` with a JSON
/// body, bearer auth) are adopted from that example rather than invented from scratch.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        config: &LlmClientConfig,
        messages: &[ChatMessage],
        params: ChatCompletionParams,
    ) -> Result<ChatCompletionResult>;
}

#[derive(Serialize)]
struct ChatCompletionRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponseBody {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatMessage,
}

/// Default sampling parameters for `askLLM`, matching
/// `original_source/game/avalon_game_helper.py`'s literal defaults.
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_PRESENCE_PENALTY: f32 = 0.5;
pub const DEFAULT_FREQUENCY_PENALTY: f32 = 0.5;
pub const MAX_OUTPUT_TOKENS: u32 = 500;
pub const MAX_INPUT_TOKENS_ADVISORY: u32 = 500;

/// Real HTTP-backed [`LlmClient`] speaking an OpenAI-compatible chat-completions API.
pub struct HttpLlmClient {
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        config: &LlmClientConfig,
        messages: &[ChatMessage],
        params: ChatCompletionParams,
    ) -> Result<ChatCompletionResult> {
        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let body = ChatCompletionRequestBody {
            model: &config.model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            max_tokens: params.max_tokens,
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatCompletionResponseBody>()
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("LLM provider returned no choices"))?;
        Ok(ChatCompletionResult {
            content: choice.message.content,
        })
    }
}
