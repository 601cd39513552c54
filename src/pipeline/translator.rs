use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ChunkFailure;
use crate::models::{ChatProvider, ChatRequest, TokenUsage};
use crate::quality::{compare_key_sets, decode_chunk_response};

use super::chunker::Chunk;
use super::prompts::PromptCatalog;
use super::trace::TraceWriter;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranslatedChunk {
    pub entries: Map<String, Value>,
    pub usage: Option<TokenUsage>,
}

/// Translates one chunk per call against a provider. Holds no state between calls.
pub struct ChunkTranslator {
    provider: Arc<dyn ChatProvider>,
    prompts: PromptCatalog,
    model: ModelConfig,
    language: String,
    context: String,
    enforce_key_set: bool,
    log_max_chars: usize,
    trace: Arc<TraceWriter>,
}

impl ChunkTranslator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        prompts: PromptCatalog,
        model: ModelConfig,
        language: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            prompts,
            model,
            language: language.into(),
            context: context.into(),
            enforce_key_set: false,
            log_max_chars: 240,
            trace: Arc::new(TraceWriter::disabled()),
        }
    }

    #[must_use]
    pub fn enforce_key_set(mut self, enforce: bool) -> Self {
        self.enforce_key_set = enforce;
        self
    }

    #[must_use]
    pub fn log_max_chars(mut self, n: usize) -> Self {
        self.log_max_chars = n;
        self
    }

    #[must_use]
    pub fn trace(mut self, trace: Arc<TraceWriter>) -> Self {
        self.trace = trace;
        self
    }

    /// One provider call for `chunk`. `attempt` is 1-based and only used for tracing.
    pub async fn translate_one(&self, chunk: &Chunk, attempt: u32) -> Result<TranslatedChunk, ChunkFailure> {
        let chunk_json = chunk.to_json();
        let messages = self.prompts.build(&chunk_json, &self.language, &self.context);
        let _ = self
            .trace
            .write_chunk_text(chunk.index, attempt, "prompt", &messages.user);
        debug!(
            chunk = chunk.index,
            attempt,
            bytes = chunk_json.len(),
            keys = chunk.len(),
            "sending chunk"
        );

        let completion = self
            .provider
            .chat(ChatRequest {
                model: self.model.model.clone(),
                messages: messages.into_chat(),
                temperature: self.model.temperature,
            })
            .await
            .map_err(ChunkFailure::from)?;

        let _ = self
            .trace
            .write_chunk_text(chunk.index, attempt, "output.raw", &completion.text);
        debug!(
            chunk = chunk.index,
            attempt,
            response = %truncate_chars(&completion.text, self.log_max_chars),
            "chunk response"
        );

        let entries = decode_chunk_response(&completion.text)?;
        if self.enforce_key_set {
            let diff = compare_key_sets(&chunk.entries, &entries);
            if !diff.is_empty() {
                return Err(ChunkFailure::malformed(format!(
                    "response keys differ from chunk: {}",
                    diff.describe()
                )));
            }
        }
        Ok(TranslatedChunk {
            entries,
            usage: completion.usage,
        })
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{ChatCompletion, ChatRole, ProviderError};

    struct Canned {
        reply: Result<String, u16>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Canned {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn status(code: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(code),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for Canned {
        async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, ProviderError> {
            self.seen.lock().expect("lock").push(request);
            match &self.reply {
                Ok(text) => Ok(ChatCompletion {
                    text: text.clone(),
                    usage: Some(TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                    }),
                }),
                Err(401) => Err(ProviderError::Unauthorized {
                    status: 401,
                    body: "bad key".to_string(),
                }),
                Err(code) => Err(ProviderError::Status {
                    status: *code,
                    body: "boom".to_string(),
                }),
            }
        }
    }

    fn chunk(v: Value) -> Chunk {
        match v {
            Value::Object(entries) => Chunk { index: 0, entries },
            _ => panic!("not an object"),
        }
    }

    fn translator(provider: Arc<Canned>) -> ChunkTranslator {
        ChunkTranslator::new(
            provider,
            PromptCatalog::default(),
            ModelConfig::default(),
            "Spanish",
            "A greeting card app",
        )
    }

    #[tokio::test]
    async fn sends_messages_and_parses_fenced_reply() {
        let provider = Canned::ok("```json\n{\"greeting\":\"Hola\"}\n```");
        let t = translator(provider.clone());
        let out = t
            .translate_one(&chunk(json!({"greeting": "Hello"})), 1)
            .await
            .expect("translate");
        assert_eq!(Value::Object(out.entries), json!({"greeting": "Hola"}));
        assert_eq!(out.usage.map(|u| u.total()), Some(15));

        let seen = provider.seen.lock().expect("lock");
        let req = &seen[0];
        assert_eq!(req.model, DEFAULT_MODEL);
        assert_eq!(req.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(req.messages[0].role, ChatRole::System);
        assert!(req.messages[1].content.contains(r#"{"greeting":"Hello"}"#));
        assert!(req.messages[1].content.contains("Target Language: Spanish"));
    }

    #[tokio::test]
    async fn classifies_failures() {
        let t = translator(Canned::ok("Sure! Here it is: {\"greeting\": \"Hola\"}"));
        let err = t.translate_one(&chunk(json!({"greeting": "Hello"})), 1).await.expect_err("prose");
        assert_eq!(err.kind, ErrorKind::MalformedResponse);

        let t = translator(Canned::status(503));
        let err = t.translate_one(&chunk(json!({"greeting": "Hello"})), 1).await.expect_err("503");
        assert_eq!(err.kind, ErrorKind::Provider);

        let t = translator(Canned::status(401));
        let err = t.translate_one(&chunk(json!({"greeting": "Hello"})), 1).await.expect_err("401");
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[tokio::test]
    async fn key_set_is_only_checked_when_enforced() {
        let reply = "{\"greeting\":\"Hola\",\"extra\":\"x\"}";
        let lenient = translator(Canned::ok(reply));
        let out = lenient
            .translate_one(&chunk(json!({"greeting": "Hello"})), 1)
            .await
            .expect("lenient");
        assert_eq!(out.entries.len(), 2);

        let strict = translator(Canned::ok(reply)).enforce_key_set(true);
        let err = strict
            .translate_one(&chunk(json!({"greeting": "Hello"})), 1)
            .await
            .expect_err("strict");
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.message.contains("unexpected keys: extra"));
    }

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé…");
    }
}
