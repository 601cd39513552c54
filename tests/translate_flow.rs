use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use json_translator::models::{ChatCompletion, ChatProvider, ChatRequest, ProviderError, TokenUsage};
use json_translator::pipeline::{
    parse_document, BackoffPolicy, ChunkPolicy, Credentials, FailurePolicy, ModelConfig, Orchestrator, PipelineConfig,
    ProviderSettings, RetryPolicy, SchedulePolicy, TranslationRequest,
};
use json_translator::progress::{NoProgress, RunProgress};
use json_translator::{ErrorKind, TranslateError};

/// Deterministic stand-in for a model: looks every string leaf up in a dictionary, answers inside a
/// code fence, fails on demand for chunks holding a poisoned key, and can leave one key out of
/// its answers.
struct Dictionary {
    words: HashMap<&'static str, &'static str>,
    poisoned: Option<&'static str>,
    forgets: Option<&'static str>,
    models: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl Dictionary {
    fn spanish() -> Self {
        Self {
            words: HashMap::from([("Hello", "Hola"), ("Bye", "Adiós"), ("Save {name}", "Guardar {name}")]),
            poisoned: None,
            forgets: None,
            models: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn forgetful(key: &'static str) -> Self {
        Self {
            forgets: Some(key),
            ..Self::spanish()
        }
    }

    fn poisoned(key: &'static str) -> Self {
        Self {
            poisoned: Some(key),
            ..Self::spanish()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn translate(&self, v: Value) -> Value {
        match v {
            Value::String(s) => Value::String(self.words.get(s.as_str()).map_or(s, |t| (*t).to_string())),
            Value::Array(items) => Value::Array(items.into_iter().map(|i| self.translate(i)).collect()),
            Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, self.translate(v))).collect()),
            other => other,
        }
    }
}

fn chunk_of(request: &ChatRequest) -> Map<String, Value> {
    let user = &request.messages.last().expect("user message").content;
    let start = user.rfind("\n\n{").expect("chunk json in prompt");
    match serde_json::from_str(&user[start + 2..]).expect("chunk json parses") {
        Value::Object(map) => map,
        other => panic!("chunk is not an object: {other}"),
    }
}

#[async_trait]
impl ChatProvider for Dictionary {
    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().expect("lock").push(request.model.clone());
        let mut chunk = chunk_of(&request);
        if let Some(key) = self.forgets {
            chunk.remove(key);
        }
        if let Some(key) = self.poisoned {
            if chunk.contains_key(key) {
                return Ok(ChatCompletion {
                    text: "Sorry, I can't help with that.".to_string(),
                    usage: None,
                });
            }
        }
        let translated = self.translate(Value::Object(chunk));
        Ok(ChatCompletion {
            text: format!("```json\n{translated}\n```"),
            usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            }),
        })
    }
}

fn obj(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("not an object"),
    }
}

fn config(chunking: ChunkPolicy) -> PipelineConfig {
    PipelineConfig {
        chunking,
        retry: RetryPolicy {
            max_attempts: 2,
            backoff: BackoffPolicy::Fixed(Duration::from_millis(10)),
            attempt_timeout: Duration::from_secs(5),
        },
        schedule: SchedulePolicy {
            inter_batch_delay: Duration::ZERO,
            ..SchedulePolicy::default()
        },
        ..PipelineConfig::default()
    }
}

fn request(document: Map<String, Value>) -> TranslationRequest {
    TranslationRequest::new(document, "Spanish", Credentials::new(Some("sk-test".to_string())))
}

#[tokio::test]
async fn translates_greeting_file_to_spanish() {
    let provider = Arc::new(Dictionary::spanish());
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::entries(1)), provider.clone());
    let source = parse_document(r#"{"greeting":"Hello","farewell":"Bye"}"#).expect("valid json");

    let outcome = orchestrator
        .translate(request(source), &NoProgress)
        .await
        .expect("translation succeeds");

    assert_eq!(
        Value::Object(outcome.document.clone()),
        json!({"greeting": "Hola", "farewell": "Adiós"})
    );
    let keys: Vec<&str> = outcome.document.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["greeting", "farewell"]);
    assert_eq!(outcome.total_chunks, 2);
    assert_eq!(provider.calls(), 2);
    assert_eq!(outcome.usage.total(), 240);
    assert!(outcome.integrity.is_clean());
    assert!(outcome.is_complete());
    assert!(outcome.to_pretty_json().expect("json").contains("\"greeting\": \"Hola\""));
}

#[tokio::test]
async fn dropped_key_is_reported_and_marks_the_run_incomplete() {
    let provider = Arc::new(Dictionary::forgetful("farewell"));
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::default()), provider);

    let outcome = orchestrator
        .translate(request(obj(json!({"greeting": "Hello", "farewell": "Bye"}))), &NoProgress)
        .await
        .expect("reply parses");

    assert_eq!(Value::Object(outcome.document.clone()), json!({"greeting": "Hola"}));
    assert_eq!(outcome.integrity.missing, vec!["farewell".to_string()]);
    assert!(outcome.failed_chunks.is_empty());
    assert!(!outcome.is_complete());
}

#[tokio::test]
async fn request_without_model_uses_the_configured_one() {
    let provider = Arc::new(Dictionary::spanish());
    let mut cfg = config(ChunkPolicy::default());
    cfg.model.model = "gpt-4.1-nano".to_string();
    let orchestrator = Orchestrator::with_provider(cfg, provider.clone());

    orchestrator
        .translate(request(obj(json!({"a": "Hello"}))), &NoProgress)
        .await
        .expect("run");
    orchestrator
        .translate(
            request(obj(json!({"a": "Bye"}))).with_model(ModelConfig {
                model: "gpt-4o".to_string(),
                temperature: 0.0,
            }),
            &NoProgress,
        )
        .await
        .expect("run");

    assert_eq!(
        *provider.models.lock().expect("lock"),
        vec!["gpt-4.1-nano".to_string(), "gpt-4o".to_string()]
    );
}

#[tokio::test]
async fn identical_runs_give_identical_output() {
    let provider = Arc::new(Dictionary::spanish());
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::entries(1)), provider);
    let source = obj(json!({"a": "Hello", "b": "Bye", "c": "Hello"}));

    let first = orchestrator
        .translate(request(source.clone()), &NoProgress)
        .await
        .expect("first run");
    let second = orchestrator
        .translate(request(source), &NoProgress)
        .await
        .expect("second run");
    assert_eq!(first.document, second.document);
}

#[tokio::test]
async fn non_string_leaves_and_key_order_survive() {
    let provider = Arc::new(Dictionary::spanish());
    let mut cfg = config(ChunkPolicy::entries(2));
    cfg.schedule.concurrency = 3;
    let orchestrator = Orchestrator::with_provider(cfg, provider);
    let source = obj(json!({
        "zeta": 1,
        "alpha": true,
        "menu": {"items": ["Hello", 2.5, null], "label": "Bye"},
        "empty": {},
        "title": "Save {name}"
    }));

    let outcome = orchestrator
        .translate(request(source.clone()), &NoProgress)
        .await
        .expect("translation succeeds");

    let keys: Vec<&str> = outcome.document.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["zeta", "alpha", "menu", "empty", "title"]);
    assert_eq!(
        Value::Object(outcome.document),
        json!({
            "zeta": 1,
            "alpha": true,
            "menu": {"items": ["Hola", 2.5, null], "label": "Adiós"},
            "empty": {},
            "title": "Guardar {name}"
        })
    );
    assert_eq!(outcome.total_chunks, 3);
    assert!(outcome.quality.is_empty());
}

#[tokio::test(start_paused = true)]
async fn one_unrecoverable_chunk_fails_the_whole_run() {
    let provider = Arc::new(Dictionary::poisoned("b"));
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::entries(1)), provider.clone());
    let source = obj(json!({"a": "Hello", "b": "Bye", "c": "Hello", "d": "Bye"}));

    let err = orchestrator
        .translate(request(source), &NoProgress)
        .await
        .expect_err("chunk 2 never parses");

    match &err {
        TranslateError::ChunkFailed { index, total, failure } => {
            assert_eq!(*index, 1);
            assert_eq!(*total, 4);
            assert_eq!(failure.kind, ErrorKind::MalformedResponse);
            assert_eq!(failure.attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.status_code(), 422);
    // chunk 1 once, chunk 2 twice, chunks 3 and 4 never
    assert_eq!(provider.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn keep_source_policy_returns_a_partial_document() {
    let provider = Arc::new(Dictionary::poisoned("b"));
    let mut cfg = config(ChunkPolicy::entries(1));
    cfg.schedule.failure_policy = FailurePolicy::KeepSource;
    let orchestrator = Orchestrator::with_provider(cfg, provider.clone());
    let source = obj(json!({"a": "Hello", "b": "Bye", "c": "Hello"}));

    let outcome = orchestrator
        .translate(request(source), &NoProgress)
        .await
        .expect("partial result");

    assert_eq!(
        Value::Object(outcome.document.clone()),
        json!({"a": "Hola", "b": "Bye", "c": "Hola"})
    );
    assert!(!outcome.is_complete());
    assert_eq!(outcome.failed_chunks.len(), 1);
    assert_eq!(outcome.failed_chunks[0].index, 1);
    assert_eq!(outcome.failed_chunks[0].keys, vec!["b".to_string()]);
    assert_eq!(outcome.usage.prompt_tokens, 200);
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn oversize_documents_are_rejected_before_any_call() {
    let provider = Arc::new(Dictionary::spanish());
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::entries(1)), provider.clone());
    let source: Map<String, Value> = (0..51)
        .map(|i| (format!("key_{i:02}"), Value::String(format!("value {i}"))))
        .collect();

    let err = orchestrator
        .translate(request(source), &NoProgress)
        .await
        .expect_err("51 chunks exceeds 50");

    assert!(matches!(err, TranslateError::TooLarge { chunks: 51, max_chunks: 50 }));
    assert_eq!(err.status_code(), 413);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn missing_credentials_fail_before_any_call() {
    let provider = Arc::new(Dictionary::spanish());
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::default()), provider.clone());
    let req = TranslationRequest::new(obj(json!({"a": "Hello"})), "Spanish", Credentials::default());

    let err = orchestrator
        .translate(req, &NoProgress)
        .await
        .expect_err("no key");

    assert!(matches!(err, TranslateError::Config(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn empty_document_needs_no_calls() {
    let provider = Arc::new(Dictionary::spanish());
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::default()), provider.clone());

    let outcome = orchestrator
        .translate(request(Map::new()), &NoProgress)
        .await
        .expect("empty is fine");

    assert!(outcome.document.is_empty());
    assert_eq!(outcome.total_chunks, 0);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn progress_reaches_every_chunk() {
    let provider = Arc::new(Dictionary::spanish());
    let orchestrator = Orchestrator::with_provider(config(ChunkPolicy::entries(1)), provider);
    let seen: Mutex<Vec<RunProgress>> = Mutex::new(Vec::new());
    let observer = |p: RunProgress| seen.lock().expect("lock").push(p);

    orchestrator
        .translate(request(obj(json!({"a": "Hello", "b": "Bye", "c": "Hello"}))), &observer)
        .await
        .expect("run");

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 3);
    assert!(seen.last().expect("last").is_done());
}

#[tokio::test]
async fn trace_mode_writes_run_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(ChunkPolicy::entries(1));
    cfg.trace_prompts = true;
    cfg.trace_dir = dir.path().join("_trace");
    let orchestrator = Orchestrator::with_provider(cfg, Arc::new(Dictionary::spanish()));

    orchestrator
        .translate(request(obj(json!({"a": "Hello", "b": "Bye"}))), &NoProgress)
        .await
        .expect("run");

    let report: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("_trace").join("run_report.json")).expect("report"),
    )
    .expect("report json");
    assert_eq!(report["total_chunks"], json!(2));
    assert_eq!(report["chunks"][1]["status"], json!("translated"));
    assert!(dir.path().join("_trace").join("chunk_0000.attempt1.prompt.txt").exists());
}

#[tokio::test]
async fn openai_provider_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let content = "```json\n{\"greeting\":\"Hola\",\"farewell\":\"Adiós\"}\n```";
    let body = json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 321, "completion_tokens": 12}
    });
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .expect(1)
        .create_async()
        .await;

    let mut cfg = config(ChunkPolicy::default());
    cfg.provider = ProviderSettings {
        base_url: server.url(),
        prompt_price_per_million: Some(1.0),
        completion_price_per_million: Some(2.0),
        ..ProviderSettings::default()
    };
    let orchestrator = Orchestrator::with_openai(cfg);
    let outcome = orchestrator
        .translate(
            request(obj(json!({"greeting": "Hello", "farewell": "Bye"}))),
            &NoProgress,
        )
        .await
        .expect("translation succeeds");

    mock.assert_async().await;
    assert_eq!(
        Value::Object(outcome.document),
        json!({"greeting": "Hola", "farewell": "Adiós"})
    );
    assert_eq!(outcome.usage.prompt_tokens, 321);
    let cost = outcome.estimated_cost_usd.expect("prices configured");
    assert!((cost - (321.0 + 24.0) / 1_000_000.0).abs() < 1e-12);
}
