use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::{ChunkFailure, TranslateError};
use crate::lang::lang_label;
use crate::models::{ChatProvider, OpenAiChatProvider, OpenAiConfig, ProviderError, TokenUsage};
use crate::progress::ProgressObserver;
use crate::quality::{check_placeholders, json_type_name, QualityIssue};

use super::chunker::{chunk_document, Chunk};
use super::config::PipelineConfig;
use super::merge::{merge, IntegrityReport};
use super::report::{chunk_records, write_report_file, RunReportFile, RUN_REPORT_FILE, RUN_REPORT_SCHEMA};
use super::retry::{with_retry, Attempted};
use super::scheduler::{check_size, run_all, ChunkResult, FailurePolicy};
use super::trace::TraceWriter;
use super::translator::{ChunkTranslator, ModelConfig, TranslatedChunk};

/// Provider credentials supplied with a request. The key never shows up in `Debug` output.
#[derive(Clone, Default)]
pub struct Credentials {
    api_key: Option<String>,
}

impl Credentials {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn require(&self) -> Result<&str, TranslateError> {
        self.api_key().ok_or_else(|| {
            TranslateError::Config(
                "no API key configured (set OPENAI_API_KEY or provider.api_key)".to_string(),
            )
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct TranslationRequest {
    pub document: Map<String, Value>,
    pub target_language: String,
    /// Free-text context for the model; may be empty.
    pub context_prompt: String,
    /// Falls back to the orchestrator's configured model when unset.
    pub model: Option<ModelConfig>,
    pub credentials: Credentials,
}

impl TranslationRequest {
    pub fn new(document: Map<String, Value>, target_language: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            document,
            target_language: target_language.into(),
            context_prompt: String::new(),
            model: None,
            credentials,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context_prompt: impl Into<String>) -> Self {
        self.context_prompt = context_prompt.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = Some(model);
        self
    }
}

/// Parse uploaded text into a source document. Only a top-level JSON object is accepted.
pub fn parse_document(text: &str) -> Result<Map<String, Value>, TranslateError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TranslateError::InvalidInputJson(format!(
            "expected a JSON object, found {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(TranslateError::InvalidInputJson(e.to_string())),
    }
}

/// Builds the provider for one run from that run's credentials.
pub trait ProviderFactory: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ChatProvider>, ProviderError>;
}

pub struct OpenAiFactory {
    pub base_url: String,
    pub request_timeout: std::time::Duration,
}

impl ProviderFactory for OpenAiFactory {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        let api_key = credentials.api_key().ok_or(ProviderError::MissingCredentials)?;
        let provider = OpenAiChatProvider::new(OpenAiConfig {
            base_url: self.base_url.clone(),
            api_key: api_key.to_string(),
            request_timeout: self.request_timeout,
        })?;
        Ok(Arc::new(provider))
    }
}

/// Hands out the same provider for every run, whatever the credentials.
pub struct SharedProvider(pub Arc<dyn ChatProvider>);

impl ProviderFactory for SharedProvider {
    fn connect(&self, _credentials: &Credentials) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        Ok(Arc::clone(&self.0))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailedChunk {
    pub index: usize,
    pub keys: Vec<String>,
    pub failure: ChunkFailure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranslationOutcome {
    pub document: Map<String, Value>,
    pub usage: TokenUsage,
    pub estimated_cost_usd: Option<f64>,
    pub integrity: IntegrityReport,
    pub quality: Vec<QualityIssue>,
    /// Chunks that kept their source text. Always empty under the abort policy.
    pub failed_chunks: Vec<FailedChunk>,
    pub total_chunks: usize,
}

impl TranslationOutcome {
    fn empty() -> Self {
        Self {
            document: Map::new(),
            usage: TokenUsage::default(),
            estimated_cost_usd: None,
            integrity: IntegrityReport::default(),
            quality: Vec::new(),
            failed_chunks: Vec::new(),
            total_chunks: 0,
        }
    }

    /// True only when every chunk translated and every source key came back.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty() && self.integrity.missing.is_empty()
    }

    pub fn to_pretty_json(&self) -> anyhow::Result<String> {
        let mut text = serde_json::to_string_pretty(&self.document)?;
        text.push('\n');
        Ok(text)
    }
}

/// Runs a whole document through chunking, scheduling, retries and merging.
pub struct Orchestrator {
    cfg: PipelineConfig,
    factory: Arc<dyn ProviderFactory>,
    trace: Arc<TraceWriter>,
}

impl Orchestrator {
    pub fn new(cfg: PipelineConfig, factory: Arc<dyn ProviderFactory>) -> Self {
        let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts).unwrap_or_else(|e| {
            warn!("trace output disabled: {e:#}");
            TraceWriter::disabled()
        });
        Self {
            cfg,
            factory,
            trace: Arc::new(trace),
        }
    }

    pub fn with_openai(cfg: PipelineConfig) -> Self {
        let factory = OpenAiFactory {
            base_url: cfg.provider.base_url.clone(),
            request_timeout: cfg.provider.request_timeout,
        };
        Self::new(cfg, Arc::new(factory))
    }

    pub fn with_provider(cfg: PipelineConfig, provider: Arc<dyn ChatProvider>) -> Self {
        Self::new(cfg, Arc::new(SharedProvider(provider)))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub async fn translate(
        &self,
        request: TranslationRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<TranslationOutcome, TranslateError> {
        let TranslationRequest {
            document,
            target_language,
            context_prompt,
            model,
            credentials,
        } = request;
        credentials.require()?;
        let model = model.unwrap_or_else(|| self.cfg.model.clone());

        let chunks = chunk_document(&document, &self.cfg.chunking);
        let total = chunks.len();
        if chunks.is_empty() {
            info!("source document is empty; nothing to translate");
            return Ok(TranslationOutcome::empty());
        }
        check_size(total, &self.cfg.schedule)?;

        let provider = self.connect(&credentials)?;
        let translator = self.translator(provider, &target_language, &context_prompt, &model);
        observer.on_message(&format!(
            "Translating {} keys in {total} chunks to {} with {}",
            document.len(),
            lang_label(&target_language),
            model.model
        ));

        let retry = &self.cfg.retry;
        let report = run_all(&chunks, &self.cfg.schedule, observer, |index, chunk| {
            let translator = &translator;
            let label = format!("chunk {}/{total}", index + 1);
            async move { with_retry(retry, &label, |attempt| translator.translate_one(chunk, attempt)).await }
        })
        .await?;

        let records = self
            .trace
            .is_enabled()
            .then(|| chunk_records(&chunks, &report.results));

        if let Some((index, failure)) = report.first_failure.clone() {
            if self.cfg.schedule.failure_policy == FailurePolicy::Abort {
                error!(chunk = index + 1, total, attempts = failure.attempts, "aborting run: {failure}");
                if let Some(records) = records {
                    let usage = sum_usage(&report.results);
                    self.write_run_report(RunReportFile {
                        schema: RUN_REPORT_SCHEMA.to_string(),
                        target_language: target_language.clone(),
                        model: model.model.clone(),
                        total_chunks: total,
                        failed_chunks: report.results.iter().filter(|r| r.is_failed()).count(),
                        usage,
                        estimated_cost_usd: self.estimate_cost(usage),
                        integrity: IntegrityReport::default(),
                        quality: Vec::new(),
                        chunks: records,
                    });
                }
                return Err(TranslateError::ChunkFailed { index, total, failure });
            }
        }

        let usage = sum_usage(&report.results);
        let mut failed_chunks = Vec::new();
        let mut parts = Vec::with_capacity(total);
        for (chunk, result) in chunks.iter().zip(report.results) {
            match result {
                ChunkResult::Translated(done) => parts.push(done.value.entries),
                ChunkResult::Failed(failure) => {
                    warn!(chunk = chunk.index + 1, total, "keeping source text for failed chunk");
                    failed_chunks.push(FailedChunk {
                        index: chunk.index,
                        keys: chunk.keys().map(str::to_string).collect(),
                        failure,
                    });
                    parts.push(chunk.entries.clone());
                }
            }
        }

        let merged = merge(&document, parts);
        let quality = check_placeholders(&document, &merged.document);
        for issue in &quality {
            warn!(path = %issue.path, missing = ?issue.missing_tokens, "translation dropped protected tokens");
        }
        let estimated_cost_usd = self.estimate_cost(usage);

        info!(
            chunks = total,
            failed = failed_chunks.len(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "translation finished"
        );

        if let Some(records) = records {
            self.write_run_report(RunReportFile {
                schema: RUN_REPORT_SCHEMA.to_string(),
                target_language,
                model: model.model,
                total_chunks: total,
                failed_chunks: failed_chunks.len(),
                usage,
                estimated_cost_usd,
                integrity: merged.integrity.clone(),
                quality: quality.clone(),
                chunks: records,
            });
        }

        Ok(TranslationOutcome {
            document: merged.document,
            usage,
            estimated_cost_usd,
            integrity: merged.integrity,
            quality,
            failed_chunks,
            total_chunks: total,
        })
    }

    /// Translate one chunk on its own, with the same retry rules as a full run.
    pub async fn translate_chunk(
        &self,
        chunk: &Chunk,
        total: usize,
        target_language: &str,
        context_prompt: &str,
        model: &ModelConfig,
        credentials: &Credentials,
    ) -> Result<Attempted<TranslatedChunk>, TranslateError> {
        credentials.require()?;
        let provider = self.connect(credentials)?;
        let translator = self.translator(provider, target_language, context_prompt, model);
        let label = format!("chunk {}/{total}", chunk.index + 1);
        with_retry(&self.cfg.retry, &label, |attempt| translator.translate_one(chunk, attempt))
            .await
            .map_err(|failure| TranslateError::ChunkFailed {
                index: chunk.index,
                total,
                failure,
            })
    }

    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ChatProvider>, TranslateError> {
        self.factory
            .connect(credentials)
            .map_err(|e| TranslateError::Config(e.to_string()))
    }

    fn translator(
        &self,
        provider: Arc<dyn ChatProvider>,
        target_language: &str,
        context_prompt: &str,
        model: &ModelConfig,
    ) -> ChunkTranslator {
        ChunkTranslator::new(
            provider,
            self.cfg.prompts.clone(),
            model.clone(),
            target_language,
            context_prompt,
        )
        .enforce_key_set(self.cfg.enforce_key_set)
        .log_max_chars(self.cfg.log_max_chars)
        .trace(Arc::clone(&self.trace))
    }

    fn estimate_cost(&self, usage: TokenUsage) -> Option<f64> {
        match (
            self.cfg.provider.prompt_price_per_million,
            self.cfg.provider.completion_price_per_million,
        ) {
            (Some(p), Some(c)) => Some(usage.estimated_cost(p, c)),
            _ => None,
        }
    }

    fn write_run_report(&self, report: RunReportFile) {
        let path = self.trace.dir().join(RUN_REPORT_FILE);
        if let Err(e) = write_report_file(&path, &report) {
            warn!("failed to write run report: {e:#}");
        }
    }
}

/// One-shot run against the configured OpenAI-compatible endpoint.
pub async fn translate(
    request: TranslationRequest,
    cfg: PipelineConfig,
    observer: &dyn ProgressObserver,
) -> Result<TranslationOutcome, TranslateError> {
    Orchestrator::with_openai(cfg).translate(request, observer).await
}

/// Usage of successful attempts only; failed attempts report nothing back.
fn sum_usage(results: &[ChunkResult<Attempted<TranslatedChunk>>]) -> TokenUsage {
    let mut usage = TokenUsage::default();
    for r in results {
        if let ChunkResult::Translated(done) = r {
            if let Some(u) = done.value.usage {
                usage.add(u);
            }
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_only_objects() {
        let doc = parse_document("\u{feff}{\"a\": 1}").expect("object");
        assert_eq!(doc["a"], json!(1));

        assert!(matches!(
            parse_document("[1, 2]"),
            Err(TranslateError::InvalidInputJson(msg)) if msg.contains("array")
        ));
        assert!(matches!(
            parse_document("{\"a\": "),
            Err(TranslateError::InvalidInputJson(_))
        ));
    }

    #[test]
    fn credentials_hide_the_key() {
        let creds = Credentials::new(Some("sk-secret".to_string()));
        assert_eq!(creds.api_key(), Some("sk-secret"));
        assert!(!format!("{creds:?}").contains("sk-secret"));

        let blank = Credentials::new(Some("   ".to_string()));
        assert!(matches!(blank.require(), Err(TranslateError::Config(_))));
    }

    #[test]
    fn openai_factory_needs_a_key() {
        let factory = OpenAiFactory {
            base_url: "http://127.0.0.1:1/v1".to_string(),
            request_timeout: std::time::Duration::from_secs(1),
        };
        assert!(matches!(
            factory.connect(&Credentials::default()),
            Err(ProviderError::MissingCredentials)
        ));
        assert!(factory
            .connect(&Credentials::new(Some("sk-test".to_string())))
            .is_ok());
    }
}
