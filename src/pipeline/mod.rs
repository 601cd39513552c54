pub mod chunker;
mod config;
pub mod merge;
mod orchestrator;
pub mod prompts;
mod report;
pub mod retry;
pub mod scheduler;
pub mod split;
mod trace;
mod translator;

pub use chunker::{chunk_document, Chunk, ChunkPolicy};
pub use config::{init_default_config, ConfigOverrides, PipelineConfig, ProviderSettings};
pub use merge::{merge, IntegrityReport, MergedDocument};
pub use orchestrator::{
    parse_document, translate, Credentials, FailedChunk, OpenAiFactory, Orchestrator, ProviderFactory, SharedProvider,
    TranslationOutcome, TranslationRequest,
};
pub use report::{RunReportFile, RUN_REPORT_FILE};
pub use retry::{BackoffPolicy, RetryPolicy};
pub use scheduler::{FailurePolicy, SchedulePolicy};
pub use trace::TraceWriter;
pub use translator::{ChunkTranslator, ModelConfig, TranslatedChunk};
