pub mod config;
pub mod error;
pub mod lang;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod quality;

pub use error::{ChunkFailure, ErrorKind, TranslateError, UserHint};
pub use pipeline::{translate, Orchestrator, PipelineConfig, TranslationOutcome, TranslationRequest};
