use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::error::ChunkFailure;
use crate::models::TokenUsage;
use crate::quality::QualityIssue;

use super::chunker::Chunk;
use super::merge::IntegrityReport;
use super::retry::Attempted;
use super::scheduler::ChunkResult;
use super::translator::TranslatedChunk;

pub const RUN_REPORT_FILE: &str = "run_report.json";
pub const RUN_REPORT_SCHEMA: &str = "json-translator.run-report.v1";

#[derive(Clone, Debug, Serialize)]
pub struct RunReportFile {
    pub schema: String,
    pub target_language: String,
    pub model: String,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
    pub integrity: IntegrityReport,
    pub quality: Vec<QualityIssue>,
    pub chunks: Vec<ChunkRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChunkRecord {
    pub index: usize,
    pub keys: Vec<String>,
    /// "translated", "failed" or "skipped" (never started after an abort).
    pub status: &'static str,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ChunkFailure>,
}

pub fn chunk_records(
    chunks: &[Chunk],
    results: &[ChunkResult<Attempted<TranslatedChunk>>],
) -> Vec<ChunkRecord> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let keys = chunk.keys().map(str::to_string).collect();
            match results.get(i) {
                Some(ChunkResult::Translated(done)) => ChunkRecord {
                    index: chunk.index,
                    keys,
                    status: "translated",
                    attempts: done.attempts,
                    usage: done.value.usage,
                    error: None,
                },
                Some(ChunkResult::Failed(failure)) => ChunkRecord {
                    index: chunk.index,
                    keys,
                    status: "failed",
                    attempts: failure.attempts,
                    usage: None,
                    error: Some(failure.clone()),
                },
                None => ChunkRecord {
                    index: chunk.index,
                    keys,
                    status: "skipped",
                    attempts: 0,
                    usage: None,
                    error: None,
                },
            }
        })
        .collect()
}

pub fn write_report_file(path: &Path, report: &RunReportFile) -> anyhow::Result<()> {
    let mut buf = serde_json::to_string_pretty(report).context("serialize run report")?;
    buf.push('\n');
    std::fs::write(path, buf).with_context(|| format!("write run report: {}", path.display()))?;
    Ok(())
}
