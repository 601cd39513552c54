use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "json-translator.toml";
pub const CONFIG_ENV_VAR: &str = "JSON_TRANSLATOR_CONFIG";

/// On-disk configuration. Every field is optional; missing values fall back to the defaults in
/// [`crate::pipeline::PipelineConfig`].
#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub chunking: ChunkingSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProviderSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Inline key. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the key (default: OPENAI_API_KEY).
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// USD per million prompt tokens, for the cost estimate only.
    #[serde(default)]
    pub prompt_price_per_million: Option<f64>,
    #[serde(default)]
    pub completion_price_per_million: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ChunkingSection {
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// "fixed", "linear" or "exponential".
    #[serde(default)]
    pub backoff: Option<String>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub factor: Option<f32>,
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ScheduleSection {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub inter_batch_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_chunks: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
    #[serde(default)]
    pub log_max_chars: Option<usize>,

    /// Treat a response whose keys differ from the chunk's as malformed (and retry it).
    #[serde(default)]
    pub enforce_key_set: Option<bool>,

    /// "abort" (default): any unrecoverable chunk fails the run.
    /// "keep_source": failed chunks keep their source values and are listed in the outcome.
    #[serde(default)]
    pub failure_policy: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("parse config: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).context("parse config toml")?;
    Ok(cfg)
}
