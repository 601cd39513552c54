use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
use crate::models::openai::DEFAULT_BASE_URL;
use crate::pipeline::chunker::ChunkPolicy;
use crate::pipeline::prompts::{default_prompt_files, PromptCatalog, DEFAULT_PROMPTS_DIR};
use crate::pipeline::retry::{BackoffPolicy, RetryPolicy, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BASE_DELAY};
use crate::pipeline::scheduler::{FailurePolicy, SchedulePolicy};
use crate::pipeline::translator::ModelConfig;

pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub prompt_price_per_million: Option<f64>,
    pub completion_price_per_million: Option<f64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            request_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            prompt_price_per_million: None,
            completion_price_per_million: None,
        }
    }
}

/// Everything one run needs, resolved from defaults, the config file and CLI overrides (in that
/// order of precedence, lowest first).
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: Option<PathBuf>,

    pub provider: ProviderSettings,
    pub model: ModelConfig,

    pub chunking: ChunkPolicy,
    pub retry: RetryPolicy,
    pub schedule: SchedulePolicy,
    pub enforce_key_set: bool,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,
    pub log_max_chars: usize,

    pub prompts: PromptCatalog,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            provider: ProviderSettings::default(),
            model: ModelConfig::default(),
            chunking: ChunkPolicy::default(),
            retry: RetryPolicy::default(),
            schedule: SchedulePolicy::default(),
            enforce_key_set: false,
            trace_dir: PathBuf::from("_trace"),
            trace_prompts: false,
            log_max_chars: 240,
            prompts: PromptCatalog::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub max_entries: Option<usize>,
    pub max_chunks: Option<usize>,
    pub failure_policy: Option<String>,
    pub trace_prompts: Option<bool>,
}

impl PipelineConfig {
    /// Locate and read the config file (explicit path, env var, or upward search), then apply
    /// overrides. A missing file is not an error.
    pub fn load(workdir: &Path, config_path: Option<PathBuf>, overrides: ConfigOverrides) -> anyhow::Result<Self> {
        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| find_default_config(workdir, DEFAULT_CONFIG_FILE));

        let mut file_cfg = AppConfig::default();
        let mut loaded_from = None;
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                loaded_from = Some(p.clone());
            }
        }
        let cfg_path = loaded_from
            .clone()
            .unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_FILE));

        let mut cfg = Self::from_app_config(&file_cfg, &cfg_path, workdir, overrides, |name| {
            std::env::var(name).ok()
        })?;
        cfg.config_path = loaded_from;
        Ok(cfg)
    }

    /// Resolve a parsed config file. `env` looks up environment variables (injected for tests).
    pub fn from_app_config(
        file_cfg: &AppConfig,
        cfg_path: &Path,
        workdir: &Path,
        overrides: ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let p = &file_cfg.provider;

        let api_key_env = p
            .api_key_env
            .clone()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
        let api_key = overrides
            .api_key
            .or_else(|| p.api_key.clone())
            .or_else(|| env(&api_key_env))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let request_timeout = p
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.provider.request_timeout);
        let provider = ProviderSettings {
            base_url: overrides
                .base_url
                .or_else(|| p.base_url.clone())
                .unwrap_or(defaults.provider.base_url),
            api_key,
            request_timeout,
            prompt_price_per_million: p.prompt_price_per_million,
            completion_price_per_million: p.completion_price_per_million,
        };

        let model = ModelConfig {
            model: overrides
                .model
                .or_else(|| p.model.clone())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.model.model),
            temperature: p.temperature.unwrap_or(defaults.model.temperature),
        };

        // A bound of 0 disables that bound.
        let c = &file_cfg.chunking;
        let chunking = ChunkPolicy {
            max_entries: match overrides.max_entries.or(c.max_entries) {
                Some(0) => None,
                Some(n) => Some(n),
                None => defaults.chunking.max_entries,
            },
            max_bytes: match c.max_bytes {
                Some(0) => None,
                Some(n) => Some(n),
                None => defaults.chunking.max_bytes,
            },
        };

        let r = &file_cfg.retry;
        let base_delay = r
            .base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BASE_DELAY);
        let max_delay = r
            .max_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(60));
        let backoff = match r.backoff.as_deref() {
            Some(name) => BackoffPolicy::parse(name, base_delay, r.factor.unwrap_or(2.0), max_delay)
                .context("retry.backoff")?,
            None => BackoffPolicy::Linear(base_delay),
        };
        let retry = RetryPolicy {
            max_attempts: overrides
                .max_attempts
                .or(r.max_attempts)
                .unwrap_or(defaults.retry.max_attempts)
                .max(1),
            backoff,
            attempt_timeout: r
                .attempt_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(request_timeout),
        };

        let s = &file_cfg.schedule;
        let failure_policy = match overrides
            .failure_policy
            .or_else(|| file_cfg.pipeline.failure_policy.clone())
        {
            Some(name) => FailurePolicy::parse(&name).context("pipeline.failure_policy")?,
            None => FailurePolicy::Abort,
        };
        let schedule = SchedulePolicy {
            concurrency: overrides
                .concurrency
                .or(s.concurrency)
                .unwrap_or(defaults.schedule.concurrency)
                .max(1),
            inter_batch_delay: s
                .inter_batch_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.schedule.inter_batch_delay),
            max_chunks: overrides
                .max_chunks
                .or(s.max_chunks)
                .unwrap_or(defaults.schedule.max_chunks),
            failure_policy,
        };

        let trace_dir = file_cfg
            .pipeline
            .trace_dir
            .clone()
            .unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            workdir.join(trace_dir)
        };

        let prompts = PromptCatalog::load(cfg_path, file_cfg).context("load prompts")?;

        Ok(Self {
            config_path: Some(cfg_path.to_path_buf()),
            provider,
            model,
            chunking,
            retry,
            schedule,
            enforce_key_set: file_cfg.pipeline.enforce_key_set.unwrap_or(false),
            trace_dir,
            trace_prompts: overrides
                .trace_prompts
                .or(file_cfg.pipeline.trace_prompts)
                .unwrap_or(false),
            log_max_chars: file_cfg.pipeline.log_max_chars.unwrap_or(defaults.log_max_chars),
            prompts,
        })
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILE);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[provider]
base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
# The key is read from this environment variable unless `api_key` is set here.
api_key_env = "OPENAI_API_KEY"
temperature = 0.1
request_timeout_secs = 120
# Optional cost estimate (USD per million tokens).
# prompt_price_per_million = 0.15
# completion_price_per_million = 0.60

[chunking]
# A chunk closes before it would exceed either bound (0 disables a bound).
max_entries = 10
max_bytes = 1000

[retry]
max_attempts = 2
# "fixed", "linear" or "exponential"
backoff = "linear"
base_delay_ms = 3000
max_delay_ms = 60000
factor = 2.0
attempt_timeout_secs = 120

[schedule]
# 1 = strictly sequential.
concurrency = 1
inter_batch_delay_ms = 2000
max_chunks = 50

[pipeline]
trace_dir = "_trace"
trace_prompts = false
log_max_chars = 240
enforce_key_set = false
# "abort": any unrecoverable chunk fails the whole run.
# "keep_source": failed chunks keep their source text and are listed in the summary.
failure_policy = "abort"

[prompts]
system = "prompts/system.txt"
user = "prompts/user.txt"
"#;
