use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use json_translator::lang::{default_output_for, lang_label};
use json_translator::pipeline::split::{merge_dir, split_to_dir, translate_chunk_file};
use json_translator::pipeline::{
    init_default_config, parse_document, ConfigOverrides, Credentials, IntegrityReport, Orchestrator,
    PipelineConfig, TranslationRequest,
};
use json_translator::progress::ConsoleProgress;
use json_translator::TranslateError;

#[derive(Parser, Debug)]
#[command(name = "json-translator")]
#[command(about = "Translate JSON localization files chunk by chunk with an LLM", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .json (a top-level object)
    #[arg(value_name = "JSON")]
    input: Option<PathBuf>,

    /// Output .json (default: <input_stem>.<lang_code>.json)
    #[arg(short, long, value_name = "JSON")]
    output: Option<PathBuf>,

    /// Target language name or code (e.g. Spanish, es, pt-BR)
    #[arg(short, long)]
    language: Option<String>,

    /// Extra context for the translator (product, tone, audience)
    #[arg(short, long, default_value = "")]
    prompt: String,

    /// Model name (overrides provider.model)
    #[arg(long)]
    model: Option<String>,

    /// Config file path (default: search for json-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chunks translated in parallel per batch
    #[arg(long)]
    concurrency: Option<usize>,

    /// Attempts per chunk, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// "abort" (default) or "keep_source"
    #[arg(long)]
    failure_policy: Option<String>,

    /// Write prompts, raw responses and run_report.json to the trace dir
    #[arg(long)]
    trace: bool,

    /// Split the input into chunk files in DIR; with --chunk-index, translate one chunk of DIR
    #[arg(long, value_name = "DIR")]
    split_dir: Option<PathBuf>,

    /// Zero-based chunk index to translate (requires --split-dir)
    #[arg(long, requires = "split_dir")]
    chunk_index: Option<usize>,

    /// Merge the translated chunk files in DIR into -o
    #[arg(long, value_name = "DIR")]
    merge_dir: Option<PathBuf>,

    /// Only print warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.quiet);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(te) = e.downcast_ref::<TranslateError>() {
                eprintln!("hint: {} (status {})", te.user_hint().message(), te.status_code());
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "json_translator=warn" } else { "json_translator=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if let Some(dir) = args.merge_dir.as_ref() {
        let output = args.output.clone().context("missing -o/--output for --merge-dir")?;
        let merged = merge_dir(dir)?;
        write_document(&output, &merged.document)?;
        progress.info(format!("Wrote: {}", output.display()));
        return check_integrity(&progress, &merged.integrity);
    }

    let overrides = ConfigOverrides {
        model: args.model.clone(),
        concurrency: args.concurrency,
        max_attempts: args.max_attempts,
        failure_policy: args.failure_policy.clone(),
        trace_prompts: args.trace.then_some(true),
        ..ConfigOverrides::default()
    };

    if let (Some(dir), Some(index)) = (args.split_dir.as_ref(), args.chunk_index) {
        let language = args.language.clone().context("missing -l/--language")?;
        let cfg = PipelineConfig::load(dir, args.config.clone(), overrides).context("build config")?;
        let credentials = Credentials::new(cfg.provider.api_key.clone());
        let model = cfg.model.clone();
        let orchestrator = Orchestrator::with_openai(cfg);
        let out = translate_chunk_file(
            &orchestrator,
            dir,
            index,
            &language,
            &args.prompt,
            &model,
            &credentials,
        )
        .await?;
        progress.info(format!("Wrote: {}", out.display()));
        return Ok(());
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  json-translator <input.json> -l <language>\n\nTIPS:\n  - Default config search: json-translator.toml (upwards), or set JSON_TRANSLATOR_CONFIG.\n  - The API key is read from OPENAI_API_KEY unless the config says otherwise.\n"
            );
            return Ok(());
        }
    };
    let text = std::fs::read_to_string(&input)
        .with_context(|| format!("read input: {}", input.display()))?;
    let document = parse_document(&text)?;

    if let Some(dir) = args.split_dir.as_ref() {
        let cfg = PipelineConfig::load(workdir_of(&input), args.config.clone(), overrides)
            .context("build config")?;
        let manifest = split_to_dir(&document, &cfg.chunking, dir, Some(input.as_path()))?;
        progress.info(format!(
            "Split {} keys into {} chunk files in {}",
            document.len(),
            manifest.total_chunks,
            dir.display()
        ));
        return Ok(());
    }

    let language = args.language.clone().context("missing -l/--language")?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_for(&input, &language));

    let cfg = PipelineConfig::load(workdir_of(&input), args.config.clone(), overrides)
        .context("build config")?;
    if let Some(p) = cfg.config_path.as_ref() {
        progress.info(format!("Config: {}", p.display()));
    }
    progress.info(format!("Read JSON: {} ({} keys)", input.display(), document.len()));
    progress.info(format!("Language: {}", lang_label(&language)));

    let request = TranslationRequest::new(document, language, Credentials::new(cfg.provider.api_key.clone()))
        .with_context(args.prompt.clone());
    let orchestrator = Orchestrator::with_openai(cfg);
    let outcome = orchestrator.translate(request, &progress).await?;

    let text = outcome.to_pretty_json()?;
    std::fs::write(&output, text).with_context(|| format!("write output: {}", output.display()))?;
    progress.info(format!("Wrote: {}", output.display()));
    progress.info(format!(
        "Tokens: {} prompt + {} completion = {}",
        outcome.usage.prompt_tokens,
        outcome.usage.completion_tokens,
        outcome.usage.total()
    ));
    if let Some(cost) = outcome.estimated_cost_usd {
        progress.info(format!("Estimated cost: ${cost:.4}"));
    }
    if !outcome.failed_chunks.is_empty() {
        let failed: Vec<usize> = outcome.failed_chunks.iter().map(|f| f.index + 1).collect();
        progress.info(format!(
            "WARNING: {} of {} chunks kept their source text: {:?}",
            failed.len(),
            outcome.total_chunks,
            failed
        ));
    }
    if !outcome.quality.is_empty() {
        progress.info(format!(
            "WARNING: {} strings lost placeholders, tags or URLs (see log)",
            outcome.quality.len()
        ));
    }
    check_integrity(&progress, &outcome.integrity)
}

/// Print key deviations; missing source keys fail the run.
fn check_integrity(progress: &ConsoleProgress, integrity: &IntegrityReport) -> anyhow::Result<()> {
    if integrity.is_clean() {
        return Ok(());
    }
    progress.info(format!(
        "Key deviations: {} missing, {} unexpected, {} collisions",
        integrity.missing.len(),
        integrity.unexpected.len(),
        integrity.collisions.len()
    ));
    if !integrity.missing.is_empty() {
        anyhow::bail!(
            "translation incomplete: {} source keys missing from output: {:?}",
            integrity.missing.len(),
            integrity.missing
        );
    }
    Ok(())
}

fn workdir_of(input: &Path) -> &Path {
    input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn write_document(path: &Path, document: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<()> {
    let mut text = serde_json::to_string_pretty(document).context("serialize output json")?;
    text.push('\n');
    std::fs::write(path, text).with_context(|| format!("write output: {}", path.display()))
}
