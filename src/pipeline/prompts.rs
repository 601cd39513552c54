use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::{AppConfig, PromptsSection};
use crate::models::ChatMessage;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_SYSTEM: &str = "system.txt";
pub const DEFAULT_USER: &str = "user.txt";

static TEMPLATE_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-z_]+)\}\}").expect("template var regex"));

/// The two messages sent for one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkMessages {
    pub system: String,
    pub user: String,
}

impl ChunkMessages {
    #[must_use]
    pub fn into_chat(self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system), ChatMessage::user(self.user)]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptCatalog {
    pub system: String,
    pub user: String,
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_TEXT.to_string(),
            user: DEFAULT_USER_TEXT.to_string(),
        }
    }
}

impl PromptCatalog {
    /// Prompts referenced by the config, relative to the config file; built-ins otherwise.
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let p = &cfg.prompts;
        Ok(Self {
            system: read_prompt(config_dir, p, "system")?
                .unwrap_or_else(|| DEFAULT_SYSTEM_TEXT.to_string()),
            user: read_prompt(config_dir, p, "user")?
                .unwrap_or_else(|| DEFAULT_USER_TEXT.to_string()),
        })
    }

    /// Build the system and user messages for one chunk.
    pub fn build(&self, chunk_json: &str, language: &str, context: &str) -> ChunkMessages {
        let context = if context.trim().is_empty() {
            "(none)"
        } else {
            context.trim()
        };
        let vars = [
            ("context", context),
            ("target_language", language.trim()),
            ("chunk_json", chunk_json),
        ];
        ChunkMessages {
            system: render_template(&self.system, &vars),
            user: render_template(&self.user, &vars),
        }
    }
}

/// Build messages with the built-in prompts.
pub fn build_messages(chunk_json: &str, language: &str, context: &str) -> ChunkMessages {
    PromptCatalog::default().build(chunk_json, language, context)
}

fn read_prompt(config_dir: &Path, p: &PromptsSection, key: &str) -> anyhow::Result<Option<String>> {
    let path = match key {
        "system" => p.system.clone(),
        "user" => p.user.clone(),
        other => return Err(anyhow!("unknown prompt key: {other}")),
    };
    let Some(path) = path.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let mut p = PathBuf::from(path);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for {key}: {} (run: json-translator --init-config)",
            p.display()
        ));
    }
    let text = std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(Some(text))
}

/// Substitute `{{name}}` placeholders in one pass; inserted values are never re-expanded and
/// unknown names are left as written.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    TEMPLATE_VAR_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_SYSTEM, DEFAULT_SYSTEM_TEXT),
        (DEFAULT_USER, DEFAULT_USER_TEXT),
    ]
}

pub const DEFAULT_SYSTEM_TEXT: &str = r#"You are a professional translation assistant specializing in software localization. Your task is to translate JSON files while maintaining their structure and functionality.

CRITICAL RULES:
1. ONLY translate string values (text content), NEVER translate keys or structural elements
2. Preserve ALL special characters, placeholders ({{variable}}, %s, {0}, etc.), HTML tags, and formatting
3. Return ONLY valid JSON - no explanations, comments, or markdown formatting
4. Maintain exact JSON structure, nesting, and array orders
5. For technical terms, use established terminology in the target language
6. Keep proper names, brand names, and technical identifiers untranslated
7. Preserve URLs, email addresses, and file paths exactly as they are
8. For empty strings or null values, keep them as-is
9. Maintain consistent terminology throughout the translation, including across separate requests for the same file
10. Consider the cultural context of the target audience"#;

pub const DEFAULT_USER_TEXT: &str = r#"Context: {{context}}

Target Language: {{target_language}}

Please translate the following JSON content according to the rules above:

{{chunk_json}}"#;
