//! Display-only language metadata: names and codes used to label output files.

use std::path::{Path, PathBuf};

const LANGUAGES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hu", "Hungarian"),
    ("id", "Indonesian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sv", "Swedish"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("vi", "Vietnamese"),
    ("zh", "Chinese"),
];

/// Human-readable label for a code, or the input unchanged when unknown.
pub fn lang_label(code_or_name: &str) -> String {
    let key = code_or_name.trim();
    LANGUAGES
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(key) || name.eq_ignore_ascii_case(key))
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Resolve a language name or code to a short code suitable for file names.
///
/// Unknown names fall back to a lowercase slug of the input (`"Brazilian Portuguese"` becomes
/// `"brazilian-portuguese"`); regional codes such as `pt-BR` are kept as given.
pub fn resolve_language_code(code_or_name: &str) -> String {
    let key = code_or_name.trim();
    if let Some((code, _)) = LANGUAGES
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(key) || name.eq_ignore_ascii_case(key))
    {
        return (*code).to_string();
    }
    if is_locale_tag(key) {
        return key.to_string();
    }
    let mut slug = String::with_capacity(key.len());
    for ch in key.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "translated".to_string()
    } else {
        slug
    }
}

fn is_locale_tag(s: &str) -> bool {
    let mut parts = s.split(['-', '_']);
    let lang = parts.next().unwrap_or_default();
    let region = parts.next();
    parts.next().is_none()
        && (2..=3).contains(&lang.len())
        && lang.chars().all(|c| c.is_ascii_lowercase())
        && region.is_some_and(|r| (2..=4).contains(&r.len()) && r.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// `<stem>.<code>.json` next to the input file.
pub fn default_output_for(input: &Path, language: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("translation")
        .to_string();
    input.with_file_name(format!("{stem}.{}.json", resolve_language_code(language)))
}
