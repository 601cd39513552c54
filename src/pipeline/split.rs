//! Chunk-per-invocation mode: split a document into chunk files once, translate each file in its
//! own process run, then merge the directory back into one document.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::chunker::{chunk_document, Chunk, ChunkPolicy};
use super::merge::{merge, MergedDocument};
use super::orchestrator::{Credentials, Orchestrator};
use super::translator::ModelConfig;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_SCHEMA: &str = "json-translator.split.v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitManifest {
    pub schema: String,
    #[serde(default)]
    pub source: Option<String>,
    pub total_chunks: usize,
    pub chunks: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub file: String,
    pub translated_file: String,
    pub keys: Vec<String>,
}

pub fn chunk_file_name(index: usize) -> String {
    format!("chunk_{:04}.json", index + 1)
}

pub fn translated_file_name(index: usize) -> String {
    format!("chunk_{:04}.translated.json", index + 1)
}

/// Write every chunk of `document` plus a manifest into `dir`.
pub fn split_to_dir(
    document: &Map<String, Value>,
    policy: &ChunkPolicy,
    dir: &Path,
    source: Option<&Path>,
) -> anyhow::Result<SplitManifest> {
    std::fs::create_dir_all(dir).with_context(|| format!("create split dir: {}", dir.display()))?;

    let chunks = chunk_document(document, policy);
    let mut entries = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let file = chunk_file_name(chunk.index);
        write_json(&dir.join(&file), &chunk.entries)?;
        entries.push(ManifestEntry {
            index: chunk.index,
            file,
            translated_file: translated_file_name(chunk.index),
            keys: chunk.keys().map(str::to_string).collect(),
        });
    }

    let manifest = SplitManifest {
        schema: MANIFEST_SCHEMA.to_string(),
        source: source.map(|p| p.display().to_string()),
        total_chunks: chunks.len(),
        chunks: entries,
    };
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;
    info!(dir = %dir.display(), chunks = manifest.total_chunks, "split document into chunk files");
    Ok(manifest)
}

pub fn read_manifest(dir: &Path) -> anyhow::Result<SplitManifest> {
    let path = dir.join(MANIFEST_FILE);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("read manifest: {}", path.display()))?;
    let manifest: SplitManifest =
        serde_json::from_str(&text).with_context(|| format!("parse manifest: {}", path.display()))?;
    if manifest.schema != MANIFEST_SCHEMA {
        bail!("unsupported manifest schema: {}", manifest.schema);
    }
    Ok(manifest)
}

pub fn load_chunk(dir: &Path, entry: &ManifestEntry) -> anyhow::Result<Chunk> {
    let entries = read_object(&dir.join(&entry.file))?;
    Ok(Chunk {
        index: entry.index,
        entries,
    })
}

/// Translate chunk `index` of a split directory and write its translated file.
///
/// Failures surface as a `TranslateError` inside the returned error.
pub async fn translate_chunk_file(
    orchestrator: &Orchestrator,
    dir: &Path,
    index: usize,
    target_language: &str,
    context_prompt: &str,
    model: &ModelConfig,
    credentials: &Credentials,
) -> anyhow::Result<PathBuf> {
    let manifest = read_manifest(dir)?;
    let entry = manifest
        .chunks
        .iter()
        .find(|e| e.index == index)
        .ok_or_else(|| anyhow!("chunk index {index} not in manifest (0..{})", manifest.total_chunks))?;
    let chunk = load_chunk(dir, entry)?;

    let done = orchestrator
        .translate_chunk(
            &chunk,
            manifest.total_chunks,
            target_language,
            context_prompt,
            model,
            credentials,
        )
        .await?;

    let out = dir.join(&entry.translated_file);
    write_json(&out, &done.value.entries)?;
    info!(
        chunk = index + 1,
        total = manifest.total_chunks,
        attempts = done.attempts,
        "wrote {}",
        out.display()
    );
    Ok(out)
}

/// Merge every translated chunk file. Fails without writing anything if any chunk is missing.
pub fn merge_dir(dir: &Path) -> anyhow::Result<MergedDocument> {
    let manifest = read_manifest(dir)?;

    let missing: Vec<usize> = manifest
        .chunks
        .iter()
        .filter(|e| !dir.join(&e.translated_file).exists())
        .map(|e| e.index + 1)
        .collect();
    if !missing.is_empty() {
        bail!(
            "{} of {} chunks not translated yet: {:?}",
            missing.len(),
            manifest.total_chunks,
            missing
        );
    }

    let mut source = Map::new();
    let mut parts = Vec::with_capacity(manifest.chunks.len());
    for entry in &manifest.chunks {
        source.extend(read_object(&dir.join(&entry.file))?);
        parts.push(read_object(&dir.join(&entry.translated_file))?);
    }
    Ok(merge(&source, parts))
}

fn read_object(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read: {}", path.display()))?;
    match serde_json::from_str::<Value>(&text).with_context(|| format!("parse: {}", path.display()))? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("not a JSON object: {}", path.display())),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    std::fs::write(path, buf).with_context(|| format!("write: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc() -> Map<String, Value> {
        match json!({"a": "A", "b": "B", "c": {"d": "D"}}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn split_writes_chunks_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = split_to_dir(&doc(), &ChunkPolicy::entries(2), dir.path(), None).expect("split");
        assert_eq!(manifest.total_chunks, 2);
        assert_eq!(manifest.chunks[1].keys, vec!["c".to_string()]);
        assert!(dir.path().join("chunk_0001.json").exists());
        assert_eq!(read_manifest(dir.path()).expect("manifest"), manifest);

        let chunk = load_chunk(dir.path(), &manifest.chunks[0]).expect("chunk");
        assert_eq!(chunk.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn merge_requires_every_chunk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = split_to_dir(&doc(), &ChunkPolicy::entries(2), dir.path(), None).expect("split");

        write_json(
            &dir.path().join(&manifest.chunks[0].translated_file),
            &json!({"a": "x", "b": "y"}),
        )
        .expect("write");
        let err = merge_dir(dir.path()).expect_err("chunk 2 missing");
        assert!(err.to_string().contains("1 of 2"));

        write_json(
            &dir.path().join(&manifest.chunks[1].translated_file),
            &json!({"c": {"d": "z"}}),
        )
        .expect("write");
        let merged = merge_dir(dir.path()).expect("merge");
        assert!(merged.integrity.is_clean());
        assert_eq!(
            Value::Object(merged.document),
            json!({"a": "x", "b": "y", "c": {"d": "z"}})
        );
    }
}
