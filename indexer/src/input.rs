use anyhow::{bail, Context, Result};
use gapidx_core::tokenizer::normalize_to_content;
use gapidx_core::Corpus;
use serde::Deserialize;
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct JsonDoc {
    id: serde_json::Value,
    body: String,
}

/// Collection files under `input`, sorted so document order (and with it
/// term id assignment) is the same on every run.
pub fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(extension(p), Some("tsv" | "txt" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        bail!("input {} does not exist", input.display());
    }
    Ok(files)
}

fn extension(p: &Path) -> Option<&str> {
    p.extension().and_then(|s| s.to_str())
}

pub fn read_corpus(files: &[PathBuf], normalize: bool) -> Result<Corpus> {
    let mut corpus = Corpus::new();
    for file in files {
        let before = corpus.len();
        if extension(file) == Some("jsonl") {
            read_jsonl(file, &mut corpus, normalize)?;
        } else {
            read_tsv(file, &mut corpus, normalize)?;
        }
        tracing::debug!(file = %file.display(), docs = corpus.len() - before, "read collection file");
    }
    Ok(corpus)
}

/// `doc_id<TAB>content` per line; lines without a tab are skipped.
fn read_tsv(file: &Path, corpus: &mut Corpus, normalize: bool) -> Result<()> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    let mut skipped = 0usize;
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", file.display()))?;
        let Some((id, content)) = line.split_once('\t') else {
            skipped += 1;
            continue;
        };
        push(corpus, id, content, normalize).with_context(|| format!("{}:{}", file.display(), i + 1))?;
    }
    if skipped > 0 {
        tracing::warn!(file = %file.display(), skipped, "lines without a tab separator were skipped");
    }
    Ok(())
}

/// One `{"id": .., "body": ..}` object per line.
fn read_jsonl(file: &Path, corpus: &mut Corpus, normalize: bool) -> Result<()> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", file.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: JsonDoc = serde_json::from_str(&line).with_context(|| format!("{}:{}", file.display(), i + 1))?;
        let id = match doc.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => bail!("{}:{}: unsupported id {other}", file.display(), i + 1),
        };
        push(corpus, &id, &doc.body, normalize).with_context(|| format!("{}:{}", file.display(), i + 1))?;
    }
    Ok(())
}

fn push(corpus: &mut Corpus, id: &str, content: &str, normalize: bool) -> Result<()> {
    let content = if normalize {
        normalize_to_content(content)
    } else {
        content.split_whitespace().collect::<Vec<_>>().join(" ")
    };
    corpus.push(id, content)?;
    Ok(())
}
