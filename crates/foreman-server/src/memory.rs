//! Markdown memory store: free-form task state an agent can stash and
//! recover after a context reset. One file per memory under `mems/`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;

pub struct SavedMemory {
    pub id: String,
    pub path: PathBuf,
    pub updated: bool,
}

/// Identifiers become file names; only accept bare, path-safe ids.
pub(crate) fn is_safe_doc_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn save_memory(
    dir: &Path,
    system_prompt: &str,
    content: &str,
    memory_id: Option<&str>,
) -> anyhow::Result<SavedMemory> {
    std::fs::create_dir_all(dir).context("create mems directory")?;

    let (id, updated) = match memory_id {
        Some(id) => {
            if !is_safe_doc_id(id) {
                anyhow::bail!("memory_id must be a bare identifier (letters, digits, '-', '_')");
            }
            (id.to_string(), true)
        }
        None => (uuid::Uuid::new_v4().to_string(), false),
    };
    let path = dir.join(format!("{id}.md"));

    let mut doc = String::new();
    doc.push_str("# Memory\n\n");
    doc.push_str(&format!("**Memory ID**: `{id}`\n\n"));
    doc.push_str(&format!("**Saved**: {}\n\n", Local::now().to_rfc3339()));
    doc.push_str(if updated {
        "**Operation**: update\n\n"
    } else {
        "**Operation**: create\n\n"
    });
    doc.push_str("---\n\n## System prompt\n\n```markdown\n");
    doc.push_str(system_prompt);
    doc.push_str("\n```\n\n---\n\n## Task notes\n\n");
    doc.push_str(content);
    doc.push_str("\n\n---\n\n");
    doc.push_str(&format!(
        "If your context was truncated, read this file to recover state: `{}`\n",
        path.display()
    ));

    std::fs::write(&path, doc).with_context(|| format!("write memory file {}", path.display()))?;

    Ok(SavedMemory { id, path, updated })
}

pub fn read_memory(dir: &Path, memory_id: &str) -> anyhow::Result<(PathBuf, String)> {
    if !is_safe_doc_id(memory_id) {
        anyhow::bail!("memory_id must be a bare identifier (letters, digits, '-', '_')");
    }

    let path = dir.join(format!("{memory_id}.md"));
    if !path.exists() {
        anyhow::bail!("memory not found: {}", path.display());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("read memory file {}", path.display()))?;
    Ok((path, content))
}
