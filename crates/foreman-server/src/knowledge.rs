//! Markdown knowledge base: reusable findings (conventions, fixes, API
//! notes) stored per project under `<work_dir>/.knowledge/`, one file per
//! entry, searchable by substring, category and tags.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;

use crate::memory::is_safe_doc_id;

const KNOWLEDGE_DIR: &str = ".knowledge";
const DEFAULT_CATEGORY: &str = "general";
const DEFAULT_SEARCH_LIMIT: usize = 10;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug)]
pub struct SavedKnowledge {
    pub id: String,
    pub title: String,
    pub category: String,
    pub tags: String,
    pub path: PathBuf,
    pub updated: bool,
}

#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub id: String,
    pub title: String,
    pub category: String,
    pub tags: String,
    pub path: PathBuf,
    pub preview: String,
}

pub fn save_knowledge(
    work_dir: &Path,
    title: &str,
    content: &str,
    tags: &[String],
    category: Option<&str>,
    knowledge_id: Option<&str>,
) -> anyhow::Result<SavedKnowledge> {
    let dir = work_dir.join(KNOWLEDGE_DIR);
    std::fs::create_dir_all(&dir).context("create .knowledge directory")?;

    let (id, updated, created) = match knowledge_id {
        Some(id) => {
            if !is_safe_doc_id(id) {
                anyhow::bail!("knowledge_id must be a bare identifier (letters, digits, '-', '_')");
            }
            let path = dir.join(format!("{id}.md"));
            if !path.exists() {
                anyhow::bail!("knowledge not found: {id}; check the knowledge_id");
            }
            // Keep the original creation time across updates.
            let old = std::fs::read_to_string(&path).unwrap_or_default();
            let created = extract_field(&old, "**Created**: ")
                .unwrap_or_else(|| Local::now().to_rfc3339());
            (id.to_string(), true, created)
        }
        None => (
            uuid::Uuid::new_v4().to_string(),
            false,
            Local::now().to_rfc3339(),
        ),
    };

    let path = dir.join(format!("{id}.md"));
    let category = category
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string();
    let tags_joined = tags.join(", ");

    let mut doc = String::new();
    doc.push_str(&format!("# {title}\n\n"));
    doc.push_str(&format!("**Knowledge ID**: `{id}`\n\n"));
    doc.push_str(&format!("**Created**: {created}\n\n"));
    if updated {
        doc.push_str(&format!("**Updated**: {}\n\n", Local::now().to_rfc3339()));
    }
    doc.push_str(&format!("**Category**: {category}\n\n"));
    if !tags_joined.is_empty() {
        doc.push_str(&format!("**Tags**: {tags_joined}\n\n"));
    }
    doc.push_str("---\n\n## Content\n\n");
    doc.push_str(content);
    doc.push('\n');

    std::fs::write(&path, doc)
        .with_context(|| format!("write knowledge file {}", path.display()))?;

    Ok(SavedKnowledge {
        id,
        title: title.to_string(),
        category,
        tags: tags_joined,
        path,
        updated,
    })
}

pub struct SearchFilter<'a> {
    pub query: &'a str,
    pub tags: &'a [String],
    pub category: &'a str,
    pub limit: Option<usize>,
}

/// Scan the work dir's knowledge base. All filters are case-insensitive;
/// an empty filter set lists everything up to the limit.
pub fn search_knowledge(
    work_dir: &Path,
    filter: &SearchFilter<'_>,
) -> anyhow::Result<Vec<KnowledgeHit>> {
    let dir = work_dir.join(KNOWLEDGE_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let limit = match filter.limit {
        Some(n) if n > 0 => n,
        _ => DEFAULT_SEARCH_LIMIT,
    };
    let query = filter.query.to_lowercase();
    let category = filter.category.to_lowercase();
    let tags: Vec<String> = filter.tags.iter().map(|t| t.to_lowercase()).collect();

    let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
        .context("read .knowledge directory")?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    entries.sort();

    let mut hits = Vec::new();
    for path in entries {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let content_lower = content.to_lowercase();

        if !query.is_empty() && !content_lower.contains(&query) {
            continue;
        }

        let entry_category = extract_field(&content, "**Category**: ").unwrap_or_default();
        if !category.is_empty() && !entry_category.to_lowercase().contains(&category) {
            continue;
        }

        let entry_tags = extract_field(&content, "**Tags**: ").unwrap_or_default();
        if !tags.is_empty() {
            let entry_tags_lower = entry_tags.to_lowercase();
            if !tags.iter().any(|t| entry_tags_lower.contains(t)) {
                continue;
            }
        }

        hits.push(KnowledgeHit {
            id: extract_backticked_field(&content, "**Knowledge ID**: `").unwrap_or_default(),
            title: extract_title(&content),
            category: entry_category,
            tags: entry_tags,
            path,
            preview: extract_preview(&content),
        });
        if hits.len() >= limit {
            break;
        }
    }

    Ok(hits)
}

fn extract_title(content: &str) -> String {
    content
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("# ")
        .trim()
        .to_string()
}

fn extract_field(content: &str, marker: &str) -> Option<String> {
    let start = content.find(marker)? + marker.len();
    let rest = &content[start..];
    let end = rest.find('\n').unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

fn extract_backticked_field(content: &str, marker: &str) -> Option<String> {
    let start = content.find(marker)? + marker.len();
    let rest = &content[start..];
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

fn extract_preview(content: &str) -> String {
    let marker = "## Content\n\n";
    let Some(start) = content.find(marker) else {
        return String::new();
    };
    let body = content[start + marker.len()..].trim_end();
    let mut preview: String = body.chars().take(PREVIEW_CHARS).collect();
    if body.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_filter() -> SearchFilter<'static> {
        SearchFilter {
            query: "",
            tags: &[],
            category: "",
            limit: None,
        }
    }

    #[test]
    fn save_then_search_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let saved = save_knowledge(
            dir.path(),
            "Port reuse on linux",
            "SO_REUSEADDR is needed after a crash leaves TIME_WAIT sockets.",
            &["networking".to_string(), "linux".to_string()],
            Some("problem-solving"),
            None,
        )
        .unwrap();
        assert!(!saved.updated);

        let hits = search_knowledge(dir.path(), &no_filter()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, saved.id);
        assert_eq!(hits[0].title, "Port reuse on linux");
        assert_eq!(hits[0].category, "problem-solving");
        assert!(hits[0].preview.contains("SO_REUSEADDR"));
    }

    #[test]
    fn update_preserves_created_time() {
        let dir = tempfile::tempdir().unwrap();
        let first = save_knowledge(dir.path(), "T", "v1", &[], None, None).unwrap();
        let original = std::fs::read_to_string(&first.path).unwrap();
        let created = extract_field(&original, "**Created**: ").unwrap();

        let second =
            save_knowledge(dir.path(), "T", "v2", &[], None, Some(&first.id)).unwrap();
        assert!(second.updated);

        let content = std::fs::read_to_string(&second.path).unwrap();
        assert_eq!(extract_field(&content, "**Created**: ").unwrap(), created);
        assert!(content.contains("**Updated**: "));
        assert!(content.contains("v2"));
    }

    #[test]
    fn updating_missing_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_knowledge(dir.path(), "T", "c", &[], None, Some("missing")).unwrap_err();
        assert!(err.to_string().contains("knowledge not found"));
    }

    #[test]
    fn filters_by_query_category_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        save_knowledge(dir.path(), "A", "rust ownership notes", &["rust".to_string()], Some("notes"), None)
            .unwrap();
        save_knowledge(dir.path(), "B", "go scheduler notes", &["go".to_string()], Some("notes"), None)
            .unwrap();

        let by_query = search_knowledge(
            dir.path(),
            &SearchFilter { query: "OWNERSHIP", tags: &[], category: "", limit: None },
        )
        .unwrap();
        assert_eq!(by_query.len(), 1);
        assert_eq!(by_query[0].title, "A");

        let by_tag = search_knowledge(
            dir.path(),
            &SearchFilter { query: "", tags: &["go".to_string()], category: "", limit: None },
        )
        .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].title, "B");

        let by_category = search_knowledge(
            dir.path(),
            &SearchFilter { query: "", tags: &[], category: "notes", limit: Some(1) },
        )
        .unwrap();
        assert_eq!(by_category.len(), 1);
    }

    #[test]
    fn empty_knowledge_base_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(search_knowledge(dir.path(), &no_filter()).unwrap().is_empty());
    }
}
