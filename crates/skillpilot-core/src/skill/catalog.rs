//! Catalog scan of the skills root.
//!
//! The index carries just enough for the model to decide whether a skill is
//! worth opening (name, folder, one-line description) so the system prompt
//! stays small and the deeper reads stay behind the disclosure gates.

use serde::Serialize;
use std::path::Path;

use crate::skill::{frontmatter, SKILL_DOC_FILE};

/// How much of a `SKILL.md` the index scan reads. Frontmatter lives at the
/// head of the file; the body is irrelevant here.
pub const INDEX_READ_CAP: usize = 4000;

#[derive(Debug, Clone, Serialize)]
pub struct SkillIndexEntry {
    pub name: String,
    pub folder: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillIndex {
    pub root: Option<String>,
    pub skills: Vec<SkillIndexEntry>,
}

/// Scan `skills_root` for skill packages, lexicographic by folder name.
///
/// A package is any direct subdirectory; the entry name falls back to the
/// folder name when the frontmatter has no `name`.
pub fn scan_skills(skills_root: Option<&Path>) -> SkillIndex {
    let Some(root) = skills_root else {
        return SkillIndex {
            root: None,
            skills: Vec::new(),
        };
    };

    let mut folders = Vec::new();
    if let Ok(read) = std::fs::read_dir(root) {
        for entry in read.flatten() {
            if entry.path().is_dir() {
                folders.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    folders.sort();

    let mut skills = Vec::new();
    for folder in folders {
        let doc_path = root.join(&folder).join(SKILL_DOC_FILE);
        let meta = match read_text_capped(&doc_path, INDEX_READ_CAP) {
            Ok(content) => frontmatter::parse_frontmatter(&content),
            Err(_) => Default::default(),
        };
        skills.push(SkillIndexEntry {
            name: meta
                .get("name")
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| folder.clone()),
            folder,
            description: meta.get("description").cloned().unwrap_or_default(),
        });
    }

    tracing::debug!(root = %root.display(), count = skills.len(), "scanned skill index");
    SkillIndex {
        root: Some(root.to_string_lossy().into_owned()),
        skills,
    }
}

/// Read a text file, keeping at most `max_chars` characters.
pub fn read_text_capped(path: &Path, max_chars: usize) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    if text.chars().count() <= max_chars {
        return Ok(text.into_owned());
    }
    Ok(text.chars().take(max_chars).collect())
}
