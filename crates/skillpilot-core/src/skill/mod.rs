//! Skill packages on disk: frontmatter grammar and the catalog index.

pub mod catalog;
pub mod frontmatter;

pub use catalog::{scan_skills, SkillIndex, SkillIndexEntry};
pub use frontmatter::parse_frontmatter;

/// Canonical documentation file of a skill package.
pub const SKILL_DOC_FILE: &str = "SKILL.md";
