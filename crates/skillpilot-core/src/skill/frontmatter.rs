//! `SKILL.md` frontmatter: a deliberately small line grammar.
//!
//! The head of a skill document is a block delimited by `---` lines holding
//! `key: value` pairs. This is not YAML: values are taken verbatim after
//! trimming one layer of matching quotes, and unknown keys are preserved.

use std::collections::BTreeMap;

/// Parse the frontmatter block at the head of `content`.
///
/// The first non-blank line must be `---`; lines up to the closing `---` are
/// split on the first `:`. A document without a closing delimiter yields an
/// empty map.
pub fn parse_frontmatter(content: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    let mut lines = content.lines().skip_while(|l| l.trim().is_empty());
    match lines.next() {
        Some(l) if l.trim() == "---" => {}
        _ => return data,
    }
    let mut closed = false;
    for line in lines {
        if line.trim() == "---" {
            closed = true;
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        data.insert(
            key.to_string(),
            strip_matching_quotes(value.trim()).to_string(),
        );
    }
    if closed {
        data
    } else {
        BTreeMap::new()
    }
}

fn strip_matching_quotes(value: &str) -> &str {
    let b = value.as_bytes();
    if b.len() >= 2
        && ((b[0] == b'"' && b[b.len() - 1] == b'"')
            || (b[0] == b'\'' && b[b.len() - 1] == b'\''))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
