//! In-band tool protocol: JSON extraction, fallback actions, consent replies.
//!
//! Models without native function calling answer with a bare JSON object
//! (`{"type":"tool",...}` / `{"type":"final",...}`), often wrapped in a code
//! fence and surrounded by prose. The extractor finds the first balanced
//! object; action parsing is a closed tagged union on `type`.

use serde::Deserialize;
use serde_json::Value;

/// A fallback-protocol action decoded from free-form model text.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentAction {
    #[serde(rename = "tool")]
    Tool {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    #[serde(rename = "final")]
    Final {
        #[serde(default)]
        content: String,
    },
}

/// Extract the first balanced JSON object from `text`.
///
/// A single fenced-code wrapper (``` on the first and last lines) is removed
/// before scanning. The scanner tracks string/escape state with a brace-depth
/// counter; it does not validate the object beyond balance.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let mut s = text.trim();
    if s.starts_with("```") {
        if let Some(first_nl) = s.find('\n') {
            let body = &s[first_nl + 1..];
            if let Some(last_nl) = body.rfind('\n') {
                if body[last_nl + 1..].trim().starts_with("```") {
                    s = body[..last_nl].trim();
                }
            }
        }
    }

    let start = s.find('{')?;
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_str {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_str = false;
            }
            continue;
        }
        match b {
            b'"' => in_str = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode the fallback action carried in `text`, if any.
pub fn action_from_text(text: &str) -> Option<AgentAction> {
    let json = extract_first_json_object(text)?;
    serde_json::from_str(json).ok()
}

// ─── Consent replies ────────────────────────────────────────────────────────

/// Lowercase and strip whitespace plus sentence punctuation so short replies
/// compare reliably ("允许。" == "允许", "Yes!" == "yes").
pub fn normalize_reply(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !is_reply_punct(*c))
        .collect()
}

fn is_reply_punct(c: char) -> bool {
    matches!(
        c,
        '。' | '．'
            | '.'
            | '，'
            | ','
            | '！'
            | '!'
            | '？'
            | '?'
            | '；'
            | ';'
            | '：'
            | ':'
            | '-'
            | '—'
            | '_'
            | '~'
            | '`'
            | '\''
            | '"'
    )
}

const DENY_SUBSTRINGS: &[&str] = &["不允许", "不同意", "不可以", "不要", "拒绝", "取消"];
const DENY_EXACT: &[&str] = &["no", "n", "deny", "denied", "reject", "rejected", "cancel"];
const ALLOW_EXACT: &[&str] = &[
    "允许", "同意", "可以", "好的", "好", "ok", "okay", "yes", "y", "sure", "allow",
];
const ALLOW_SUBSTRINGS: &[&str] = &["允许", "同意"];

/// True when the reply denies the pending consent question. Denial tokens
/// take precedence over anything affirmative in the same reply.
pub fn is_deny_reply(text: &str) -> bool {
    let t = normalize_reply(text);
    if t.is_empty() {
        return false;
    }
    DENY_SUBSTRINGS.iter().any(|d| t.contains(d)) || DENY_EXACT.contains(&t.as_str())
}

/// True when the reply grants the pending consent question.
pub fn is_allow_reply(text: &str) -> bool {
    let t = normalize_reply(text);
    if t.is_empty() || is_deny_reply(text) {
        return false;
    }
    ALLOW_EXACT.contains(&t.as_str()) || ALLOW_SUBSTRINGS.iter().any(|a| t.contains(a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_between_garbage() {
        let text = "some prose before {\"type\":\"final\",\"content\":\"done\"} and after";
        assert_eq!(
            extract_first_json_object(text),
            Some("{\"type\":\"final\",\"content\":\"done\"}")
        );
    }

    #[test]
    fn extracts_nested_and_escaped() {
        let text = r#"{"a":{"b":"close } brace \" inside"},"c":1} trailing"#;
        assert_eq!(
            extract_first_json_object(text),
            Some(r#"{"a":{"b":"close } brace \" inside"},"c":1}"#)
        );
    }

    #[test]
    fn strips_code_fence_before_scanning() {
        let text = "```json\n{\"type\":\"tool\",\"name\":\"x\",\"arguments\":{}}\n```";
        assert_eq!(
            extract_first_json_object(text),
            Some("{\"type\":\"tool\",\"name\":\"x\",\"arguments\":{}}")
        );
    }

    #[test]
    fn unbalanced_object_yields_none() {
        assert_eq!(extract_first_json_object("{\"a\": 1"), None);
        assert_eq!(extract_first_json_object("no braces here"), None);
    }

    #[test]
    fn parses_tool_and_final_actions() {
        match action_from_text("{\"type\":\"tool\",\"name\":\"get_session_context\",\"arguments\":{}}") {
            Some(AgentAction::Tool { name, arguments }) => {
                assert_eq!(name, "get_session_context");
                assert!(arguments.is_object());
            }
            other => panic!("expected tool action, got {:?}", other),
        }
        match action_from_text("{\"type\":\"final\",\"content\":\"all done\"}") {
            Some(AgentAction::Final { content }) => assert_eq!(content, "all done"),
            other => panic!("expected final action, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_not_an_action() {
        assert!(action_from_text("{\"type\":\"banana\",\"content\":\"x\"}").is_none());
    }

    #[test]
    fn allow_and_deny_vocabulary() {
        assert!(is_allow_reply("允许"));
        assert!(is_allow_reply("好的！"));
        assert!(is_allow_reply("Yes."));
        assert!(is_allow_reply("ok"));
        assert!(!is_allow_reply("maybe later"));

        assert!(is_deny_reply("不允许"));
        assert!(is_deny_reply("拒绝"));
        assert!(is_deny_reply("No"));
        // Denial wins even when an affirmative token is present.
        assert!(is_deny_reply("不同意，不要这样"));
        assert!(!is_allow_reply("不允许"));
    }
}
