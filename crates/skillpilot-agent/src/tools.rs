//! Tool registry: the static descriptor table and argument validation.
//!
//! Every tool the loop may dispatch is declared here once (name,
//! description, JSON-schema parameters), and the validator is driven by a
//! parallel requirement table so dispatch code never re-checks shapes.

use lazy_static::lazy_static;
use serde_json::{json, Value};

use crate::types::{FunctionDef, ToolDefinition};

/// Parameter kinds the validator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Str,
    Int,
    Bool,
    StrArray,
}

struct ParamSpec {
    name: &'static str,
    kind: ParamKind,
    required: bool,
    /// Minimum length: chars for strings, items for arrays.
    min_len: usize,
}

const fn required_str(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Str,
        required: true,
        min_len: 1,
    }
}

const fn optional(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        min_len: 0,
    }
}

/// Per-tool validation table. Must stay aligned with the schemas below.
static TOOL_PARAMS: &[(&str, &[ParamSpec])] = &[
    ("get_session_context", &[]),
    ("get_skill_metadata", &[required_str("skill_name")]),
    (
        "list_skill_files",
        &[required_str("skill_name"), optional("max_depth", ParamKind::Int)],
    ),
    (
        "read_skill_file",
        &[
            required_str("skill_name"),
            required_str("relative_path"),
            optional("max_chars", ParamKind::Int),
        ],
    ),
    (
        "run_skill_command",
        &[
            required_str("skill_name"),
            ParamSpec {
                name: "command",
                kind: ParamKind::StrArray,
                required: true,
                min_len: 1,
            },
            optional("cwd_relative", ParamKind::Str),
            optional("auto_install", ParamKind::Bool),
        ],
    ),
    (
        "write_temp_file",
        &[
            required_str("relative_path"),
            ParamSpec {
                name: "content",
                kind: ParamKind::Str,
                required: true,
                min_len: 0,
            },
        ],
    ),
    (
        "read_temp_file",
        &[required_str("relative_path"), optional("max_chars", ParamKind::Int)],
    ),
    ("list_temp_files", &[optional("max_depth", ParamKind::Int)]),
    (
        "run_temp_command",
        &[
            ParamSpec {
                name: "command",
                kind: ParamKind::StrArray,
                required: true,
                min_len: 1,
            },
            optional("cwd_relative", ParamKind::Str),
            optional("auto_install", ParamKind::Bool),
        ],
    ),
    (
        "export_temp_file",
        &[
            required_str("temp_relative_path"),
            required_str("workspace_relative_path"),
            optional("overwrite", ParamKind::Bool),
        ],
    ),
];

lazy_static! {
    /// Prompt-facing tool definitions, built once per process.
    static ref TOOL_DEFINITIONS: Vec<ToolDefinition> = build_tool_definitions();
}

/// The full tool list passed to the LLM.
pub fn tool_definitions() -> &'static [ToolDefinition] {
    &TOOL_DEFINITIONS
}

/// Whether `name` is a registered tool.
pub fn is_known_tool(name: &str) -> bool {
    TOOL_PARAMS.iter().any(|(n, _)| *n == name)
}

/// Validate an argument object against the tool's requirement table.
///
/// Unknown tools pass; dispatch reports those separately so the model sees
/// a distinct error.
pub fn validate_arguments(tool: &str, args: &Value) -> Result<(), String> {
    let Some((_, specs)) = TOOL_PARAMS.iter().find(|(n, _)| *n == tool) else {
        return Ok(());
    };
    let Some(obj) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };
    for spec in *specs {
        let Some(value) = obj.get(spec.name) else {
            if spec.required {
                return Err(format!("missing required parameter '{}'", spec.name));
            }
            continue;
        };
        if value.is_null() {
            if spec.required {
                return Err(format!("parameter '{}' must not be null", spec.name));
            }
            continue;
        }
        match spec.kind {
            ParamKind::Str => {
                let Some(s) = value.as_str() else {
                    return Err(format!("parameter '{}' must be a string", spec.name));
                };
                if s.chars().count() < spec.min_len {
                    return Err(format!(
                        "parameter '{}' must be at least {} character(s)",
                        spec.name, spec.min_len
                    ));
                }
            }
            ParamKind::Int => {
                if !value.is_i64() && !value.is_u64() {
                    return Err(format!("parameter '{}' must be an integer", spec.name));
                }
            }
            ParamKind::Bool => {
                if !value.is_boolean() {
                    return Err(format!("parameter '{}' must be a boolean", spec.name));
                }
            }
            ParamKind::StrArray => {
                let Some(items) = value.as_array() else {
                    return Err(format!("parameter '{}' must be an array of strings", spec.name));
                };
                if items.len() < spec.min_len {
                    return Err(format!(
                        "parameter '{}' must have at least {} item(s)",
                        spec.name, spec.min_len
                    ));
                }
                if items.iter().any(|i| !i.is_string()) {
                    return Err(format!(
                        "parameter '{}' must contain only strings",
                        spec.name
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Nudge injected after an `invalid_tool_arguments` result so the model
/// retries with a corrected call.
pub fn retry_prompt(tool: &str, detail: &str) -> String {
    format!(
        "Your call to `{tool}` had invalid arguments: {detail}. \
         Fix the arguments and call the tool again."
    )
}

fn build_tool_definitions() -> Vec<ToolDefinition> {
    let schemas: Vec<(&str, &str, Value)> = vec![
        (
            "get_session_context",
            "Return the session paths: skills_root and session_dir.",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        (
            "get_skill_metadata",
            "Read a skill's SKILL.md: frontmatter metadata plus the full document. \
             Required before any other operation on that skill.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {"type": "string", "description": "Skill folder name under skills_root"}
                },
                "required": ["skill_name"]
            }),
        ),
        (
            "list_skill_files",
            "List a skill package's directory tree to a bounded depth. \
             Required before running any command in that skill.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {"type": "string", "description": "Skill folder name under skills_root"},
                    "max_depth": {"type": "integer", "description": "Recursion depth, default 2"}
                },
                "required": ["skill_name"]
            }),
        ),
        (
            "read_skill_file",
            "Read one file inside a skill package as text, up to max_chars.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {"type": "string", "description": "Skill folder name under skills_root"},
                    "relative_path": {"type": "string", "description": "File path relative to the skill folder"},
                    "max_chars": {"type": "integer", "description": "Read cap, default 12000"}
                },
                "required": ["skill_name", "relative_path"]
            }),
        ),
        (
            "run_skill_command",
            "Run an allow-listed command with its working directory inside the skill package. \
             'python' maps to the host interpreter; other executables must be allow-listed.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {"type": "string", "description": "Skill folder name under skills_root"},
                    "command": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Argv list, e.g. [\"python\", \"-m\", \"module\", \"input.csv\"]"
                    },
                    "cwd_relative": {"type": "string", "description": "Working directory relative to the skill folder"},
                    "auto_install": {"type": "boolean", "description": "Install a missing python module with pip"}
                },
                "required": ["skill_name", "command"]
            }),
        ),
        (
            "write_temp_file",
            "Write a text file under the session directory. relative_path must name a file.",
            json!({
                "type": "object",
                "properties": {
                    "relative_path": {"type": "string", "description": "Destination path relative to session_dir"},
                    "content": {"type": "string", "description": "Full file content (UTF-8)"}
                },
                "required": ["relative_path", "content"]
            }),
        ),
        (
            "read_temp_file",
            "Read a file under the session directory as text, up to max_chars. \
             The result includes the absolute path for use in commands.",
            json!({
                "type": "object",
                "properties": {
                    "relative_path": {"type": "string", "description": "Path relative to session_dir"},
                    "max_chars": {"type": "integer", "description": "Read cap, default 12000"}
                },
                "required": ["relative_path"]
            }),
        ),
        (
            "list_temp_files",
            "List the session directory tree to a bounded depth.",
            json!({
                "type": "object",
                "properties": {
                    "max_depth": {"type": "integer", "description": "Recursion depth, default 4"}
                },
                "required": []
            }),
        ),
        (
            "run_temp_command",
            "Run an allow-listed command with its working directory inside the session directory.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Argv list, e.g. [\"python\", \"gen.py\"]"
                    },
                    "cwd_relative": {"type": "string", "description": "Working directory relative to session_dir"},
                    "auto_install": {"type": "boolean", "description": "Install a missing python module with pip"}
                },
                "required": ["command"]
            }),
        ),
        (
            "export_temp_file",
            "Mark a session file as a final deliverable under a chosen output name. \
             Does not copy; only marked files are returned to the user.",
            json!({
                "type": "object",
                "properties": {
                    "temp_relative_path": {"type": "string", "description": "Source path relative to session_dir"},
                    "workspace_relative_path": {"type": "string", "description": "Output name presented to the user"},
                    "overwrite": {"type": "boolean", "description": "Replace an earlier export of the same name"}
                },
                "required": ["temp_relative_path", "workspace_relative_path"]
            }),
        ),
    ];

    schemas
        .into_iter()
        .map(|(name, description, parameters)| ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_a_schema_and_vice_versa() {
        let schema_names: Vec<&str> = tool_definitions()
            .iter()
            .map(|t| t.function.name.as_str())
            .collect();
        for (name, _) in TOOL_PARAMS {
            assert!(schema_names.contains(name), "no schema for {name}");
        }
        assert_eq!(schema_names.len(), TOOL_PARAMS.len());
    }

    #[test]
    fn schemas_are_object_shaped() {
        for def in tool_definitions() {
            let p = &def.function.parameters;
            assert_eq!(p.get("type").and_then(Value::as_str), Some("object"));
            assert!(p.get("properties").is_some_and(Value::is_object));
            assert!(p.get("required").is_some_and(Value::is_array));
        }
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let err = validate_arguments("get_skill_metadata", &json!({})).unwrap_err();
        assert!(err.contains("skill_name"));
    }

    #[test]
    fn wrong_types_are_reported() {
        assert!(validate_arguments("get_skill_metadata", &json!({"skill_name": 7})).is_err());
        assert!(validate_arguments(
            "list_skill_files",
            &json!({"skill_name": "a", "max_depth": "two"})
        )
        .is_err());
        assert!(validate_arguments(
            "run_skill_command",
            &json!({"skill_name": "a", "command": "python"})
        )
        .is_err());
        assert!(validate_arguments(
            "run_skill_command",
            &json!({"skill_name": "a", "command": ["python", 1]})
        )
        .is_err());
        assert!(validate_arguments(
            "export_temp_file",
            &json!({"temp_relative_path": "r.x", "workspace_relative_path": "o.x", "overwrite": "yes"})
        )
        .is_err());
    }

    #[test]
    fn minimum_lengths_are_enforced() {
        assert!(validate_arguments("get_skill_metadata", &json!({"skill_name": ""})).is_err());
        assert!(validate_arguments(
            "run_temp_command",
            &json!({"command": []})
        )
        .is_err());
        // Empty content is a legal write.
        assert!(validate_arguments(
            "write_temp_file",
            &json!({"relative_path": "a.txt", "content": ""})
        )
        .is_ok());
    }

    #[test]
    fn valid_calls_pass() {
        assert!(validate_arguments("get_session_context", &json!({})).is_ok());
        assert!(validate_arguments(
            "run_skill_command",
            &json!({
                "skill_name": "pdf",
                "command": ["python", "-m", "gen"],
                "auto_install": true
            })
        )
        .is_ok());
    }

    #[test]
    fn unknown_tools_pass_validation() {
        assert!(validate_arguments("made_up_tool", &json!({"x": 1})).is_ok());
        assert!(!is_known_tool("made_up_tool"));
        assert!(is_known_tool("write_temp_file"));
    }

    #[test]
    fn retry_prompt_names_the_tool() {
        let p = retry_prompt("write_temp_file", "missing required parameter 'content'");
        assert!(p.contains("write_temp_file"));
        assert!(p.contains("content"));
    }
}
