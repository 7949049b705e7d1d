//! skillpilot-agent: the tool-calling orchestration engine.
//!
//! A conversation turn enters [`agent_loop::run_turn`], which drives the LLM
//! through a step-bounded loop: stream the response, pick up native tool
//! calls or the in-band JSON fallback, validate against the tool registry,
//! dispatch into the session sandbox, and finally stream text and deliver
//! exported files.

pub mod agent_loop;
pub mod assets;
pub mod llm;
pub mod output;
pub mod prompt;
pub mod runtime;
pub mod session;
pub mod tools;
pub mod types;
