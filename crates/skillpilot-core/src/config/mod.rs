//! Unified configuration layer.
//!
//! All environment variable reads live here; the rest of the workspace goes
//! through the structured schemas instead of calling `std::env::var`
//! directly.
//!
//! - `loader`: env_or / env_optional / env_bool / env_usize helpers, `.env`
//! - `schema`: LlmConfig, PathsConfig, AgentTuning

pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_usize, load_dotenv};
pub use schema::{AgentTuning, LlmConfig, PathsConfig};
