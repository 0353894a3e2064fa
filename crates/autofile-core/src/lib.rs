//! AutoFile Core - natural-language file opening and closing
//!
//! This crate contains the whole command pipeline and can be reused
//! across different frontends (MCP server, one-shot CLI, etc.)

pub mod ai;
pub mod automation;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod redact;
pub mod registry;
pub mod tools;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::AppConfig;
pub use error::{AutoFileError, ErrorKind, Result};
pub use pipeline::{Orchestrator, PipelineResult};
