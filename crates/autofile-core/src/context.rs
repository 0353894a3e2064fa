//! Runtime context abstraction
//!
//! The orchestrator reports progress through [`RuntimeContext`] so it can run
//! behind the stdio server, the one-shot CLI, or an embedding host without
//! knowing which one it is.

use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;

/// 进度事件名
pub mod events {
    pub const INTENT: &str = "intent";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Defines the capabilities the pipeline needs from the host.
pub trait RuntimeContext: Send + Sync {
    /// Application data directory (config.json lives here)
    fn app_dir(&self) -> PathBuf;

    /// Resources directory (prompts.json)
    ///
    /// `None` means built-in prompts only.
    fn resource_dir(&self) -> Option<PathBuf>;

    /// Report a progress event
    ///
    /// MCP/CLI: logs through tracing; an embedding UI may forward it.
    fn emit(&self, event: &str, payload: Value) -> Result<()>;
}
