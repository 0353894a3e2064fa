use anyhow::Result;
use autofile_core::context::RuntimeContext;
use serde_json::Value;
use std::path::PathBuf;

pub struct McpContext {
    app_dir: PathBuf,
    resource_dir: Option<PathBuf>,
}

impl McpContext {
    pub fn new(app_dir: PathBuf, resource_dir: Option<PathBuf>) -> Self {
        Self {
            app_dir,
            resource_dir,
        }
    }
}

impl RuntimeContext for McpContext {
    fn app_dir(&self) -> PathBuf {
        self.app_dir.clone()
    }

    fn resource_dir(&self) -> Option<PathBuf> {
        self.resource_dir
            .clone()
            .or_else(|| Some(self.app_dir.join("resources")).filter(|p| p.is_dir()))
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        // stdout 是 JSON-RPC 通道，事件只写日志（stderr）
        tracing::info!(target: "autofile::event", "{}: {}", event, payload);
        Ok(())
    }
}
