//! 工具抽象层
//!
//! 把命令入口包装成通用的 Tool Trait，由 MCP 服务按名称分发。

use crate::pipeline::Orchestrator;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 通用工具 Trait
///
/// 每个工具有名称、描述和参数 Schema；执行接收 JSON 参数，返回 JSON 结果。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（唯一标识）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 Schema 描述（JSON Schema 格式，可选）
    fn parameters_schema(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, args: Value) -> Result<Value>;
}

/// 工具注册表 - 管理所有可用工具
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 按名称排序列出所有工具
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t
                    .parameters_schema()
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            })
            .collect()
    }
}

/// 工具信息（MCP `tools/list` 的条目）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ============================================
// 内置工具实现
// ============================================

/// 自然语言打开/关闭文件
pub struct ProcessCommandTool {
    orchestrator: Arc<Orchestrator>,
}

impl ProcessCommandTool {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for ProcessCommandTool {
    fn name(&self) -> &str {
        "process_command"
    }

    fn description(&self) -> &str {
        "Open or close a whitelisted file described in natural language, e.g. \"open the quarterly report\" or \"关闭那张图片\""
    }

    fn parameters_schema(&self) -> Option<Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "用户的自然语言指令"
                }
            },
            "required": ["message"]
        }))
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let message = args["message"]
            .as_str()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("缺少 message 参数"))?;

        let result = self.orchestrator.process(message).await;
        Ok(serde_json::to_value(result)?)
    }
}

/// 列出白名单中的文件
pub struct ListFilesTool {
    orchestrator: Arc<Orchestrator>,
}

impl ListFilesTool {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in the whitelisted directories, optionally limited to one directory or one category (document, image, data)"
    }

    fn parameters_schema(&self) -> Option<Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "白名单根目录（可选）"
                },
                "type": {
                    "type": "string",
                    "description": "文件类别，如 document / image / data（可选）"
                },
                "pattern": {
                    "type": "string",
                    "description": "文件名通配符，如 *.pdf（可选）"
                }
            }
        }))
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let directory = args["directory"].as_str();
        let type_filter = args["type"].as_str();
        let registry = self.orchestrator.registry();

        let mut files = match args["pattern"].as_str() {
            Some(pattern) => registry
                .search(pattern, directory)
                .map_err(|e| anyhow::anyhow!("Invalid pattern: {}", e))?,
            None => registry.list_files(directory, type_filter),
        };
        if let (true, Some(category)) = (args["pattern"].is_string(), type_filter) {
            let category = category.to_lowercase();
            files.retain(|f| registry.category_of(&f.extension) == Some(category.as_str()));
        }

        Ok(serde_json::json!({
            "count": files.len(),
            "files": files,
        }))
    }
}

/// 创建默认工具注册表
pub fn create_default_registry(orchestrator: Arc<Orchestrator>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ProcessCommandTool::new(orchestrator.clone())));
    registry.register(Arc::new(ListFilesTool::new(orchestrator)));
    registry
}
