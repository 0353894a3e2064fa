use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, INVALID_PARAMS,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
use autofile_core::tools::ToolRegistry;
use serde_json::{json, Value};
use tracing::{error, info};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    /// 处理一行输入；通知类消息没有响应
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!("Error parsing request: {}", e);
                Some(JsonRpcResponse::failure(
                    None,
                    JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
                ))
            }
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let result = match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "autofile-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(request.params).await,
            // 通知没有 id，也不需要响应
            _ if request.id.is_none() => return None,
            _ => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method {} not found", request.method),
            )),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::failure(request.id, e),
        })
    }

    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: self.tools.list_tools(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::new(-32603, e.to_string()))
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing params"))?;

        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing tool name"))?;

        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| JsonRpcError::new(METHOD_NOT_FOUND, format!("Tool {} not found", name)))?;

        let args = params.get("arguments").cloned().unwrap_or(json!({}));
        info!("Executing tool {} with {}", name, args);

        // 工具自身的失败作为结果返回（isError），而不是协议错误
        let (text, is_error) = match tool.execute(args).await {
            Ok(value) => {
                let is_error = value.get("error").is_some();
                let text = serde_json::to_string_pretty(&value)
                    .map_err(|e| JsonRpcError::new(-32603, e.to_string()))?;
                (text, is_error)
            }
            Err(e) => {
                error!("Tool {} failed: {}", name, e);
                (e.to_string(), true)
            }
        };

        Ok(json!({
            "content": [
                {
                    "type": "text",
                    "text": text
                }
            ],
            "isError": is_error
        }))
    }
}
