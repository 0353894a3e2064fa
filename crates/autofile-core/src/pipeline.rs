//! Orchestrator - one request, one pipeline:
//! listing -> intent -> validation -> open/close -> response text.
//!
//! Nothing escapes [`Orchestrator::process`]: every failure becomes a
//! "Failed to process file operation" message carrying its [`ErrorKind`].

use crate::ai::{IntentResolver, LanguageModel, Operation, PromptTemplate};
use crate::automation::{ActionAttempt, AppController, AutomationBackend, StrategyTable};
use crate::config::AppConfig;
use crate::context::{events, RuntimeContext};
use crate::error::{AutoFileError, ErrorKind, Result};
use crate::registry::{FileRecord, WhitelistRegistry};
use crate::validator::{check_access, Access, PathValidator, ResolvedTarget};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

pub const NO_FILES_MESSAGE: &str = "No files available in the allowed directories.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub response: String,
    pub files: Vec<FileRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// 关闭链的执行记录
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionAttempt>,
}

pub struct Orchestrator {
    registry: WhitelistRegistry,
    resolver: IntentResolver,
    validator: PathValidator,
    controller: AppController,
    context: Arc<dyn RuntimeContext>,
    request_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        model: Arc<dyn LanguageModel>,
        backend: Arc<dyn AutomationBackend>,
        template: PromptTemplate,
        context: Arc<dyn RuntimeContext>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = WhitelistRegistry::new(config)?;
        let validator = PathValidator::new(registry.roots());
        let resolver = IntentResolver::new(
            model,
            template,
            config.max_files_in_prompt,
            config.file_types.clone(),
        );
        let controller = AppController::new(
            backend,
            StrategyTable::from_config(config),
            config.automation.clone(),
        );

        Ok(Self {
            registry,
            resolver,
            validator,
            controller,
            context,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &WhitelistRegistry {
        &self.registry
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.context.emit(event, payload) {
            tracing::warn!("发送 {} 事件失败: {}", event, e);
        }
    }

    pub async fn process(&self, user_text: &str) -> PipelineResult {
        let deadline = Instant::now() + self.request_timeout;
        tracing::info!("处理命令: {}", user_text);

        let files = self.registry.list_files(None, None);
        tracing::debug!("白名单中共 {} 个文件", files.len());
        if files.is_empty() {
            return PipelineResult {
                response: NO_FILES_MESSAGE.to_string(),
                files,
                error: None,
                actions: Vec::new(),
            };
        }

        let mut actions = Vec::new();
        match self.run(user_text, &files, deadline, &mut actions).await {
            Ok(response) => {
                self.emit(events::COMPLETED, json!({ "response": response }));
                PipelineResult {
                    response,
                    files,
                    error: None,
                    actions,
                }
            }
            Err(e) => {
                if e.is_user_correctable() {
                    tracing::info!("Failed to process file operation: {}", e);
                } else {
                    tracing::warn!("Failed to process file operation: {}", e);
                }
                self.emit(
                    events::FAILED,
                    json!({ "error": e.kind(), "message": e.to_string() }),
                );
                PipelineResult {
                    response: format!("Failed to process file operation: {}", e),
                    files: Vec::new(),
                    error: Some(e.kind()),
                    actions,
                }
            }
        }
    }

    async fn run(
        &self,
        user_text: &str,
        files: &[FileRecord],
        deadline: Instant,
        actions: &mut Vec<ActionAttempt>,
    ) -> Result<String> {
        let resolved = timeout_at(deadline, self.resolver.resolve(user_text, files))
            .await
            .map_err(|_| AutoFileError::ProviderTimeout(self.request_timeout.as_secs()))??;

        let intent = resolved.intent;
        self.emit(
            events::INTENT,
            json!({
                "operation": intent.operation,
                "filename": intent.filename,
                "matched": intent.matched,
            }),
        );

        if !intent.matched || intent.operation == Operation::Unknown {
            tracing::info!("无可执行操作，直接返回模型输出");
            return Ok(resolved.response);
        }

        let base_dir = self.base_dir_for(&intent.filename, files);
        let target = self.validator.validate(&base_dir, &intent.filename, Access::Read)?;
        ensure_listed(&target, files)?;

        // 以解析后的扩展名为准，软链接不能绕过写权限检查
        if intent.operation == Operation::Close
            && self.controller.table().close_implies_save(&target.extension)
        {
            check_access(&target.path, Access::ReadWrite)?;
        }

        timeout_at(deadline, self.execute(intent.operation, &target, actions))
            .await
            .map_err(|_| {
                AutoFileError::AutomationFailure(format!(
                    "request deadline of {:?} exceeded",
                    self.request_timeout
                ))
            })?
    }

    async fn execute(
        &self,
        operation: Operation,
        target: &ResolvedTarget,
        actions: &mut Vec<ActionAttempt>,
    ) -> Result<String> {
        if operation == Operation::Open {
            let report = self.controller.open(target).await?;
            return Ok(format_open(target, report.was_open));
        }

        let report = self.controller.close(target).await?;
        actions.extend(report.attempts);
        if !report.success {
            return Err(AutoFileError::AutomationFailure(format!(
                "could not close {}: every close action failed",
                target.file_name
            )));
        }
        Ok(format_close(target, report.already_closed))
    }

    /// 列表中同名文件所在目录；找不到时用第一个白名单根目录
    fn base_dir_for(&self, filename: &str, files: &[FileRecord]) -> PathBuf {
        files
            .iter()
            .find(|f| f.name == filename)
            .map(|f| f.parent_dir().to_path_buf())
            .or_else(|| self.registry.roots().next().map(Path::to_path_buf))
            .unwrap_or_default()
    }
}

/// 模型给出的文件必须出现在本次列表中；隐藏文件和超大文件不会被列出
fn ensure_listed(target: &ResolvedTarget, files: &[FileRecord]) -> Result<()> {
    let listed = files.iter().any(|f| {
        f.path == target.path
            || std::fs::canonicalize(&f.path)
                .map(|p| p == target.path)
                .unwrap_or(false)
    });
    if listed {
        return Ok(());
    }
    tracing::warn!("目标不在白名单列表中: {}", target.path.display());
    Err(AutoFileError::PathNotWhitelisted(target.path.clone()))
}

fn type_label(target: &ResolvedTarget) -> &str {
    if target.extension.is_empty() {
        "unknown"
    } else {
        &target.extension
    }
}

fn format_open(target: &ResolvedTarget, was_open: bool) -> String {
    let (size, modified) = match std::fs::metadata(&target.path) {
        Ok(meta) => (
            format_size(meta.len()),
            meta.modified()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        ),
        Err(e) => {
            tracing::warn!("读取文件信息失败: {}", e);
            return format!("Opening file: {}", target.path.display());
        }
    };

    let mut out = format!(
        "Opening file:\nName: {}\nType: {}\nSize: {}\nModified: {}\nPath: {}",
        target.file_name,
        type_label(target),
        size,
        modified,
        target.path.display()
    );
    if was_open {
        out.push_str("\nStatus: already open, brought to front");
    }
    out
}

fn format_close(target: &ResolvedTarget, already_closed: bool) -> String {
    let mut out = format!(
        "Closing file:\nName: {}\nType: {}\nPath: {}",
        target.file_name,
        type_label(target),
        target.path.display()
    );
    if already_closed {
        out.push_str("\nStatus: already closed");
    }
    out
}

/// Human-readable size, one decimal place.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = "B";
    for next in ["KB", "MB", "GB"] {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", size, unit)
}
