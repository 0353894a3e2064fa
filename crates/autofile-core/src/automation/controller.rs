//! Per-file application state machine.
//!
//! `Closed -> Opening -> Open -> Closing -> Closed`. Either terminal state is a
//! valid starting observation: the user may have opened or closed the file by
//! hand before the controller runs.

use super::strategy::{CloseAction, StrategyTable};
use super::AutomationBackend;
use crate::config::AutomationConfig;
use crate::error::{AutoFileError, Result};
use crate::validator::ResolvedTarget;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// 关闭链中一次动作的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionAttempt {
    pub app: String,
    pub action: CloseAction,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenReport {
    pub was_open: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseReport {
    pub app: Option<String>,
    pub already_closed: bool,
    pub success: bool,
    pub attempts: Vec<ActionAttempt>,
    /// 成功后是否确认窗口已消失；未检查时为 None
    pub verified_closed: Option<bool>,
}

struct Observation {
    state: FileState,
    window_owners: Vec<String>,
}

pub struct AppController {
    backend: Arc<dyn AutomationBackend>,
    table: StrategyTable,
    automation: AutomationConfig,
}

impl AppController {
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        table: StrategyTable,
        automation: AutomationConfig,
    ) -> Self {
        Self {
            backend,
            table,
            automation,
        }
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    async fn observe(&self, target: &ResolvedTarget) -> Result<Observation> {
        let window_owners = self.backend.query_windows_by_title(&target.file_name).await?;
        if !window_owners.is_empty() {
            if window_owners.len() > 1 {
                tracing::debug!(
                    "{} 个窗口标题包含 {}，视为一个打开信号",
                    window_owners.len(),
                    target.file_name
                );
            }
            return Ok(Observation {
                state: FileState::Open,
                window_owners,
            });
        }

        if let Some(app) = self.table.app_for_extension(&target.extension) {
            let process = self.table.process_for(app);
            if self.table.is_single_document_app(app) && self.backend.process_running(process).await? {
                return Ok(Observation {
                    state: FileState::Open,
                    window_owners: vec![process.to_string()],
                });
            }
        }

        Ok(Observation {
            state: FileState::Closed,
            window_owners,
        })
    }

    /// Single snapshot: `Open` or `Closed`.
    pub async fn detect_state(&self, target: &ResolvedTarget) -> Result<FileState> {
        Ok(self.observe(target).await?.state)
    }

    pub async fn wait_for_state(&self, target: &ResolvedTarget, desired: FileState) -> Result<()> {
        self.wait_for_state_with(
            target,
            desired,
            self.automation.detect_timeout(),
            self.automation.poll_interval(),
        )
        .await
    }

    /// Poll until the file reaches `desired` or `timeout` elapses.
    pub async fn wait_for_state_with(
        &self,
        target: &ResolvedTarget,
        desired: FileState,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.observe(target).await {
                Ok(obs) if obs.state == desired => return Ok(()),
                Ok(_) => {}
                Err(e) => tracing::debug!("状态检测失败，继续轮询: {}", e),
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(AutoFileError::StateDetectionTimeout {
                    file: target.file_name.clone(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }

    /// Launch the file with the default handler.
    ///
    /// Opening an already-open file launches again; most platforms bring the
    /// existing window to the front.
    pub async fn open(&self, target: &ResolvedTarget) -> Result<OpenReport> {
        let was_open = match self.detect_state(target).await {
            Ok(state) => state == FileState::Open,
            Err(e) => {
                tracing::debug!("打开前状态检测失败: {}", e);
                false
            }
        };

        tracing::info!(
            "{} -> {:?}: {}",
            if was_open { "Open" } else { "Closed" },
            FileState::Opening,
            target.path.display()
        );
        self.backend.launch_default(&target.path).await?;
        tokio::time::sleep(self.automation.settle_delay()).await;
        tracing::info!("{:?}: {}", FileState::Open, target.file_name);

        Ok(OpenReport { was_open })
    }

    /// Close the file through its application's strategy chain.
    ///
    /// An already-closed file succeeds without touching the backend beyond
    /// the state query.
    pub async fn close(&self, target: &ResolvedTarget) -> Result<CloseReport> {
        let observation = match self.observe(target).await {
            Ok(obs) => obs,
            Err(e) => {
                tracing::warn!("关闭前状态检测失败，按已打开处理: {}", e);
                Observation {
                    state: FileState::Open,
                    window_owners: Vec::new(),
                }
            }
        };

        let app = self
            .table
            .app_for_extension(&target.extension)
            .map(str::to_string)
            .or_else(|| observation.window_owners.first().cloned());

        if observation.state == FileState::Closed {
            tracing::info!("{} 已处于关闭状态", target.file_name);
            return Ok(CloseReport {
                app,
                already_closed: true,
                success: true,
                attempts: Vec::new(),
                verified_closed: Some(true),
            });
        }

        let app = app.ok_or_else(|| {
            AutoFileError::AutomationFailure(format!(
                "no application registered for .{} files",
                target.extension
            ))
        })?;

        // 关闭链按映射的应用名选取；进程级操作发给实际拥有窗口的进程
        let process = observation
            .window_owners
            .first()
            .cloned()
            .unwrap_or_else(|| self.table.process_for(&app).to_string());

        let chain = self.table.strategy_for(&app).to_vec();
        tracing::info!(
            "{:?} {} via {} [{}] ({} actions)",
            FileState::Closing,
            target.file_name,
            app,
            process,
            chain.len()
        );

        let mut attempts = Vec::with_capacity(chain.len());
        for action in chain {
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                self.automation.action_timeout(),
                self.run_action(&app, &process, action, target),
            )
            .await;
            let (succeeded, timed_out) = match outcome {
                Ok(ok) => (ok, false),
                Err(_) => (false, true),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if succeeded {
                tracing::info!("{} succeeded for {} ({}ms)", action, app, elapsed_ms);
            } else {
                tracing::warn!(
                    "{} failed for {}{} ({}ms)",
                    action,
                    app,
                    if timed_out { " (timed out)" } else { "" },
                    elapsed_ms
                );
            }

            attempts.push(ActionAttempt {
                app: if action == CloseAction::ForceQuit {
                    process.clone()
                } else {
                    app.clone()
                },
                action,
                succeeded,
                timed_out,
                elapsed_ms,
            });
            if succeeded {
                break;
            }
        }

        let success = attempts.last().map(|a| a.succeeded).unwrap_or(false);
        let verified_closed = if success {
            let closed = self.wait_for_state(target, FileState::Closed).await.is_ok();
            if !closed {
                tracing::warn!("{} 关闭动作已成功，但窗口仍然存在", target.file_name);
            }
            Some(closed)
        } else {
            None
        };

        Ok(CloseReport {
            app: Some(app),
            already_closed: false,
            success,
            attempts,
            verified_closed,
        })
    }

    async fn run_action(&self, app: &str, process: &str, action: CloseAction, target: &ResolvedTarget) -> bool {
        match action {
            CloseAction::ForceQuit => self.backend.terminate(process).await,
            _ => self.backend.run_app_action(app, action, &target.file_name).await,
        }
    }
}
