//! In-memory fakes for the language model, the desktop and the runtime context.

use crate::ai::LanguageModel;
use crate::automation::{AutomationBackend, CloseAction};
use crate::context::RuntimeContext;
use crate::error::{AutoFileError, Result};
use crate::registry::FileRecord;
use crate::validator::ResolvedTarget;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Build a target without touching the filesystem.
pub fn target_for(path: &str) -> ResolvedTarget {
    let path = PathBuf::from(path);
    ResolvedTarget {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
        root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        path,
    }
}

pub fn record(dir: &str, name: &str) -> FileRecord {
    let directory = PathBuf::from(dir);
    FileRecord {
        name: name.to_string(),
        path: directory.join(name),
        extension: Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
        size: 1024,
        directory,
        modified: chrono::Local::now(),
    }
}

// ==================== 语言模型 ====================

enum Reply {
    Text(String),
    Fail(Box<dyn Fn() -> AutoFileError + Send + Sync>),
}

pub struct StubModel {
    reply: Reply,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn reply(text: &str) -> Self {
        Self {
            reply: Reply::Text(text.to_string()),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(make: impl Fn() -> AutoFileError + Send + Sync + 'static) -> Self {
        Self {
            reply: Reply::Fail(Box::new(make)),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 模拟慢模型
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(make) => Err(make()),
        }
    }
}

// ==================== 桌面自动化 ====================

#[derive(Default)]
struct FakeState {
    /// (进程名, 窗口标题)
    windows: Vec<(String, String)>,
    running: HashSet<String>,
    results: HashMap<CloseAction, bool>,
    hanging: HashSet<CloseAction>,
    actions: Vec<(String, CloseAction)>,
    launched: Vec<PathBuf>,
    terminated: Vec<String>,
}

impl FakeState {
    fn quit(&mut self, app: &str) {
        self.windows.retain(|(owner, _)| owner != app);
        self.running.remove(app);
    }
}

/// Scriptable desktop. Every action fails unless told otherwise.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn add_window(&self, process: &str, title: &str) {
        self.state
            .lock()
            .unwrap()
            .windows
            .push((process.to_string(), title.to_string()));
    }

    pub fn set_running(&self, app: &str) {
        self.state.lock().unwrap().running.insert(app.to_string());
    }

    pub fn set_result(&self, action: CloseAction, succeeds: bool) {
        self.state.lock().unwrap().results.insert(action, succeeds);
    }

    pub fn hang_on(&self, action: CloseAction) {
        self.state.lock().unwrap().hanging.insert(action);
    }

    pub fn actions(&self) -> Vec<(String, CloseAction)> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn launched(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().launched.clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.state.lock().unwrap().terminated.clone()
    }

    fn is_hanging(&self, action: CloseAction) -> bool {
        self.state.lock().unwrap().hanging.contains(&action)
    }
}

#[async_trait]
impl AutomationBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch_default(&self, path: &Path) -> Result<()> {
        self.state.lock().unwrap().launched.push(path.to_path_buf());
        Ok(())
    }

    async fn query_windows_by_title(&self, needle: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .windows
            .iter()
            .filter(|(_, title)| title.contains(needle))
            .map(|(owner, _)| owner.clone())
            .collect())
    }

    async fn process_running(&self, process: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().running.contains(process))
    }

    async fn run_app_action(&self, app: &str, action: CloseAction, title: &str) -> bool {
        if self.is_hanging(action) {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        state.actions.push((app.to_string(), action));
        let succeeds = state.results.get(&action).copied().unwrap_or(false);
        if succeeds {
            match action {
                CloseAction::SaveAndQuit => state.quit(app),
                _ => state.windows.retain(|(_, t)| !t.contains(title)),
            }
        }
        succeeds
    }

    async fn terminate(&self, process: &str) -> bool {
        if self.is_hanging(CloseAction::ForceQuit) {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        state.actions.push((process.to_string(), CloseAction::ForceQuit));
        state.terminated.push(process.to_string());
        let succeeds = state.results.get(&CloseAction::ForceQuit).copied().unwrap_or(false);
        if succeeds {
            state.quit(process);
        }
        succeeds
    }
}

// ==================== 运行时上下文 ====================

#[derive(Default)]
pub struct RecordingContext {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingContext {
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl RuntimeContext for RecordingContext {
    fn app_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn resource_dir(&self) -> Option<PathBuf> {
        None
    }

    fn emit(&self, event: &str, payload: Value) -> anyhow::Result<()> {
        self.events.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }
}
