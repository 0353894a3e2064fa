//! 应用配置
//!
//! 所有白名单目录、大小限制、映射表都放在 [`AppConfig`] 中，启动时构建一次，
//! 再显式传入各组件的构造函数。

use crate::automation::strategy::CloseAction;
use crate::error::AutoFileError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 允许操作的根目录，支持 `~` 与 `$VAR`
    pub whitelist_dirs: Vec<String>,
    /// 类别 -> 扩展名列表（带点，如 ".pdf"）
    pub file_types: BTreeMap<String, Vec<String>>,
    /// 超过该大小（字节）的文件不会出现在列表中
    pub max_file_size: u64,
    pub max_files_in_prompt: usize,
    /// 扩展名（不带点）-> 应用名
    pub app_mapping: BTreeMap<String, String>,
    /// 应用名 -> 关闭策略；`standard` 为默认策略
    pub close_strategies: BTreeMap<String, Vec<CloseAction>>,
    /// 每个进程只打开一个文档的应用，进程存在即视为文件已打开
    pub single_document_apps: Vec<String>,
    /// 应用名 -> 本平台上的进程名；未列出时进程名与应用名相同
    pub process_names: BTreeMap<String, String>,
    pub automation: AutomationConfig,
    pub provider: ProviderSettings,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub poll_interval_ms: u64,
    pub detect_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub action_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    #[serde(alias = "openai_compatible")]
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名；Ollama 不需要
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

pub const STANDARD_STRATEGY: &str = "standard";

impl Default for AppConfig {
    fn default() -> Self {
        let file_types = [
            ("document", &[".pdf", ".doc", ".docx", ".txt", ".md", ".rtf"][..]),
            ("image", &[".jpg", ".jpeg", ".png", ".gif"][..]),
            ("data", &[".csv", ".xlsx", ".xls", ".json"][..]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect();

        let app_mapping = [
            ("txt", "TextEdit"),
            ("rtf", "TextEdit"),
            ("md", "Typora"),
            ("jpg", "Preview"),
            ("jpeg", "Preview"),
            ("png", "Preview"),
            ("gif", "Preview"),
            ("pdf", "PDF Reader"),
            ("csv", "Microsoft Excel"),
            ("xlsx", "Microsoft Excel"),
            ("xls", "Microsoft Excel"),
            ("json", "Visual Studio Code"),
            ("doc", "Microsoft Word"),
            ("docx", "Microsoft Word"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        use CloseAction::*;
        let close_strategies = [
            (STANDARD_STRATEGY, vec![GracefulCloseByTitle, KeystrokeClose]),
            ("Preview", vec![GracefulCloseByTitle, KeystrokeClose]),
            ("Microsoft Excel", vec![GracefulCloseByTitle, SaveAndQuit, ForceQuit]),
            ("PDF Reader", vec![GracefulCloseByTitle, SaveAndQuit, ForceQuit]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            whitelist_dirs: vec!["~/Downloads".to_string(), "~/Projects".to_string()],
            file_types,
            max_file_size: 10 * 1024 * 1024,
            max_files_in_prompt: 10,
            app_mapping,
            close_strategies,
            single_document_apps: vec!["PDF Reader".to_string(), "Microsoft Excel".to_string()],
            process_names: default_process_names(),
            automation: AutomationConfig::default(),
            provider: ProviderSettings::default(),
            request_timeout_secs: 90,
        }
    }
}

/// 应用映射里的名字是 macOS 的应用名，其他平台需要换成实际进程名
fn default_process_names() -> BTreeMap<String, String> {
    #[cfg(target_os = "macos")]
    let pairs: &[(&str, &str)] = &[];
    #[cfg(windows)]
    let pairs: &[(&str, &str)] = &[
        ("TextEdit", "notepad"),
        ("Typora", "Typora"),
        ("Preview", "Microsoft.Photos"),
        ("PDF Reader", "AcroRd32"),
        ("Microsoft Excel", "EXCEL"),
        ("Microsoft Word", "WINWORD"),
        ("Visual Studio Code", "Code"),
    ];
    #[cfg(not(any(target_os = "macos", windows)))]
    let pairs: &[(&str, &str)] = &[
        ("TextEdit", "gedit"),
        ("Typora", "typora"),
        ("Preview", "eog"),
        ("PDF Reader", "evince"),
        ("Microsoft Excel", "soffice.bin"),
        ("Microsoft Word", "soffice.bin"),
        ("Visual Studio Code", "code"),
    ];

    pairs
        .iter()
        .map(|(app, process)| (app.to_string(), process.to_string()))
        .collect()
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            detect_timeout_ms: 5_000,
            settle_delay_ms: 300,
            action_timeout_ms: 10_000,
        }
    }
}

impl AutomationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    /// 打开文件后的等待时间，上限 1 秒
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms.min(1_000))
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            model: "deepseek-llm".to_string(),
            base_url: None,
            api_key_env: None,
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

impl ProviderSettings {
    pub fn default_base_url(&self) -> &'static str {
        match self.kind {
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref().or(match self.kind {
            ProviderKind::Ollama => None,
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
        })?;
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), AutoFileError> {
        if self.whitelist_dirs.is_empty() {
            return Err(AutoFileError::Config("whitelist_dirs is empty".into()));
        }
        if self.max_files_in_prompt == 0 {
            return Err(AutoFileError::Config("max_files_in_prompt must be > 0".into()));
        }
        if self.automation.poll_interval_ms == 0 || self.automation.detect_timeout_ms == 0 {
            return Err(AutoFileError::Config(
                "automation poll interval and detect timeout must be > 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 || self.provider.timeout_secs == 0 {
            return Err(AutoFileError::Config("timeouts must be > 0".into()));
        }
        if !self.close_strategies.contains_key(STANDARD_STRATEGY) {
            return Err(AutoFileError::Config(format!(
                "close_strategies must contain a `{}` entry",
                STANDARD_STRATEGY
            )));
        }
        Ok(())
    }
}

/// 默认数据目录：`<data_dir>/autofile`
pub fn default_app_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("autofile"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 加载配置文件；文件不存在时写入默认配置
pub fn load_or_init(config_path: &Path) -> Result<AppConfig> {
    let config = if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("读取配置文件失败: {}", config_path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", config_path.display()))?;
        tracing::info!("从 {:?} 加载配置成功", config_path);
        config
    } else {
        tracing::info!("配置文件不存在，写入默认配置: {:?}", config_path);
        let config = AppConfig::default();
        save_config(config_path, &config)?;
        config
    };

    config.validate()?;
    Ok(config)
}

pub fn save_config(config_path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;

    // 原子性写入：先写临时文件，再重命名
    let temp_path = config_path.with_extension("json.tmp");
    std::fs::write(&temp_path, &content)?;

    // Windows 上 rename 不会覆盖已存在文件，需要先删除
    if config_path.exists() {
        std::fs::remove_file(config_path)?;
    }
    std::fs::rename(&temp_path, config_path)?;

    tracing::debug!("配置已保存到: {:?}", config_path);
    Ok(())
}
