//! Declarative close strategies.
//!
//! Adding an application is a data change: map its extensions in
//! `app_mapping` and, if the standard chain is not enough, give it an entry
//! in `close_strategies`.

use crate::config::{AppConfig, STANDARD_STRATEGY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseAction {
    /// 激活应用，关闭标题包含文件名的所有窗口
    GracefulCloseByTitle,
    /// 激活应用，发送平台的“关闭窗口”快捷键
    KeystrokeClose,
    /// 激活应用，发送“保存”快捷键后退出整个应用（会关闭该应用的所有窗口）
    SaveAndQuit,
    /// 直接结束进程
    ForceQuit,
}

impl CloseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GracefulCloseByTitle => "graceful_close_by_title",
            Self::KeystrokeClose => "keystroke_close",
            Self::SaveAndQuit => "save_and_quit",
            Self::ForceQuit => "force_quit",
        }
    }

    /// Whether the action may write the document before closing.
    pub fn implies_save(&self) -> bool {
        matches!(self, Self::SaveAndQuit)
    }
}

impl std::fmt::Display for CloseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension -> application name, plus application name -> close chain.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    app_mapping: BTreeMap<String, String>,
    strategies: BTreeMap<String, Vec<CloseAction>>,
    single_document_apps: HashSet<String>,
    process_names: BTreeMap<String, String>,
}

impl StrategyTable {
    pub fn from_config(config: &AppConfig) -> Self {
        let app_mapping = config
            .app_mapping
            .iter()
            .map(|(ext, app)| (ext.trim_start_matches('.').to_lowercase(), app.clone()))
            .collect();

        let mut strategies = config.close_strategies.clone();
        strategies
            .entry(STANDARD_STRATEGY.to_string())
            .or_insert_with(|| vec![CloseAction::GracefulCloseByTitle, CloseAction::KeystrokeClose]);

        Self {
            app_mapping,
            strategies,
            single_document_apps: config.single_document_apps.iter().cloned().collect(),
            process_names: config.process_names.clone(),
        }
    }

    pub fn app_for_extension(&self, extension: &str) -> Option<&str> {
        let ext = extension.trim_start_matches('.').to_lowercase();
        self.app_mapping.get(&ext).map(String::as_str)
    }

    /// 没有专门配置的应用使用 `standard` 策略
    pub fn strategy_for(&self, app: &str) -> &[CloseAction] {
        self.strategies
            .get(app)
            .or_else(|| self.strategies.get(STANDARD_STRATEGY))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 应用在本平台上的进程名
    pub fn process_for<'a>(&'a self, app: &'a str) -> &'a str {
        self.process_names.get(app).map(String::as_str).unwrap_or(app)
    }

    pub fn is_single_document_app(&self, app: &str) -> bool {
        self.single_document_apps.contains(app)
    }

    /// Whether closing a file with this extension may save it first.
    pub fn close_implies_save(&self, extension: &str) -> bool {
        self.app_for_extension(extension)
            .map(|app| self.strategy_for(app).iter().any(CloseAction::implies_save))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_apps_use_standard_chain() {
        let table = StrategyTable::from_config(&AppConfig::default());
        assert_eq!(
            table.strategy_for("Some Editor"),
            &[CloseAction::GracefulCloseByTitle, CloseAction::KeystrokeClose]
        );
    }

    #[test]
    fn spreadsheet_chain_saves_and_quits() {
        let table = StrategyTable::from_config(&AppConfig::default());
        let app = table.app_for_extension("CSV").unwrap();
        assert_eq!(app, "Microsoft Excel");
        assert_eq!(
            table.strategy_for(app),
            &[
                CloseAction::GracefulCloseByTitle,
                CloseAction::SaveAndQuit,
                CloseAction::ForceQuit
            ]
        );
        assert!(table.close_implies_save("csv"));
        assert!(!table.close_implies_save("txt"));
        assert!(table.is_single_document_app("PDF Reader"));
    }

    #[test]
    fn standard_chain_is_filled_in_when_missing() {
        let mut config = AppConfig::default();
        config.close_strategies.clear();
        let table = StrategyTable::from_config(&config);
        assert_eq!(table.strategy_for("TextEdit").len(), 2);
    }

    #[test]
    fn process_names_fall_back_to_app_name() {
        let mut config = AppConfig::default();
        config.process_names = [("PDF Reader".to_string(), "zathura".to_string())].into();
        let table = StrategyTable::from_config(&config);
        assert_eq!(table.process_for("PDF Reader"), "zathura");
        assert_eq!(table.process_for("Sublime Text"), "Sublime Text");
    }

    #[test]
    fn actions_deserialize_from_snake_case() {
        let actions: Vec<CloseAction> =
            serde_json::from_str(r#"["graceful_close_by_title", "force_quit"]"#).unwrap();
        assert_eq!(actions, vec![CloseAction::GracefulCloseByTitle, CloseAction::ForceQuit]);
    }
}
