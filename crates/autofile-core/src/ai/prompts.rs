//! Prompt 管理 - 外部化 prompt 配置
//!
//! 支持从资源目录的 `prompts.json` 加载，失败时使用内置默认值。

use super::prompt_engine::{templates, PromptTemplate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 渲染 file_matching 模板所需的变量
pub const FILE_MATCHING_VARIABLES: &[&str] = &["base_dir", "files", "query"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    pub file_matching: FileMatchingPrompts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatchingPrompts {
    pub template: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            file_matching: FileMatchingPrompts {
                template: templates::file_matching().raw().to_string(),
            },
        }
    }
}

impl PromptsConfig {
    /// 从资源目录加载；文件缺失、无法解析或缺少必需变量时回退到默认值
    pub fn load(resource_dir: Option<&Path>) -> Self {
        let Some(dir) = resource_dir else {
            tracing::info!("未指定资源路径，使用默认 prompts 配置");
            return Self::default();
        };

        let prompts_path = dir.join("prompts.json");
        if !prompts_path.exists() {
            tracing::info!("prompts.json 不存在，使用默认配置");
            return Self::default();
        }

        let content = match std::fs::read_to_string(&prompts_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("读取 prompts.json 失败: {}, 使用默认配置", e);
                return Self::default();
            }
        };

        let config = match serde_json::from_str::<PromptsConfig>(&content) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("解析 prompts.json 失败: {}, 使用默认配置", e);
                return Self::default();
            }
        };

        let missing = config.file_matching_template().missing_variables(FILE_MATCHING_VARIABLES);
        if !missing.is_empty() {
            tracing::warn!("prompts.json 模板缺少变量 {:?}, 使用默认配置", missing);
            return Self::default();
        }

        tracing::info!("从 {:?} 加载 prompts 配置成功", prompts_path);
        config
    }

    pub fn file_matching_template(&self) -> PromptTemplate {
        PromptTemplate::new(&self.file_matching.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_resource_dir_uses_default() {
        let config = PromptsConfig::load(None);
        assert!(config.file_matching_template().has_variable("files"));
    }

    #[test]
    fn loads_override_from_resource_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("prompts.json"),
            r#"{"file_matching": {"template": "Dir {{base_dir}} {{files}} -> {{query}}"}}"#,
        )
        .unwrap();
        let config = PromptsConfig::load(Some(dir.path()));
        assert_eq!(config.file_matching.template, "Dir {{base_dir}} {{files}} -> {{query}}");
    }

    #[test]
    fn template_without_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("prompts.json"),
            r#"{"file_matching": {"template": "{{files}}"}}"#,
        )
        .unwrap();
        let config = PromptsConfig::load(Some(dir.path()));
        assert_eq!(config.file_matching.template, templates::file_matching().raw());
    }

    #[test]
    fn malformed_json_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompts.json"), "{not json").unwrap();
        let config = PromptsConfig::load(Some(dir.path()));
        assert_eq!(config.file_matching.template, templates::file_matching().raw());
    }
}
