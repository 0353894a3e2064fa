//! Prompt 模板引擎
//!
//! 支持 `{{variable}}` 语法的变量替换，模板文本可以放在 `prompts.json`
//! 中覆盖，代码只负责准备变量。

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// 匹配 `{{variable_name}}`
static VARIABLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("Invalid regex pattern"));

/// # Example
/// ```
/// use autofile_core::ai::PromptTemplate;
/// use autofile_core::prompt_vars;
///
/// let template = PromptTemplate::new("Files in {{base_dir}}:\n{{files}}");
/// let prompt = template.render(&prompt_vars! {
///     "base_dir" => "/home/me/Downloads",
///     "files" => "- report.pdf (pdf)",
/// });
/// assert!(prompt.starts_with("Files in /home/me/Downloads"));
/// ```
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// 单次扫描替换；未提供的变量保留原占位符。
    /// 变量值中即使出现 `{{x}}` 也不会被二次展开。
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        VARIABLE_REGEX
            .replace_all(&self.template, |caps: &Captures| {
                variables
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.template.contains(&format!("{{{{{}}}}}", name))
    }

    /// 返回缺失的必需变量
    pub fn missing_variables(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| !self.has_variable(name))
            .map(|name| name.to_string())
            .collect()
    }

    pub fn raw(&self) -> &str {
        &self.template
    }
}

/// 快速构建变量 HashMap
#[macro_export]
macro_rules! prompt_vars {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert($key.to_string(), $value.to_string());
        )*
        map
    }};
}

/// 内置模板
pub mod templates {
    use super::PromptTemplate;

    /// 文件匹配模板：从用户输入中识别操作与文件名
    pub fn file_matching() -> PromptTemplate {
        PromptTemplate::new(
            "You are a file assistant helping identify the proper operation and filename from the user's query.\n\
             \n\
             Available files in {{base_dir}}:\n\
             {{files}}\n\
             \n\
             File type categories:\n\
             - Documents: {{document_types}}\n\
             - Images: {{image_types}}\n\
             - Data Files: {{data_types}}\n\
             \n\
             Instructions:\n\
             1. Match files based on the user's description. The filename must be one from the list above.\n\
             2. Support natural language queries in any language.\n\
             3. When the user mentions \"document\", \"image\" or \"data\", match any file of that category.\n\
             4. When the user wants to \"open\" or \"打开\" a file the operation is open; \
             when the user wants to \"close\", \"关闭\" or \"关上\" a file the operation is close.\n\
             5. Answer with a single JSON object and nothing else:\n\
             {\"operation\": \"open\" | \"close\", \"filename\": \"<the filename>\"}\n\
             6. If no files match, answer exactly: No matching files found.\n\
             \n\
             Examples:\n\
             User query: \"open the document\"\n\
             Response: {\"operation\": \"open\", \"filename\": \"document.docx\"}\n\
             \n\
             User query: \"关闭 the image\"\n\
             Response: {\"operation\": \"close\", \"filename\": \"image.jpg\"}\n\
             \n\
             User query: {{query}}\n\
             \n\
             Response:",
        )
    }
}
