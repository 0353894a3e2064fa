//! Intent resolution: listing + user text -> prompt -> model -> typed intent.

use super::prompt_engine::PromptTemplate;
use super::provider::LanguageModel;
use super::strip_json_code_fence;
use crate::error::{AutoFileError, Result};
use crate::prompt_vars;
use crate::registry::FileRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NO_MATCH_SENTINEL: &str = "No matching files found.";

static LEGACY_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)operation\s*[:：]\s*(\w+)\s*[,，]\s*filename\s*[:：]\s*(.+)")
        .expect("Invalid regex pattern")
});

/// Python 风格的单引号字典：`{'operation': 'open', 'filename': "Bob's.txt"}`
static SINGLE_QUOTED_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"](operation|filename)['"]\s*:\s*(?:'(.*?)'|"(.*?)")\s*[,}]"#)
        .expect("Invalid regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Close,
    Unknown,
}

impl Operation {
    /// 不区分大小写；open/close 以外一律视为 unknown
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "open" => Self::Open,
            "close" => Self::Close,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub operation: Operation,
    pub filename: String,
    pub matched: bool,
}

impl Intent {
    pub fn no_match() -> Self {
        Self {
            operation: Operation::Unknown,
            filename: String::new(),
            matched: false,
        }
    }
}

/// The parsed intent together with the raw model text it came from.
#[derive(Debug, Clone)]
pub struct ResolvedIntent {
    pub intent: Intent,
    pub response: String,
}

fn strip_quotes(s: &str) -> &str {
    s.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'))
        .trim()
}

/// 解析模型输出：JSON -> 旧文本格式 -> 未匹配哨兵
pub fn parse_intent(text: &str) -> Result<Intent> {
    let body = strip_json_code_fence(text);

    if let Some(intent) = parse_json_form(body) {
        return Ok(intent);
    }

    if let Some(caps) = LEGACY_FORMAT.captures(body) {
        let filename = caps[2].lines().next().unwrap_or_default();
        return Ok(Intent {
            operation: Operation::parse(&caps[1]),
            filename: strip_quotes(filename).to_string(),
            matched: true,
        });
    }

    if strip_quotes(body)
        .trim_end_matches('.')
        .eq_ignore_ascii_case(NO_MATCH_SENTINEL.trim_end_matches('.'))
    {
        return Ok(Intent::no_match());
    }

    Err(AutoFileError::IntentUnparseable(text.trim().to_string()))
}

#[derive(Deserialize)]
struct RawIntent {
    operation: String,
    filename: String,
}

fn parse_json_form(body: &str) -> Option<Intent> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &body[start..=end];

    let raw = serde_json::from_str::<RawIntent>(candidate)
        .ok()
        .or_else(|| parse_single_quoted(candidate))?;

    Some(Intent {
        operation: Operation::parse(&raw.operation),
        filename: raw.filename.trim().to_string(),
        matched: true,
    })
}

/// 按字段提取，值里的撇号不影响解析
fn parse_single_quoted(candidate: &str) -> Option<RawIntent> {
    let mut operation = None;
    let mut filename = None;
    for caps in SINGLE_QUOTED_FIELD.captures_iter(candidate) {
        let value = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
        match &caps[1] {
            "operation" => operation = Some(value),
            _ => filename = Some(value),
        }
    }
    Some(RawIntent {
        operation: operation?,
        filename: filename?,
    })
}

pub struct IntentResolver {
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    max_files: usize,
    /// 类别 -> 扩展名（带点）
    file_types: BTreeMap<String, Vec<String>>,
}

impl IntentResolver {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        template: PromptTemplate,
        max_files: usize,
        file_types: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            model,
            template,
            max_files,
            file_types,
        }
    }

    fn category_list(&self, category: &str) -> String {
        self.file_types
            .get(category)
            .map(|exts| exts.join(", "))
            .unwrap_or_default()
    }

    pub fn build_prompt(&self, user_text: &str, files: &[FileRecord]) -> String {
        if files.len() > self.max_files {
            tracing::warn!(
                "候选文件过多 ({}), 只保留前 {} 个",
                files.len(),
                self.max_files
            );
        }

        let listing = files
            .iter()
            .take(self.max_files)
            .map(|f| format!("- {} ({})", f.name, f.extension))
            .collect::<Vec<_>>()
            .join("\n");

        let base_dir = files
            .first()
            .map(|f| f.directory.display().to_string())
            .unwrap_or_default();

        self.template.render(&prompt_vars! {
            "base_dir" => base_dir,
            "files" => listing,
            "document_types" => self.category_list("document"),
            "image_types" => self.category_list("image"),
            "data_types" => self.category_list("data"),
            "query" => user_text.trim(),
        })
    }

    pub async fn resolve(&self, user_text: &str, files: &[FileRecord]) -> Result<ResolvedIntent> {
        let prompt = self.build_prompt(user_text, files);
        tracing::debug!("调用模型 {}，prompt 长度 {} 字符", self.model.name(), prompt.len());

        let response = self.model.generate(&prompt).await?;
        let response = response.trim().to_string();
        tracing::debug!("模型原始输出: {}", response);

        let intent = parse_intent(&response)?;
        tracing::info!(
            "解析意图: operation={:?}, filename={}, matched={}",
            intent.operation,
            intent.filename,
            intent.matched
        );
        Ok(ResolvedIntent { intent, response })
    }
}
