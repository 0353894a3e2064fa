//! AI module - turns a natural-language command into a typed intent
//!
//! - Prompt Engine: Template-based prompt generation
//! - Prompts: Prompt configuration management
//! - Provider: LLM API client implementations
//! - Intent: prompt building and model output parsing

pub mod intent;
pub mod prompt_engine;
pub mod prompts;
pub mod provider;

// Re-export commonly used types
pub use intent::{parse_intent, Intent, IntentResolver, Operation, ResolvedIntent, NO_MATCH_SENTINEL};
pub use prompt_engine::PromptTemplate;
pub use prompts::PromptsConfig;
pub use provider::{build_provider, LanguageModel, ProviderConfig};

/// Strip JSON code fence markers from LLM response
pub fn strip_json_code_fence(input: &str) -> &str {
    let s = input.trim();
    if s.starts_with("```json") {
        return s
            .trim_start_matches("```json")
            .trim_end_matches("```")
            .trim();
    }
    if s.starts_with("```") {
        return s
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
    }
    s
}
