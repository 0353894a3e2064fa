//! Error taxonomy for the command pipeline.
//!
//! Library code returns [`AutoFileError`]; the orchestrator turns every
//! variant into a response message plus a serializable [`ErrorKind`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type Result<T, E = AutoFileError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum AutoFileError {
    #[error("no valid directories found in whitelist")]
    NoValidDirectories,

    #[error("path is not inside a whitelisted directory: {}", .0.display())]
    PathNotWhitelisted(PathBuf),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("no permission to {access} file: {}", .path.display())]
    PermissionDenied { path: PathBuf, access: &'static str },

    #[error("could not understand model response: {0}")]
    IntentUnparseable(String),

    #[error("language model did not respond within {0}s")]
    ProviderTimeout(u64),

    #[error("language model error: {0}")]
    ProviderError(String),

    #[error("state of {file} did not change within {waited_ms}ms")]
    StateDetectionTimeout { file: String, waited_ms: u64 },

    #[error("automation failed: {0}")]
    AutomationFailure(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// 对外暴露的错误类别（序列化为 snake_case 字符串）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoValidDirectories,
    PathNotWhitelisted,
    FileNotFound,
    PermissionDenied,
    IntentUnparseable,
    ProviderTimeout,
    ProviderError,
    StateDetectionTimeout,
    AutomationFailure,
    Config,
}

impl AutoFileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoValidDirectories => ErrorKind::NoValidDirectories,
            Self::PathNotWhitelisted(_) => ErrorKind::PathNotWhitelisted,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::IntentUnparseable(_) => ErrorKind::IntentUnparseable,
            Self::ProviderTimeout(_) => ErrorKind::ProviderTimeout,
            Self::ProviderError(_) => ErrorKind::ProviderError,
            Self::StateDetectionTimeout { .. } => ErrorKind::StateDetectionTimeout,
            Self::AutomationFailure(_) => ErrorKind::AutomationFailure,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whitelist/path/permission errors are deterministic; retrying them is pointless.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::PathNotWhitelisted(_) | Self::FileNotFound(_) | Self::PermissionDenied { .. }
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoValidDirectories => "no_valid_directories",
            Self::PathNotWhitelisted => "path_not_whitelisted",
            Self::FileNotFound => "file_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::IntentUnparseable => "intent_unparseable",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderError => "provider_error",
            Self::StateDetectionTimeout => "state_detection_timeout",
            Self::AutomationFailure => "automation_failure",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_snake_case() {
        let kind = AutoFileError::PathNotWhitelisted(PathBuf::from("/etc/passwd")).kind();
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"path_not_whitelisted\"");
        assert_eq!(kind.to_string(), "path_not_whitelisted");
    }

    #[test]
    fn only_path_errors_are_user_correctable() {
        assert!(AutoFileError::FileNotFound(PathBuf::from("a.txt")).is_user_correctable());
        assert!(!AutoFileError::ProviderTimeout(60).is_user_correctable());
        assert!(!AutoFileError::AutomationFailure("x".into()).is_user_correctable());
    }
}
