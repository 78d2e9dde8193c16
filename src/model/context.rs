//! The caller-supplied context that drives strategy selection.

use std::env;

use serde::{Deserialize, Serialize};

use super::StrategyKind;

/// The operating system family, as far as link semantics care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    /// The platform this process is running on.
    pub fn current() -> Self {
        match env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            _ => Self::Other,
        }
    }

    /// Whether creating symbolic links may need elevated privileges.
    pub fn links_need_privileges(self) -> bool {
        self == Self::Windows
    }
}

/// How much the caller values speed over safety.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PerformanceMode {
    Fast,
    #[default]
    Balanced,
    Safe,
}

/// Input to strategy selection. Built fresh for every setup call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceContext {
    pub platform: Platform,
    pub has_elevated_privileges: bool,
    pub staged_artifact_count: usize,
    pub performance_mode: PerformanceMode,
    pub environment_id: String,
    pub user_preferred_strategy: Option<StrategyKind>,
}
