//! Supported AI tools and synchronization status values
//!
//! The folder/file signatures are consumed by project discovery, not by the
//! store itself.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifiers of the tools whose artifacts are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolId {
    Claude,
    Copilot,
    Cline,
    Antigravity,
    Windsurf,
    Aider,
    Continue,
    Cursor,
    Gemini,
}

/// On-disk markers that reveal a tool is in use
#[derive(Debug, Clone, Copy)]
pub struct ToolSignature {
    pub folders: &'static [&'static str],
    pub files: &'static [&'static str],
}

impl ToolId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::Claude => "claude",
            ToolId::Copilot => "copilot",
            ToolId::Cline => "cline",
            ToolId::Antigravity => "antigravity",
            ToolId::Windsurf => "windsurf",
            ToolId::Aider => "aider",
            ToolId::Continue => "continue",
            ToolId::Cursor => "cursor",
            ToolId::Gemini => "gemini",
        }
    }

    pub fn all() -> &'static [ToolId] {
        &[
            ToolId::Claude,
            ToolId::Copilot,
            ToolId::Cline,
            ToolId::Antigravity,
            ToolId::Windsurf,
            ToolId::Aider,
            ToolId::Continue,
            ToolId::Cursor,
            ToolId::Gemini,
        ]
    }

    pub fn signature(&self) -> ToolSignature {
        match self {
            ToolId::Claude => ToolSignature {
                folders: &[".claude"],
                files: &["CLAUDE.md", "AI_CONTEXT.md"],
            },
            ToolId::Copilot => ToolSignature {
                folders: &[".github/instructions"],
                files: &[".github/copilot-instructions.md"],
            },
            ToolId::Cline => ToolSignature {
                folders: &[".clinerules"],
                files: &[".clinerules"],
            },
            ToolId::Antigravity => ToolSignature {
                folders: &[".agent"],
                files: &[],
            },
            ToolId::Windsurf => ToolSignature {
                folders: &[".windsurf/rules"],
                files: &[".windsurfrules"],
            },
            ToolId::Aider => ToolSignature {
                folders: &[],
                files: &[".aider.conf.yml", "CONVENTIONS.md"],
            },
            ToolId::Continue => ToolSignature {
                folders: &[".continue"],
                files: &[".continue/config.json", ".continue/config.yaml"],
            },
            ToolId::Cursor => ToolSignature {
                folders: &[".cursor/rules"],
                files: &[".cursorrules"],
            },
            ToolId::Gemini => ToolSignature {
                folders: &[".gemini"],
                files: &["GEMINI.md"],
            },
        }
    }
}

impl FromStr for ToolId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ToolId::all()
            .iter()
            .copied()
            .find(|tool| tool.as_str() == s.to_lowercase())
            .ok_or_else(|| Error::InvalidValue(format!("Unknown tool: {}", s)))
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Synchronization state of a tool's generated artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
    Conflict,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        }
    }

    pub fn all() -> &'static [SyncStatus] {
        &[SyncStatus::Synced, SyncStatus::Pending, SyncStatus::Conflict, SyncStatus::Error]
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            "conflict" => Ok(SyncStatus::Conflict),
            "error" => Ok(SyncStatus::Error),
            _ => Err(Error::InvalidValue(format!("Unknown sync status: {}", s))),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_roundtrip() {
        for tool in ToolId::all() {
            assert_eq!(ToolId::from_str(tool.as_str()).unwrap(), *tool);
        }
        assert_eq!(ToolId::from_str("Claude").unwrap(), ToolId::Claude);
        assert!(ToolId::from_str("notepad").is_err());
    }

    #[test]
    fn test_every_tool_has_a_signature() {
        for tool in ToolId::all() {
            let sig = tool.signature();
            assert!(!sig.folders.is_empty() || !sig.files.is_empty(), "{} has no signature", tool);
        }
    }

    #[test]
    fn test_sync_status_roundtrip() {
        for status in SyncStatus::all() {
            assert_eq!(SyncStatus::from_str(status.as_str()).unwrap(), *status);
        }
    }
}
