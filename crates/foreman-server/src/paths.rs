//! On-disk artifact locations, all anchored at the supervisor executable's
//! directory so artifacts survive whatever cwd the MCP client uses.

use std::path::PathBuf;

pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Supervisor log and per-request response artifacts.
pub fn logs_dir() -> PathBuf {
    exe_dir().join("logs")
}

/// Saved memory documents.
pub fn mems_dir() -> PathBuf {
    exe_dir().join("mems")
}
