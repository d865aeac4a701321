/// Lifecycle of a supervised child process.
///
/// A child is `Starting` from spawn until its health endpoint answers,
/// `Ready` afterwards, and `Stopping` once a terminate request is in
/// flight. The exit watcher records the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProcessState {
    Starting,
    Ready,
    Stopping,
    Exited,
    Failed,
}

/// Outcome of the single OS-level wait on a child.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub clean: bool,
    pub detail: String,
}

impl ExitInfo {
    /// Result for a wait that itself failed (not a child exit status).
    pub fn wait_failed(err: impl std::fmt::Display) -> Self {
        Self {
            code: None,
            clean: false,
            detail: format!("wait failed: {err}"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        let detail = match status.code() {
            Some(0) => "exited normally (code 0)".to_string(),
            Some(code) => format!("exited with code {code}"),
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    match status.signal() {
                        Some(sig) => format!("terminated by signal {sig}"),
                        None => "exited with unknown status".to_string(),
                    }
                }
                #[cfg(not(unix))]
                {
                    "exited with unknown status".to_string()
                }
            }
        };

        Self {
            code: status.code(),
            clean: status.success(),
            detail,
        }
    }
}
