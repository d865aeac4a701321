//! Per-request response artifacts: every `request_with_logs` call leaves a
//! full record on disk, even when the inline result was not truncated.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::Local;

pub struct ResponseRecord<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub status_code: u16,
    pub duration: Duration,
    pub response_body: &'a str,
    pub process_logs: &'a str,
}

/// Write the record under `dir` as `response_YYYYMMDD_HHMMSS_mmm.log`.
/// Failures are logged and reported as `None`; the tool result simply
/// omits the file path in that case.
pub fn write_response_log(dir: &Path, record: &ResponseRecord<'_>) -> Option<PathBuf> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        tracing::error!(%err, dir = %dir.display(), "failed to create response log dir");
        return None;
    }

    let now = Local::now();
    let filename = format!(
        "response_{}_{:03}.log",
        now.format("%Y%m%d_%H%M%S"),
        now.timestamp_subsec_millis()
    );
    let path = dir.join(filename);

    let mut content = String::new();
    content.push_str("========================================\n");
    content.push_str("HTTP request/response record\n");
    content.push_str("========================================\n");
    content.push_str(&format!("time: {}\n", now.to_rfc3339()));
    content.push_str(&format!("method: {}\n", record.method));
    content.push_str(&format!("url: {}\n", record.url));
    content.push_str(&format!("status: {}\n", record.status_code));
    content.push_str(&format!("duration: {:?}\n", record.duration));
    content.push_str("\n========================================\n");
    content.push_str("response body\n");
    content.push_str("========================================\n");
    content.push_str(record.response_body);
    content.push('\n');
    content.push_str("\n========================================\n");
    content.push_str("process log window\n");
    content.push_str("========================================\n");
    if record.process_logs.is_empty() {
        content.push_str("(no process log output)");
    } else {
        content.push_str(record.process_logs);
    }
    content.push('\n');

    match std::fs::write(&path, content) {
        Ok(()) => Some(path),
        Err(err) => {
            tracing::error!(%err, path = %path.display(), "failed to write response log");
            None
        }
    }
}
