//! The tool surface bound to the MCP transport: process lifecycle,
//! request-with-logs, and the memory/knowledge stores.
//!
//! Handlers run strictly one at a time (a single-permit semaphore at
//! dispatch): spawning touches ports and the process table, and
//! interleaved tool calls race in practice.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::OnceLock,
    time::{Duration, Instant},
};

use anyhow::Context;
use reqwest::{Method, Url, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::knowledge::{self, SearchFilter};
use crate::memory;
use crate::paths;
use crate::port_reaper;
use crate::process_manager::{ProcessManager, SpawnRequest};
use crate::protocol::ToolOutcome;
use crate::readiness;
use crate::response_log::{self, ResponseRecord};

const DEFAULT_START_TIMEOUT_SECS: u64 = 60;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Inline budget for the rendered response+logs; anything larger goes to
/// the response log file with summaries inline.
const MAX_INLINE_CHARS: usize = 4000;
const SUMMARY_CHARS: usize = 500;
/// Settle time after killing a homonym so its port is actually free.
const PORT_RELEASE_SETTLE: Duration = Duration::from_secs(1);

fn request_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client")
    })
}

fn health_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        // Individual probes are bounded by the readiness deadline.
        reqwest::Client::builder()
            .build()
            .expect("failed to build reqwest client")
    })
}

#[derive(Debug, Deserialize)]
struct StartProcessArgs {
    name: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    work_dir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    health_check_url: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    health_check_method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestWithLogsArgs {
    #[serde(default)]
    process_name: Option<String>,
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KillProcessArgs {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct SaveMemoryArgs {
    system_prompt: String,
    content: String,
    #[serde(default)]
    memory_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadMemoryArgs {
    memory_id: String,
}

#[derive(Debug, Deserialize)]
struct SaveKnowledgeArgs {
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    knowledge_id: Option<String>,
    work_dir: String,
}

#[derive(Debug, Deserialize)]
struct SearchKnowledgeArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    work_dir: String,
}

pub struct Tools {
    manager: ProcessManager,
    gate: Semaphore,
}

impl Tools {
    pub fn new(manager: ProcessManager) -> Self {
        Self {
            manager,
            gate: Semaphore::new(1),
        }
    }

    /// Dispatch one `tools/call`. Returns `None` for an unknown tool name.
    pub async fn call(&self, name: &str, arguments: Value) -> Option<ToolOutcome> {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Some(ToolOutcome::error("supervisor is shutting down")),
        };

        let outcome = match name {
            "start_process" => match parse_args::<StartProcessArgs>(arguments) {
                Ok(args) => self.start_process(args).await,
                Err(err) => ToolOutcome::error(err),
            },
            "request_with_logs" => match parse_args::<RequestWithLogsArgs>(arguments) {
                Ok(args) => self.request_with_logs(args).await,
                Err(err) => ToolOutcome::error(err),
            },
            "kill_process" => match parse_args::<KillProcessArgs>(arguments) {
                Ok(args) => self.kill_process(args).await,
                Err(err) => ToolOutcome::error(err),
            },
            "save_memory" => match parse_args::<SaveMemoryArgs>(arguments) {
                Ok(args) => save_memory_tool(args),
                Err(err) => ToolOutcome::error(err),
            },
            "read_memory" => match parse_args::<ReadMemoryArgs>(arguments) {
                Ok(args) => read_memory_tool(args),
                Err(err) => ToolOutcome::error(err),
            },
            "save_knowledge" => match parse_args::<SaveKnowledgeArgs>(arguments) {
                Ok(args) => save_knowledge_tool(args),
                Err(err) => ToolOutcome::error(err),
            },
            "search_knowledge" => match parse_args::<SearchKnowledgeArgs>(arguments) {
                Ok(args) => search_knowledge_tool(args),
                Err(err) => ToolOutcome::error(err),
            },
            _ => return None,
        };
        Some(outcome)
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown_all().await;
    }

    async fn start_process(&self, args: StartProcessArgs) -> ToolOutcome {
        tracing::info!(name = %args.name, command = %args.command, args = ?args.args, health = %args.health_check_url, "start_process");

        if args.name.is_empty() {
            return ToolOutcome::error("name must not be empty");
        }
        if args.command.contains(char::is_whitespace) {
            return ToolOutcome::error(format!(
                "command '{}' contains whitespace\n\n\
                 Pass the bare executable in `command` and its arguments in `args`:\n\
                 - command: \"go\", args: [\"run\", \".\"]\n\
                 - command: \"python\", args: [\"-m\", \"http.server\", \"8080\"]\n\
                 - command: \"node\", args: [\"app.js\"]",
                args.command
            ));
        }
        let health = match Url::parse(&args.health_check_url) {
            Ok(url) => url,
            Err(err) => {
                return ToolOutcome::error(format!("health_check_url is not a valid URL: {err}"));
            }
        };
        let timeout = Duration::from_secs(match args.timeout_seconds {
            Some(secs) if secs > 0 => secs,
            _ => DEFAULT_START_TIMEOUT_SECS,
        });

        // A live homonym goes first; the name keys the registry.
        if self.manager.get(&args.name).await.is_some() {
            tracing::info!(name = %args.name, "killing previous process with the same name");
            if let Err(err) = self.manager.terminate(&args.name).await {
                tracing::error!(name = %args.name, %err, "failed to clean up previous process");
            }
            tokio::time::sleep(PORT_RELEASE_SETTLE).await;
        }

        // Evict foreign squatters from the target port. Best effort: a
        // reclaim failure surfaces later as a readiness failure anyway.
        let port = health.port_or_known_default().unwrap_or(0);
        if port > 0 && port_reaper::is_port_in_use(port).await {
            match port_reaper::reap_port(port).await {
                Ok(pids) => tracing::info!(port, ?pids, "reclaimed occupied health port"),
                Err(err) => tracing::warn!(port, %err, "could not reclaim occupied health port"),
            }
        }

        let proc = match self
            .manager
            .spawn(SpawnRequest {
                name: args.name.clone(),
                command: args.command,
                args: args.args,
                work_dir: args.work_dir,
                env: args.env,
                health_check_url: args.health_check_url.clone(),
            })
            .await
        {
            Ok(proc) => proc,
            Err(err) => return ToolOutcome::error(format!("failed to start process: {err:#}")),
        };

        let method = args.health_check_method.as_deref().unwrap_or("GET");
        if let Err(err) = readiness::wait_until_ready(&proc, method, timeout, health_client()).await
        {
            let collected = proc.log_snapshot().await;
            if let Err(term_err) = self.manager.terminate(&args.name).await {
                tracing::error!(name = %args.name, %term_err, "cleanup after failed start");
            }
            return ToolOutcome::error(format!(
                "process failed to start\nPID: {}\nhealth check: {}\nerror: {err:#}\n\ncollected log:\n{collected}",
                proc.pid, args.health_check_url
            ));
        }

        proc.mark_ready().await;
        let startup_log = proc.log_snapshot().await;
        ToolOutcome::ok(format!(
            "process started\nPID: {}\nstarted: {}\nwork dir: {}\nhealth check: {}\n\nstartup log:\n{startup_log}",
            proc.pid,
            proc.started_at.to_rfc3339(),
            proc.work_dir.display(),
            args.health_check_url
        ))
    }

    async fn request_with_logs(&self, args: RequestWithLogsArgs) -> ToolOutcome {
        tracing::info!(process = ?args.process_name, url = %args.url, method = ?args.method, "request_with_logs");

        let assoc = match args.process_name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => match self.manager.get(name).await {
                Some(proc) => Some(proc),
                None => return ToolOutcome::error(format!("unknown process: {name}")),
            },
            // Auto-association needs a full URL; a bare path carries no
            // host or port to match against.
            None if is_absolute_url(&args.url) => self.manager.find_by_url(&args.url).await,
            None => None,
        };

        let full_url = match &assoc {
            Some(proc) => match rewrite_url(&proc.health_check_url, &args.url) {
                Ok(url) => url,
                Err(err) => {
                    return ToolOutcome::error(format!("failed to build request URL: {err:#}"));
                }
            },
            None => args.url.clone(),
        };

        let method_str = args
            .method
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let Ok(method) = Method::from_bytes(method_str.as_bytes()) else {
            return ToolOutcome::error(format!("invalid HTTP method: {method_str}"));
        };
        let target = match Url::parse(&full_url) {
            Ok(url) => url,
            Err(err) => return ToolOutcome::error(format!("url is not valid: {err}")),
        };

        // Stamp before sending so the window catches whatever the child
        // logs while handling the request.
        let request_start = Instant::now();

        let mut request = request_client().request(method, target);
        let mut has_content_type = false;
        for (key, value) in &args.headers {
            if key.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            request = request.header(key.as_str(), value.as_str());
        }
        let body = args.body.unwrap_or_default();
        if !body.is_empty() {
            if !has_content_type {
                request = request.header(header::CONTENT_TYPE, "application/json");
            }
            request = request.body(body);
        }

        let (status_code, response_body) = match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.text().await {
                    Ok(text) => (status, text),
                    Err(err) => (status, format!("(failed to read response body: {err})")),
                }
            }
            // A transport failure is still a useful result; the caller
            // wants the log window either way.
            Err(err) => (0, format!("request failed: {err}")),
        };
        let duration = request_start.elapsed();
        tracing::info!(
            method = %method_str,
            url = %full_url,
            status_code,
            duration_ms = duration.as_millis() as u64,
            "request finished"
        );

        let process_logs = match &assoc {
            Some(proc) => {
                let window = proc.logs.read().await.window(request_start);
                if window.is_empty() {
                    "(no process log output during the request)".to_string()
                } else {
                    window
                }
            }
            None => "(no process associated)".to_string(),
        };

        let log_file = response_log::write_response_log(
            &paths::logs_dir(),
            &ResponseRecord {
                method: &method_str,
                url: &full_url,
                status_code,
                duration,
                response_body: &response_body,
                process_logs: &process_logs,
            },
        );

        let mut structured = json!({
            "status_code": status_code,
            "duration_ms": duration.as_millis() as u64,
        });
        if let Some(path) = &log_file {
            structured["log_file"] = json!(path.display().to_string());
        }

        let header_text = format!(
            "request completed\nmethod: {method_str}\nurl: {full_url}\nstatus: {status_code}\nduration: {duration:?}"
        );

        let inline_len = response_body.len() + process_logs.len();
        let text = if inline_len > MAX_INLINE_CHARS && log_file.is_some() {
            let file = log_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let summary = truncate(&response_body, SUMMARY_CHARS);
            if assoc.is_some() {
                structured["logs_summary"] = json!(truncate(&process_logs, SUMMARY_CHARS));
            }
            let rendered = format!(
                "{header_text}\n\nresponse too large to inline; full response and log window saved to:\n{file}\n\nresponse summary:\n{summary}"
            );
            structured["response_summary"] = json!(summary);
            rendered
        } else {
            let mut rendered = format!("{header_text}\n\nresponse:\n{response_body}");
            if assoc.is_some() {
                rendered.push_str(&format!("\n\nprocess log during request:\n{process_logs}"));
                structured["logs"] = json!(process_logs);
            }
            structured["response"] = json!(response_body);
            rendered
        };

        ToolOutcome::ok_with(text, structured)
    }

    async fn kill_process(&self, args: KillProcessArgs) -> ToolOutcome {
        let name = args.name.as_deref().filter(|n| !n.is_empty());
        let port = args.port.filter(|p| *p > 0);

        match (name, port) {
            (Some(name), _) => {
                tracing::info!(name, "kill_process by name");
                let Some(proc) = self.manager.get(name).await else {
                    return ToolOutcome::error(format!(
                        "no process named '{name}' was started by this supervisor\n\
                         If something is running anyway, kill it by port instead."
                    ));
                };
                let pid = proc.pid;
                match self.manager.terminate(name).await {
                    Ok(()) => {
                        ToolOutcome::ok(format!("terminated process\nname: {name}\nPID: {pid}"))
                    }
                    Err(err) => {
                        ToolOutcome::error(format!("failed to terminate process '{name}': {err:#}"))
                    }
                }
            }
            (None, Some(port)) => {
                tracing::info!(port, "kill_process by port");
                match port_reaper::reap_port(port).await {
                    Ok(pids) => {
                        let list = pids
                            .iter()
                            .map(u32::to_string)
                            .collect::<Vec<_>>()
                            .join(", ");
                        ToolOutcome::ok(format!(
                            "terminated {} process(es) listening on port {port}\nPIDs: {list}",
                            pids.len()
                        ))
                    }
                    Err(err) => ToolOutcome::error(format!(
                        "failed to kill by port {port}: {err:#}"
                    )),
                }
            }
            (None, None) => {
                ToolOutcome::error("either `name` or `port` (>= 1) is required")
            }
        }
    }
}

fn save_memory_tool(args: SaveMemoryArgs) -> ToolOutcome {
    if args.system_prompt.is_empty() {
        return ToolOutcome::error(
            "system_prompt must not be empty; include your complete system prompt so the memory can restore state",
        );
    }
    if args.content.is_empty() {
        return ToolOutcome::error("content must not be empty");
    }

    match memory::save_memory(
        &paths::mems_dir(),
        &args.system_prompt,
        &args.content,
        args.memory_id.as_deref(),
    ) {
        Ok(saved) => {
            let action = if saved.updated {
                "memory updated"
            } else {
                "memory saved"
            };
            ToolOutcome::ok(format!(
                "{action}\nmemory ID: {}\nfile: {}\ncontent length: {} chars\n\n\
                 Keep this memory ID. Pass it as memory_id to update the memory later, \
                 or hand it to read_memory to recover state after a context reset.",
                saved.id,
                saved.path.display(),
                args.content.len()
            ))
        }
        Err(err) => ToolOutcome::error(format!("failed to save memory: {err:#}")),
    }
}

fn read_memory_tool(args: ReadMemoryArgs) -> ToolOutcome {
    if args.memory_id.is_empty() {
        return ToolOutcome::error("memory_id is required");
    }
    match memory::read_memory(&paths::mems_dir(), &args.memory_id) {
        Ok((path, content)) => ToolOutcome::ok(format!(
            "memory ID: {}\nfile: {}\n\n---\n\n{content}",
            args.memory_id,
            path.display()
        )),
        Err(err) => ToolOutcome::error(format!("failed to read memory: {err:#}")),
    }
}

fn save_knowledge_tool(args: SaveKnowledgeArgs) -> ToolOutcome {
    if args.title.is_empty() {
        return ToolOutcome::error("title must not be empty");
    }
    if args.content.is_empty() {
        return ToolOutcome::error("content must not be empty");
    }
    if args.work_dir.is_empty() {
        return ToolOutcome::error("work_dir must not be empty; the knowledge base lives under <work_dir>/.knowledge");
    }

    match knowledge::save_knowledge(
        Path::new(&args.work_dir),
        &args.title,
        &args.content,
        &args.tags,
        args.category.as_deref(),
        args.knowledge_id.as_deref(),
    ) {
        Ok(saved) => {
            let action = if saved.updated {
                "knowledge updated"
            } else {
                "knowledge saved"
            };
            ToolOutcome::ok(format!(
                "{action}\nknowledge ID: {}\ntitle: {}\ncategory: {}\ntags: {}\nfile: {}\n\n\
                 Use search_knowledge to find entries; pass knowledge_id to update this one.",
                saved.id,
                saved.title,
                saved.category,
                saved.tags,
                saved.path.display()
            ))
        }
        Err(err) => ToolOutcome::error(format!("failed to save knowledge: {err:#}")),
    }
}

fn search_knowledge_tool(args: SearchKnowledgeArgs) -> ToolOutcome {
    if args.work_dir.is_empty() {
        return ToolOutcome::error("work_dir must not be empty; the knowledge base lives under <work_dir>/.knowledge");
    }

    let filter = SearchFilter {
        query: args.query.as_deref().unwrap_or(""),
        tags: &args.tags,
        category: args.category.as_deref().unwrap_or(""),
        limit: args.limit,
    };
    match knowledge::search_knowledge(Path::new(&args.work_dir), &filter) {
        Ok(hits) if hits.is_empty() => ToolOutcome::ok(
            "no matching knowledge entries found; the knowledge base may be empty (use save_knowledge to add entries)",
        ),
        Ok(hits) => {
            let mut out = format!("found {} knowledge entr(ies)\n\n", hits.len());
            for (i, hit) in hits.iter().enumerate() {
                out.push_str(&format!("### {}. {}\n", i + 1, hit.title));
                out.push_str(&format!("- knowledge ID: `{}`\n", hit.id));
                out.push_str(&format!("- category: {}\n", hit.category));
                if !hit.tags.is_empty() {
                    out.push_str(&format!("- tags: {}\n", hit.tags));
                }
                out.push_str(&format!("- file: {}\n", hit.path.display()));
                out.push_str(&format!("\npreview:\n{}\n\n---\n\n", hit.preview));
            }
            ToolOutcome::ok(out)
        }
        Err(err) => ToolOutcome::error(format!("failed to search knowledge: {err:#}")),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments).map_err(|err| format!("invalid arguments: {err}"))
}

fn is_absolute_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Build the outbound URL for an associated child: scheme and host:port
/// come from the child's health endpoint; path and query come from the
/// caller (a bare path is joined onto the endpoint's authority).
fn rewrite_url(health_check_url: &str, caller_url: &str) -> anyhow::Result<String> {
    let health = Url::parse(health_check_url).context("parse health check URL")?;

    if is_absolute_url(caller_url) {
        let mut url = Url::parse(caller_url).context("parse request URL")?;
        let host = health
            .host_str()
            .context("health check URL has no host")?
            .to_string();
        url.set_scheme(health.scheme())
            .map_err(|_| anyhow::anyhow!("cannot apply scheme '{}'", health.scheme()))?;
        url.set_host(Some(&host)).context("apply health host")?;
        url.set_port(health.port())
            .map_err(|_| anyhow::anyhow!("cannot apply health port"))?;
        return Ok(url.to_string());
    }

    let path = if caller_url.starts_with('/') {
        caller_url.to_string()
    } else {
        format!("/{caller_url}")
    };
    let joined = health.join(&path).context("join request path")?;
    Ok(joined.to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Tool definitions advertised through `tools/list`.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "name": "start_process",
            "description": "Start a long-running process, capture its combined stdout+stderr, and wait until its health check answers 2xx (or its port accepts connections). `command` must be the bare executable ('go', 'python', 'node'); put arguments in `args`.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Unique label for the process; later calls reference it by this name"},
                    "command": {"type": "string", "description": "Executable to run, without arguments"},
                    "args": {"type": "array", "items": {"type": "string"}, "description": "Argument list for the command"},
                    "work_dir": {"type": "string", "description": "Working directory; defaults to the supervisor's cwd"},
                    "env": {"type": "object", "additionalProperties": {"type": "string"}, "description": "Environment overrides, merged over the supervisor's environment"},
                    "health_check_url": {"type": "string", "description": "URL probed to decide the process is ready; a 2xx response (or an accepting TCP port) counts"},
                    "timeout_seconds": {"type": "integer", "description": "Readiness timeout in seconds (default 60)"},
                    "health_check_method": {"type": "string", "description": "HTTP method for the health check (default GET)"}
                },
                "required": ["name", "command", "health_check_url"]
            }
        }),
        json!({
            "name": "request_with_logs",
            "description": "Send an HTTP request and return the response together with the process log lines emitted during the request. With `process_name` (or when the URL's host:port matches a tracked process), the URL's scheme and host:port are rewritten to the process's health endpoint.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "process_name": {"type": "string", "description": "Process to correlate logs with; omit to auto-associate by the URL's host and port"},
                    "url": {"type": "string", "description": "Full URL or a path on the associated process"},
                    "method": {"type": "string", "description": "HTTP method (default GET)"},
                    "headers": {"type": "object", "additionalProperties": {"type": "string"}, "description": "Request headers"},
                    "body": {"type": "string", "description": "Request body; Content-Type defaults to application/json when set"}
                },
                "required": ["url"]
            }
        }),
        json!({
            "name": "kill_process",
            "description": "Terminate a process by the name it was started under (preferred), or kill whatever is listening on a TCP port.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Name of a process started by this supervisor"},
                    "port": {"type": "integer", "minimum": 1, "description": "TCP port whose listeners should be killed"}
                }
            }
        }),
        json!({
            "name": "save_memory",
            "description": "Persist task memory to a file so state survives a context reset. Pass your complete system prompt in system_prompt and the memory body in content. Providing memory_id updates an existing memory.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "system_prompt": {"type": "string", "description": "Your complete system prompt, stored for recovery"},
                    "content": {"type": "string", "description": "Memory body: current task, progress, findings, todos"},
                    "memory_id": {"type": "string", "description": "Existing memory to update; omit to create a new one"}
                },
                "required": ["system_prompt", "content"]
            }
        }),
        json!({
            "name": "read_memory",
            "description": "Read a previously saved memory by its ID.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "memory_id": {"type": "string", "description": "ID returned by save_memory"}
                },
                "required": ["memory_id"]
            }
        }),
        json!({
            "name": "save_knowledge",
            "description": "Save or update a reusable knowledge entry (conventions, fixes, API notes) under <work_dir>/.knowledge. Providing knowledge_id updates an existing entry.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Short title for the entry"},
                    "content": {"type": "string", "description": "The knowledge body"},
                    "tags": {"type": "array", "items": {"type": "string"}, "description": "Tags for retrieval"},
                    "category": {"type": "string", "description": "Category, e.g. conventions, problem-solving, api-docs"},
                    "knowledge_id": {"type": "string", "description": "Existing entry to update; omit to create a new one"},
                    "work_dir": {"type": "string", "description": "Project directory owning the knowledge base"}
                },
                "required": ["title", "content", "work_dir"]
            }
        }),
        json!({
            "name": "search_knowledge",
            "description": "Search the knowledge base under <work_dir>/.knowledge by keyword, tags, or category. Without filters, lists entries up to the limit.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Substring matched against entry content"},
                    "tags": {"type": "array", "items": {"type": "string"}, "description": "Match entries carrying any of these tags"},
                    "category": {"type": "string", "description": "Filter by category"},
                    "limit": {"type": "integer", "description": "Maximum results (default 10)"},
                    "work_dir": {"type": "string", "description": "Project directory owning the knowledge base"}
                },
                "required": ["work_dir"]
            }
        }),
    ]
}
