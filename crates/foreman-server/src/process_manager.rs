use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chrono::{DateTime, Local};
use foreman_process::{ExitInfo, ProcessState};
use reqwest::Url;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::{Mutex, RwLock, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::log_store::{self, CHANNEL_CAPACITY, LogStore};
use crate::platform;
use crate::port_reaper;

/// How long a spawn waits for a prior homonym's wait to finish before the
/// name is reused anyway.
const HOMONYM_GRACE: Duration = Duration::from_secs(2);
/// How long terminate observes `wait_done` before continuing cleanup.
const EXIT_WAIT: Duration = Duration::from_secs(3);
/// How long terminate waits for each capture task to drain.
const LOG_TASK_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub work_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub health_check_url: String,
}

/// A supervised child. The exit watcher owns the OS handle; everything
/// here is observation state shared behind an `Arc`.
#[derive(Debug)]
pub struct ChildProcess {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Local>,
    pub work_dir: PathBuf,
    pub env_view: BTreeMap<String, String>,
    pub health_check_url: String,
    pub health_host: String,
    pub health_port: u16,
    pub logs: Arc<RwLock<LogStore>>,
    /// Cooperative cancellation for anything running on the child's behalf.
    pub cancel: CancellationToken,
    /// Released exactly once, after the single OS wait completes.
    wait_done: CancellationToken,
    state: Mutex<ProcessState>,
    exit: Mutex<Option<ExitInfo>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChildProcess {
    /// Completes once the exit watcher has finished the OS wait. This is
    /// the only way any other code observes child exit.
    pub async fn wait_exited(&self) {
        self.wait_done.cancelled().await;
    }

    pub async fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.lock().await.clone()
    }

    pub async fn state(&self) -> ProcessState {
        *self.state.lock().await
    }

    pub async fn mark_ready(&self) {
        let mut st = self.state.lock().await;
        if *st == ProcessState::Starting {
            *st = ProcessState::Ready;
        }
    }

    pub async fn log_snapshot(&self) -> String {
        self.logs.read().await.snapshot()
    }
}

#[derive(Clone, Default)]
pub struct ProcessManager {
    inner: Arc<Mutex<HashMap<String, Arc<ChildProcess>>>>,
    /// Root token; every child's `cancel` is derived from it so a
    /// supervisor shutdown reaches in-flight startup waits too.
    shutdown: CancellationToken,
}

impl ProcessManager {
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::default(),
            shutdown,
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ChildProcess>> {
        self.inner.lock().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner.lock().await.keys().cloned().collect()
    }

    /// Spawn a child, wire up its capture pipeline and exit watcher, and
    /// register it under its name.
    pub async fn spawn(&self, req: SpawnRequest) -> anyhow::Result<Arc<ChildProcess>> {
        // Name reuse is only safe once the previous holder's OS wait has
        // finished; give it a short grace and then replace the entry.
        if let Some(old) = self.get(&req.name).await {
            if tokio::time::timeout(HOMONYM_GRACE, old.wait_exited())
                .await
                .is_err()
            {
                tracing::warn!(name = %req.name, "previous process with this name has not finished; replacing entry");
            }
            self.inner.lock().await.remove(&req.name);
        }

        let health = Url::parse(&req.health_check_url).context("parse health_check_url")?;
        let health_host = normalize_host(health.host_str().unwrap_or_default());
        let health_port = health.port_or_known_default().unwrap_or(0);

        let work_dir = resolve_work_dir(req.work_dir.as_deref(), &req.command, &req.args);
        let env_view = materialize_env(&req.env);

        let mut cmd = Command::new(&req.command);
        cmd.args(&req.args)
            .current_dir(&work_dir)
            .env_clear()
            .envs(&env_view)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        platform::place_in_new_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!(
                    "executable '{}' not found: {err}\n\n\
                     Make sure the command is installed and on PATH, or pass a full path.\n\n\
                     Common invocations:\n\
                     - Go: command=\"go\", args=[\"run\", \".\"]\n\
                     - Python: command=\"python\", args=[\"app.py\"]\n\
                     - Node: command=\"node\", args=[\"app.js\"]",
                    req.command
                );
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("spawn '{}' (cwd {})", req.command, work_dir.display())
                });
            }
        };

        let pid = child.id().context("spawned process reported no pid")?;

        let logs = Arc::new(RwLock::new(LogStore::default()));
        let (tx, rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let proc = Arc::new(ChildProcess {
            name: req.name.clone(),
            pid,
            started_at: Local::now(),
            work_dir,
            env_view,
            health_check_url: req.health_check_url.clone(),
            health_host,
            health_port,
            logs: logs.clone(),
            cancel: self.shutdown.child_token(),
            wait_done: CancellationToken::new(),
            state: Mutex::new(ProcessState::Starting),
            exit: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();
        if let Some(out) = stdout {
            tasks.push(spawn_pipe_reader(req.name.clone(), "stdout", out, tx.clone()));
        }
        if let Some(errp) = stderr {
            tasks.push(spawn_pipe_reader(req.name.clone(), "stderr", errp, tx.clone()));
        }
        // The readers now hold the only senders; the channel closes when
        // both hit EOF, which is what shuts the merge writer down.
        drop(tx);
        tasks.push(log_store::spawn_merge_writer(req.name.clone(), rx, logs));
        *proc.tasks.lock().await = tasks;

        spawn_exit_watcher(proc.clone(), child);

        self.inner
            .lock()
            .await
            .insert(req.name.clone(), proc.clone());
        tracing::info!(name = %req.name, pid, work_dir = %proc.work_dir.display(), "process started");
        Ok(proc)
    }

    /// Kill the named child's process tree and clean up its entry.
    ///
    /// Never re-invokes the OS wait; only observes `wait_done` under a
    /// bounded timeout, so a stuck child cannot wedge the caller.
    pub async fn terminate(&self, name: &str) -> anyhow::Result<()> {
        let Some(proc) = self.get(name).await else {
            anyhow::bail!("unknown process: {name}");
        };

        {
            let mut st = proc.state.lock().await;
            *st = ProcessState::Stopping;
        }
        proc.cancel.cancel();
        tracing::info!(name, pid = proc.pid, "terminating process");

        if let Err(err) = platform::kill_tree(proc.pid).await {
            tracing::error!(name, pid = proc.pid, %err, "tree kill failed");
            // The launcher may already be gone while a grandchild still
            // holds the port (`go run` and friends).
            if proc.health_port > 0 {
                match port_reaper::reap_port(proc.health_port).await {
                    Ok(pids) => {
                        tracing::info!(name, port = proc.health_port, ?pids, "reclaimed health port from descendants");
                    }
                    Err(err) => {
                        tracing::error!(name, port = proc.health_port, %err, "port-based fallback kill failed");
                    }
                }
            }
        }

        if tokio::time::timeout(EXIT_WAIT, proc.wait_exited())
            .await
            .is_err()
        {
            tracing::warn!(name, "timed out waiting for process exit; continuing cleanup");
        }

        let handles: Vec<JoinHandle<()>> = proc.tasks.lock().await.drain(..).collect();
        for handle in handles {
            match tokio::time::timeout(LOG_TASK_WAIT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(name, %err, "log task failed"),
                Err(_) => tracing::warn!(name, "log task did not drain in time; abandoning it"),
            }
        }

        self.inner.lock().await.remove(name);
        tracing::info!(name, "process entry removed");
        Ok(())
    }

    /// Pick the tracked child whose health endpoint matches the request's
    /// normalized host and effective port. First match wins.
    pub async fn find_by_url(&self, request_url: &str) -> Option<Arc<ChildProcess>> {
        let parsed = Url::parse(request_url).ok()?;
        let host = normalize_host(parsed.host_str()?);
        let port = parsed.port_or_known_default()?;

        let found = {
            let map = self.inner.lock().await;
            map.values()
                .find(|p| {
                    (p.health_host == host && p.health_port == port)
                        || (p.health_port > 0 && p.health_port == port)
                })
                .cloned()
        };

        if let Some(p) = &found {
            tracing::info!(process = %p.name, url = request_url, "auto-associated request with process");
        }
        found
    }

    /// Terminate every tracked child (supervisor shutdown path).
    pub async fn shutdown_all(&self) {
        for name in self.names().await {
            if let Err(err) = self.terminate(&name).await {
                tracing::error!(%name, %err, "failed to terminate process during shutdown");
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn insert_stub(&self, proc: Arc<ChildProcess>) {
        self.inner
            .lock()
            .await
            .insert(proc.name.clone(), proc);
    }
}

/// Read one pipe line by line and offer each non-empty line to the shared
/// channel. The offer never blocks: a full channel drops the line.
fn spawn_pipe_reader<R>(
    name: String,
    stream: &'static str,
    pipe: R,
    tx: mpsc::Sender<String>,
) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    match tx.try_send(line) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::debug!(process = %name, stream, "log channel full, dropping line");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(process = %name, stream, %err, "pipe read error");
                    break;
                }
            }
        }
    })
}

/// The sole waiter on the child (it owns the handle). Records the result,
/// releases `wait_done`, and lets the dropped handle close the pipes so
/// the readers finish at EOF.
fn spawn_exit_watcher(proc: Arc<ChildProcess>, mut child: tokio::process::Child) -> JoinHandle<()> {
    tokio::spawn(async move {
        let info = match child.wait().await {
            Ok(status) => ExitInfo::from(status),
            Err(err) => ExitInfo::wait_failed(err),
        };

        *proc.exit.lock().await = Some(info.clone());
        {
            let mut st = proc.state.lock().await;
            *st = if *st == ProcessState::Stopping || info.clean {
                ProcessState::Exited
            } else {
                ProcessState::Failed
            };
        }
        proc.wait_done.cancel();

        if info.clean {
            tracing::info!(process = %proc.name, pid = proc.pid, "{}", info.detail);
        } else {
            tracing::warn!(process = %proc.name, pid = proc.pid, "{}", info.detail);
        }
    })
}

/// Lowercase the host and collapse the loopback spellings so that
/// `localhost`, `127.0.0.1`, `::1` and `0.0.0.0` all compare equal.
pub(crate) fn normalize_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.as_str() {
        "localhost" | "127.0.0.1" | "::1" | "[::1]" | "0.0.0.0" => "localhost".to_string(),
        _ => host,
    }
}

/// Resolution rules: absolute wins, relative joins the supervisor's cwd,
/// and an empty value falls back to the `go -C <dir>` heuristic or the
/// supervisor's cwd.
pub(crate) fn resolve_work_dir(work_dir: Option<&str>, command: &str, args: &[String]) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if let Some(dir) = work_dir {
        if !dir.is_empty() {
            let p = Path::new(dir);
            return if p.is_absolute() {
                p.to_path_buf()
            } else {
                cwd.join(p)
            };
        }
    }

    if command == "go" && args.len() >= 2 && args[0] == "-C" {
        let p = Path::new(&args[1]);
        return if p.is_absolute() {
            p.to_path_buf()
        } else {
            cwd.join(p)
        };
    }

    cwd
}

/// The environment actually handed to the OS: the supervisor's own
/// environment with caller overrides applied on top.
pub(crate) fn materialize_env(overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }
    env
}

#[cfg(test)]
pub(crate) fn stub_child(name: &str, health_check_url: &str) -> Arc<ChildProcess> {
    let health = Url::parse(health_check_url).expect("stub health url");
    Arc::new(ChildProcess {
        name: name.to_string(),
        pid: 0,
        started_at: Local::now(),
        work_dir: PathBuf::from("."),
        env_view: BTreeMap::new(),
        health_check_url: health_check_url.to_string(),
        health_host: normalize_host(health.host_str().unwrap_or_default()),
        health_port: health.port_or_known_default().unwrap_or(0),
        logs: Arc::new(RwLock::new(LogStore::default())),
        cancel: CancellationToken::new(),
        wait_done: CancellationToken::new(),
        state: Mutex::new(ProcessState::Starting),
        exit: Mutex::new(None),
        tasks: Mutex::new(Vec::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_host_collapses_loopback() {
        assert_eq!(normalize_host("LOCALHOST"), "localhost");
        assert_eq!(normalize_host("127.0.0.1"), "localhost");
        assert_eq!(normalize_host("0.0.0.0"), "localhost");
        assert_eq!(normalize_host("[::1]"), "localhost");
        assert_eq!(normalize_host("Example.COM"), "example.com");
    }

    #[test]
    fn health_port_derivation() {
        let explicit = Url::parse("http://localhost:8081/health").unwrap();
        assert_eq!(explicit.port_or_known_default(), Some(8081));

        let http_default = Url::parse("http://localhost/health").unwrap();
        assert_eq!(http_default.port_or_known_default(), Some(80));

        let https_default = Url::parse("https://localhost/health").unwrap();
        assert_eq!(https_default.port_or_known_default(), Some(443));

        let unknown = Url::parse("gopher://localhost/x").unwrap();
        assert_eq!(unknown.port_or_known_default().unwrap_or(0), 0);
    }

    #[test]
    fn work_dir_absolute_is_kept() {
        let dir = resolve_work_dir(Some("/srv/app"), "python", &[]);
        assert_eq!(dir, PathBuf::from("/srv/app"));
    }

    #[test]
    fn work_dir_relative_joins_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let dir = resolve_work_dir(Some("sub"), "python", &[]);
        assert_eq!(dir, cwd.join("sub"));
    }

    #[test]
    fn work_dir_go_dash_c_heuristic() {
        let cwd = std::env::current_dir().unwrap();
        let args: Vec<String> = vec!["-C".into(), "svc".into(), "run".into(), ".".into()];
        assert_eq!(resolve_work_dir(None, "go", &args), cwd.join("svc"));
        // Only `go` gets the heuristic.
        assert_eq!(resolve_work_dir(None, "node", &args), cwd);
    }

    #[test]
    fn env_overrides_win() {
        let mut overrides = BTreeMap::new();
        overrides.insert("FOREMAN_TEST_ENV_KEY".to_string(), "override".to_string());
        let env = materialize_env(&overrides);
        assert_eq!(env.get("FOREMAN_TEST_ENV_KEY").map(String::as_str), Some("override"));
        // Parent environment is carried along.
        assert!(env.contains_key("PATH"));
    }

    #[tokio::test]
    async fn find_by_url_matches_normalized_host_and_port() {
        let manager = ProcessManager::default();
        manager
            .insert_stub(stub_child("api", "http://localhost:8081/healthz"))
            .await;

        let hit = manager.find_by_url("http://127.0.0.1:8081/ping").await;
        assert_eq!(hit.map(|p| p.name.clone()).as_deref(), Some("api"));

        assert!(manager.find_by_url("http://127.0.0.1:9999/ping").await.is_none());
        // Path-only input is not a URL and never associates.
        assert!(manager.find_by_url("/ping").await.is_none());
    }

    #[cfg(unix)]
    mod spawned {
        use super::*;

        fn sh(name: &str, script: &str) -> SpawnRequest {
            SpawnRequest {
                name: name.to_string(),
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                work_dir: None,
                env: BTreeMap::new(),
                // Port 1 is never serviced; these tests never probe it.
                health_check_url: "http://localhost:1/health".to_string(),
            }
        }

        #[tokio::test]
        async fn captures_output_and_reports_clean_exit() {
            let manager = ProcessManager::default();
            let proc = manager
                .spawn(sh("echoer", "echo hello-from-child"))
                .await
                .unwrap();

            tokio::time::timeout(Duration::from_secs(5), proc.wait_exited())
                .await
                .unwrap();
            // Let the merge writer drain the channel.
            tokio::time::sleep(Duration::from_millis(200)).await;

            assert!(proc.log_snapshot().await.contains("hello-from-child"));
            let info = proc.exit_info().await.unwrap();
            assert!(info.clean);

            manager.terminate("echoer").await.unwrap();
            assert!(manager.get("echoer").await.is_none());
        }

        #[tokio::test]
        async fn premature_exit_is_visible_via_latch() {
            let manager = ProcessManager::default();
            let proc = manager.spawn(sh("failer", "exit 7")).await.unwrap();

            tokio::time::timeout(Duration::from_secs(5), proc.wait_exited())
                .await
                .unwrap();
            let info = proc.exit_info().await.unwrap();
            assert!(!info.clean);
            assert_eq!(info.code, Some(7));
            assert_eq!(proc.state().await, ProcessState::Failed);
        }

        #[tokio::test]
        async fn name_reuse_after_exit() {
            let manager = ProcessManager::default();
            let first = manager.spawn(sh("dup", "exit 0")).await.unwrap();
            tokio::time::timeout(Duration::from_secs(5), first.wait_exited())
                .await
                .unwrap();

            let second = manager.spawn(sh("dup", "exit 0")).await.unwrap();
            assert_ne!(first.pid, second.pid);
        }

        #[tokio::test]
        async fn missing_executable_gets_a_hint() {
            let manager = ProcessManager::default();
            let mut req = sh("ghost", "true");
            req.command = "definitely-not-a-real-binary".to_string();
            let err = manager.spawn(req).await.unwrap_err();
            assert!(err.to_string().contains("not found"));
            assert!(err.to_string().contains("PATH"));
        }

        #[tokio::test]
        async fn stderr_is_merged_into_the_combined_log() {
            let manager = ProcessManager::default();
            let proc = manager
                .spawn(sh("mixed", "echo out-line; echo err-line >&2"))
                .await
                .unwrap();

            tokio::time::timeout(Duration::from_secs(5), proc.wait_exited())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;

            let log = proc.log_snapshot().await;
            assert!(log.contains("out-line"));
            assert!(log.contains("err-line"));
        }
    }
}
