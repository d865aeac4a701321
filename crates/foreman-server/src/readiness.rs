//! Poll a child's health endpoint until it answers, the child exits, or
//! the deadline passes.

use std::time::Duration;

use crate::process_manager::ChildProcess;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const TCP_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait until the child is ready to serve.
///
/// With a known health port this is a cheap TCP connect loop; otherwise
/// the health URL is requested and any 2xx status counts as ready. Either
/// way the loop races against `wait_done`: a child that exits during the
/// readiness window fails the wait immediately, carrying the exit detail.
pub async fn wait_until_ready(
    child: &ChildProcess,
    method: &str,
    timeout: Duration,
    client: &reqwest::Client,
) -> anyhow::Result<()> {
    let result = tokio::time::timeout(timeout, poll_loop(child, method, client)).await;
    match result {
        Ok(inner) => inner,
        Err(_) => anyhow::bail!(
            "health check timed out after {}s ({})",
            timeout.as_secs(),
            child.health_check_url
        ),
    }
}

async fn poll_loop(
    child: &ChildProcess,
    method: &str,
    client: &reqwest::Client,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = child.wait_exited() => {
                let detail = child
                    .exit_info()
                    .await
                    .map(|info| info.detail)
                    .unwrap_or_else(|| "process exited".to_string());
                anyhow::bail!("process exited during startup: {detail}");
            }
            _ = child.cancel.cancelled() => {
                anyhow::bail!("startup wait canceled");
            }
            _ = ticker.tick() => {
                let ready = if child.health_port > 0 {
                    tcp_probe(child.health_port).await
                } else {
                    http_probe(client, method, &child.health_check_url).await
                };
                if ready {
                    return Ok(());
                }
            }
        }
    }
}

async fn tcp_probe(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            TCP_PROBE_TIMEOUT,
            tokio::net::TcpStream::connect(("127.0.0.1", port)),
        )
        .await,
        Ok(Ok(_))
    )
}

async fn http_probe(client: &reqwest::Client, method: &str, url: &str) -> bool {
    let method = if method.is_empty() { "GET" } else { method };
    let Ok(method) = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes()) else {
        return false;
    };

    match client.request(method, url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::process_manager::stub_child;

    #[tokio::test]
    async fn tcp_path_succeeds_once_port_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let child = stub_child("svc", &format!("http://localhost:{port}/health"));
        let client = reqwest::Client::new();
        wait_until_ready(&child, "GET", Duration::from_secs(5), &client)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn times_out_when_nothing_listens() {
        // Bind then drop so the port is almost certainly closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let child = stub_child("svc", &format!("http://localhost:{port}/health"));
        let client = reqwest::Client::new();
        let err = wait_until_ready(&child, "GET", Duration::from_secs(1), &client)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_exit_beats_the_timeout() {
        use std::collections::BTreeMap;
        use std::time::Instant;

        use crate::process_manager::{ProcessManager, SpawnRequest};

        let manager = ProcessManager::default();
        let proc = manager
            .spawn(SpawnRequest {
                name: "quick-death".to_string(),
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "exit 1".to_string()],
                work_dir: None,
                env: BTreeMap::new(),
                // Port 9 (discard) is not serviced anywhere sane.
                health_check_url: "http://localhost:9/health".to_string(),
            })
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let begun = Instant::now();
        let err = wait_until_ready(&proc, "GET", Duration::from_secs(10), &client)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("exited during startup"));
        // Exit detection must not burn the whole 10 s budget.
        assert!(begun.elapsed() < Duration::from_secs(5));
    }
}
