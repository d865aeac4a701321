//! Discovery and termination of processes bound to a TCP port, via the
//! OS-native socket enumeration tool.

use std::time::Duration;

use anyhow::Context;

use crate::platform;

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);
const NETSTAT_TIMEOUT: Duration = Duration::from_secs(5);
const RELEASE_SETTLE: Duration = Duration::from_millis(500);

/// A 100 ms TCP connect against loopback; success means something listens.
pub async fn is_port_in_use(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            CONNECT_PROBE_TIMEOUT,
            tokio::net::TcpStream::connect(("127.0.0.1", port)),
        )
        .await,
        Ok(Ok(_))
    )
}

/// Kill every process listening on `port` and wait for the socket to be
/// released. Returns the pids that were signalled.
///
/// Errors when the port is not in use (no side effects in that case) or
/// when no listening owner could be identified.
pub async fn reap_port(port: u16) -> anyhow::Result<Vec<u32>> {
    if !is_port_in_use(port).await {
        anyhow::bail!("port {port} is not in use");
    }

    let mut netstat = platform::netstat_command();
    let output = tokio::time::timeout(NETSTAT_TIMEOUT, netstat.output())
        .await
        .map_err(|_| anyhow::anyhow!("netstat timed out"))?
        .context("run netstat")?;
    if !output.status.success() {
        anyhow::bail!(
            "netstat failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let pids = parse_listener_pids(&text, port);
    if pids.is_empty() {
        anyhow::bail!("no process found listening on port {port}");
    }

    tracing::info!(port, owners = pids.len(), "reaping port listeners");
    let mut killed = Vec::new();
    for pid in pids {
        match platform::kill_pid(pid).await {
            Ok(()) => {
                tracing::info!(port, pid, "terminated port listener");
                killed.push(pid);
            }
            Err(err) => {
                tracing::error!(port, pid, %err, "failed to terminate port listener");
            }
        }
    }

    if killed.is_empty() {
        anyhow::bail!("failed to terminate any listener on port {port}");
    }

    // Give the kernel a moment to release the socket before callers rebind.
    tokio::time::sleep(RELEASE_SETTLE).await;
    Ok(killed)
}

/// Extract the listening pids for `port` from netstat output.
///
/// Handles both output shapes: on Windows the last column is the bare pid,
/// on Linux it is `pid/progname`. Only LISTEN-state rows count; established
/// connections to the port must not be reaped.
fn parse_listener_pids(output: &str, port: u16) -> Vec<u32> {
    let needle = format!(":{port}");
    let mut pids: Vec<u32> = Vec::new();

    for line in output.lines() {
        if !line.contains("LISTEN") {
            continue;
        }
        if !line.contains(&needle) {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }

        let pid_field = fields[fields.len() - 1];
        let pid_str = pid_field.split('/').next().unwrap_or_default().trim();
        if let Ok(pid) = pid_str.parse::<u32>() {
            if pid > 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }

    pids
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_NETSTAT: &str = "\
Active Internet connections (only servers)
Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name
tcp        0      0 0.0.0.0:18080           0.0.0.0:*               LISTEN      4242/server
tcp        0      0 127.0.0.1:631           0.0.0.0:*               LISTEN      810/cupsd
tcp6       0      0 :::18080                :::*                    LISTEN      4242/server
udp        0      0 0.0.0.0:68              0.0.0.0:*                           655/dhclient
";

    const WINDOWS_NETSTAT: &str = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:18080          0.0.0.0:0              LISTENING       9911
  TCP    127.0.0.1:18080        127.0.0.1:52311        ESTABLISHED     9911
  TCP    [::]:18080             [::]:0                 LISTENING       9911
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1180
";

    #[test]
    fn parses_linux_format_and_dedupes() {
        assert_eq!(parse_listener_pids(LINUX_NETSTAT, 18080), vec![4242]);
    }

    #[test]
    fn parses_windows_format_and_skips_established() {
        assert_eq!(parse_listener_pids(WINDOWS_NETSTAT, 18080), vec![9911]);
    }

    #[test]
    fn ignores_other_ports() {
        assert!(parse_listener_pids(LINUX_NETSTAT, 9000).is_empty());
    }

    #[test]
    fn ignores_non_listening_rows() {
        // dhclient's UDP row mentions no state and must never match.
        assert!(parse_listener_pids(LINUX_NETSTAT, 68).is_empty());
    }

    #[tokio::test]
    async fn closed_port_is_not_in_use() {
        // Bind then drop to find a port that is very likely free.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!is_port_in_use(port).await);
    }

    #[tokio::test]
    async fn bound_port_is_in_use() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(is_port_in_use(port).await);
    }

    #[tokio::test]
    async fn reap_refuses_unused_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = reap_port(port).await.unwrap_err();
        assert!(err.to_string().contains("not in use"));
    }
}
