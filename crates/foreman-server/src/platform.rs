//! Build-time platform split for process-tree control.
//!
//! Children are placed in their own process group (unix session / Windows
//! process group) at spawn so a later tree-kill reaches grandchildren too
//! (`go run`, `npm`, `python -m` all spawn the real server as a child of
//! the launcher).

#[cfg(windows)]
use std::time::Duration;

use tokio::process::Command;

/// Put the child into a new process group before exec.
#[cfg(unix)]
pub fn place_in_new_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            set_parent_death_signal()?;
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
pub fn place_in_new_group(cmd: &mut Command) {
    // CREATE_NEW_PROCESS_GROUP, so `taskkill /T` can reach the whole tree.
    cmd.creation_flags(0x0000_0200);
}

#[cfg(not(any(unix, windows)))]
pub fn place_in_new_group(_cmd: &mut Command) {}

/// If the supervisor itself dies, make sure the child goes with it.
#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // NOTE: `unsafe fn` bodies are not implicitly unsafe in Rust 2024.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Terminate the whole process tree rooted at `pid`.
///
/// The pid doubles as the process-group id because the child was
/// `setsid`'d at spawn. A group that is already gone counts as success.
#[cfg(unix)]
pub async fn kill_tree(pid: u32) -> anyhow::Result<()> {
    let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        anyhow::bail!("kill process group {pid} failed: {err}");
    }
    Ok(())
}

#[cfg(windows)]
pub async fn kill_tree(pid: u32) -> anyhow::Result<()> {
    let mut cmd = Command::new("taskkill");
    cmd.args(["/F", "/T", "/PID", &pid.to_string()]);
    let output = tokio::time::timeout(Duration::from_secs(5), cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("taskkill /T timed out for pid {pid}"))??;
    if !output.status.success() {
        anyhow::bail!(
            "taskkill /T failed for pid {pid}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Terminate a single process by pid (used by the port reaper).
#[cfg(unix)]
pub async fn kill_pid(pid: u32) -> anyhow::Result<()> {
    let rc = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        anyhow::bail!("kill pid {pid} failed: {err}");
    }
    Ok(())
}

#[cfg(windows)]
pub async fn kill_pid(pid: u32) -> anyhow::Result<()> {
    let mut cmd = Command::new("taskkill");
    cmd.args(["/F", "/PID", &pid.to_string()]);
    let output = tokio::time::timeout(Duration::from_secs(3), cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("taskkill timed out for pid {pid}"))??;
    if !output.status.success() {
        anyhow::bail!(
            "taskkill failed for pid {pid}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// The OS tool that enumerates socket owners, with its platform flags.
#[cfg(windows)]
pub fn netstat_command() -> Command {
    let mut cmd = Command::new("netstat");
    cmd.arg("-ano");
    cmd
}

#[cfg(not(windows))]
pub fn netstat_command() -> Command {
    let mut cmd = Command::new("netstat");
    cmd.arg("-tulnp");
    cmd
}
