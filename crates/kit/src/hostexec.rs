//! Host tool invocation plumbing
//!
//! xhyve needs root for vmnet networking, so the launcher runs under
//! sudo; arp and ssh run as the invoking user. Tests substitute mock
//! scripts for all three.

use std::process::Command;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::debug;

/// Build a [`Command`] for a host tool, wrapped in sudo when `elevate`
/// is set.
pub fn command(program: &str, elevate: bool) -> Command {
    if elevate {
        let mut cmd = Command::new("sudo");
        cmd.arg(program);
        cmd
    } else {
        Command::new(program)
    }
}

/// Run a command to completion and capture its stdout as a string.
///
/// A non-zero exit is an error carrying the command's stderr.
pub fn run_get_string(cmd: &mut Command) -> Result<String> {
    let program = cmd.get_program().to_string_lossy().to_string();
    debug!("Running {program:?}");
    let output = cmd
        .output()
        .with_context(|| format!("Failed to run {program:?}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(eyre!("{program:?} failed: {}", stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Spawn a long-lived background process in its own process group and
/// return its PID.
///
/// The child handle is dropped on purpose: ownership of the process
/// transfers to the OS process table. The guest's own shutdown command
/// is what terminates the hypervisor, so there is nothing to wait on
/// here; the PID is recorded for diagnostics and caller-driven cleanup.
pub fn spawn_detached(cmd: &mut Command) -> Result<u32> {
    use std::os::unix::process::CommandExt;

    let program = cmd.get_program().to_string_lossy().to_string();
    cmd.process_group(0);
    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {program:?}"))?;
    let pid = child.id();
    debug!("Spawned detached process {pid} ({program:?})");
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_elevated() {
        let cmd = command("xhyve", true);
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["xhyve"]);
    }

    #[test]
    fn test_command_plain() {
        let cmd = command("arp", false);
        assert_eq!(cmd.get_program(), "arp");
        assert_eq!(cmd.get_args().count(), 0);
    }

    #[test]
    fn test_run_get_string_captures_stdout() {
        let output = run_get_string(Command::new("echo").arg("hello")).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn test_run_get_string_nonzero_exit() {
        let result = run_get_string(Command::new("sh").args(["-c", "echo oops >&2; exit 3"]));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("oops"), "{err}");
    }

    #[test]
    fn test_spawn_detached_returns_pid() {
        let pid = spawn_detached(&mut Command::new("true")).unwrap();
        assert!(pid > 0);
    }
}
