//! Remote command execution over SSH
//!
//! Commands are delivered on the SSH session's stdin rather than as a
//! shell argument, which sidesteps quoting inside the remote session
//! invocation. The session's exit code is the remote command's exit
//! code.

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{debug, info};

use crate::error::VmError;

/// Options for one remote command.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Emit an info trace naming the command before running it.
    pub log: bool,
    /// Suppress the remote session's stdout/stderr.
    pub silent: bool,
    /// Treat a non-zero remote exit as a normal result instead of an
    /// execution failure.
    pub ignore_return_code: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            log: true,
            silent: false,
            ignore_return_code: false,
        }
    }
}

impl ExecuteOptions {
    /// Options for readiness probing: quiet and tolerant of failure.
    pub fn for_readiness_probe() -> Self {
        Self {
            log: false,
            silent: true,
            ignore_return_code: true,
        }
    }
}

/// Run `command` inside the guest at `ip_address`, returning the
/// remote exit code.
///
/// A non-zero exit becomes [`VmError::RemoteExecution`] unless
/// `ignore_return_code` is set. Transport failures (the ssh client
/// itself failing to spawn or be waited on) surface as ordinary
/// errors, distinct from execution failures.
pub fn run_remote_command(
    program: &Utf8Path,
    ssh_key: &Utf8Path,
    ip_address: &str,
    command: &str,
    options: &ExecuteOptions,
) -> Result<i32> {
    if options.log {
        info!("Executing command inside VM: {command}");
    }

    let mut cmd = Command::new(program);
    cmd.args(["-t", "-i", ssh_key.as_str(), &format!("root@{ip_address}")]);
    cmd.stdin(Stdio::piped());
    if options.silent {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    let mut child = cmd.spawn().context("Failed to spawn ssh")?;
    if let Some(mut stdin) = child.stdin.take() {
        // Closing the pipe after the write makes the remote shell run
        // the script and exit on EOF.
        stdin
            .write_all(command.as_bytes())
            .context("Failed to write command to ssh stdin")?;
    }

    let status = child.wait().context("Failed to wait for ssh")?;
    let code = status.code().unwrap_or(1);
    debug!("Remote command exited with status {code}");

    if code != 0 && !options.ignore_return_code {
        return Err(VmError::RemoteExecution {
            code,
            command: command.to_string(),
        }
        .into());
    }

    Ok(code)
}

/// Poll `probe` once per `interval` until it reports exit code zero.
///
/// Address-table presence only proves network-layer reachability, not
/// that the guest's SSH service has started, so callers gate on this
/// before issuing real commands. Probe transport errors are
/// indistinguishable from "not ready yet" and are folded into the
/// retry; only exhausting the budget escalates.
pub fn poll_ready<F>(timeout_secs: u32, interval: Duration, mut probe: F) -> Result<(), VmError>
where
    F: FnMut() -> Result<i32>,
{
    for attempt in 0..timeout_secs {
        if attempt > 0 {
            thread::sleep(interval);
        }
        match probe() {
            Ok(0) => return Ok(()),
            Ok(code) => debug!("Readiness probe exited with status {code}"),
            Err(err) => debug!("Readiness probe failed: {err:#}"),
        }
    }

    Err(VmError::ReadinessTimeout { timeout_secs })
}
