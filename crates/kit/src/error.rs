//! Error taxonomy for VM lifecycle failures.

use thiserror::Error;

/// Fatal failures surfaced by the VM lifecycle.
///
/// Each variant names the phase that failed and carries the value
/// needed to debug a flaky CI boot (MAC or IP address, command text).
/// Transport-level SSH failures during polling are not represented
/// here; they are indistinguishable from "not ready yet" and are
/// folded into the retry loops, only exhaustion escalates.
#[derive(Debug, Error)]
pub enum VmError {
    /// The hypervisor launcher failed to start or exited non-zero.
    /// Launch is not expected to be flaky; there is no retry.
    #[error("hypervisor launch failed: {0}")]
    Launch(String),

    /// No IP address appeared for the guest's MAC address within the
    /// attempt budget. The hypervisor process is left running.
    #[error("no IP address found for MAC address {mac} after {attempts} attempts")]
    AddressDiscoveryTimeout {
        /// MAC address that never showed up in the address table.
        mac: String,
        /// Number of queries performed before giving up.
        attempts: u32,
    },

    /// The guest never accepted the readiness probe command.
    #[error("VM did not become ready within {timeout_secs} seconds")]
    ReadinessTimeout {
        /// Probe budget, one attempt per second.
        timeout_secs: u32,
    },

    /// A remote command ran but exited non-zero. Distinct from a
    /// transport failure, where the ssh client itself fails.
    #[error("remote command exited with status {code}: {command}")]
    RemoteExecution {
        /// The remote exit code.
        code: i32,
        /// The command text that was sent to the guest.
        command: String,
    },
}
