//! VM lifecycle orchestration
//!
//! Sequences boot → IP discovery → readiness polling → remote
//! execution → shutdown for a single ephemeral guest. The hypervisor
//! runs as a detached background process for the lifetime of the job;
//! the orchestrator's own control flow continues into the polling
//! loops while the guest boots.

use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::arp;
use crate::dhcpd;
use crate::error::VmError;
use crate::hostexec;
use crate::ssh::{self, ExecuteOptions};
use crate::variant::GuestVariant;

/// Fixed pause between discovery and readiness attempts. Discovery
/// latency after a cold boot is roughly uniform rather than
/// congestion-driven, so fixed-interval polling is used instead of
/// exponential backoff.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How the guest's IP address is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[clap(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Discovery {
    /// Scan the host ARP table (default; platform-uniform)
    Arp,
    /// Scan the host DHCP server's lease file
    DhcpdLeases,
}

/// Host tool selection. Tests point these at mock scripts.
#[derive(Debug, Clone)]
pub struct HostTools {
    /// ARP table query tool.
    pub arp: Utf8PathBuf,
    /// SSH client.
    pub ssh: Utf8PathBuf,
    /// Run the launcher under sudo (vmnet networking needs root).
    pub elevate: bool,
}

impl Default for HostTools {
    fn default() -> Self {
        Self {
            arp: "arp".into(),
            ssh: "ssh".into(),
            elevate: true,
        }
    }
}

/// Boot configuration for one guest.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Memory size in xhyve notation, e.g. "4G".
    pub memory: String,
    /// Number of virtual CPUs.
    pub cpu_count: u32,
    /// Raw disk image the guest boots from.
    pub disk_image: Utf8PathBuf,
    /// Guest UUID; keeps the assigned MAC address stable across runs.
    pub uuid: String,
    /// Boot loader: userboot.so for FreeBSD, a firmware image for OpenBSD.
    pub loader: Utf8PathBuf,
    /// IP discovery strategy.
    pub discovery: Discovery,
    /// Host tools used to launch and reach the guest.
    pub tools: HostTools,
}

/// Machine readable boot report, printed by `run --json`.
#[derive(Debug, Serialize)]
pub struct GuestInfo {
    /// MAC address the launcher assigned to the guest NIC.
    pub mac_address: String,
    /// IP address discovered for that MAC.
    pub ip_address: String,
    /// PID of the detached hypervisor process.
    pub pid: u32,
}

/// One ephemeral guest and its lifecycle state.
///
/// Operations are invoked sequentially by a single caller:
/// [`Vm::init`] acquires the MAC address, [`Vm::run`] boots the
/// hypervisor and discovers the IP, [`Vm::wait`] gates on SSH
/// readiness, then any number of [`Vm::execute`] calls and finally
/// [`Vm::stop`]. MAC and IP are each assigned exactly once; a second
/// assignment attempt is rejected to catch lifecycle misuse early.
#[derive(Debug)]
pub struct Vm {
    variant: GuestVariant,
    ssh_key: Utf8PathBuf,
    xhyve_path: Utf8PathBuf,
    config: VmConfig,
    mac_address: Option<String>,
    ip_address: Option<String>,
    // Spawned, not owned: no join handle is retained because the
    // guest's own shutdown command terminates the hypervisor.
    pid: Option<u32>,
}

impl Vm {
    /// Create a guest handle. Nothing is launched until [`Vm::init`].
    pub fn new(
        variant: GuestVariant,
        ssh_key: Utf8PathBuf,
        xhyve_path: Utf8PathBuf,
        config: VmConfig,
    ) -> Self {
        Self {
            variant,
            ssh_key,
            xhyve_path,
            config,
            mac_address: None,
            ip_address: None,
            pid: None,
        }
    }

    /// MAC address assigned by the launcher, once `init` has run.
    pub fn mac_address(&self) -> Option<&str> {
        self.mac_address.as_deref()
    }

    /// IP address of the guest, once `run` has discovered it.
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// PID of the detached hypervisor process, once `run` has spawned
    /// it. Exposed for caller-driven cleanup on early abort.
    pub fn hypervisor_pid(&self) -> Option<u32> {
        self.pid
    }

    /// Boot report for machine consumption; `None` until the guest is
    /// fully up.
    pub fn guest_info(&self) -> Option<GuestInfo> {
        Some(GuestInfo {
            mac_address: self.mac_address.clone()?,
            ip_address: self.ip_address.clone()?,
            pid: self.pid?,
        })
    }

    /// Acquire the MAC address xhyve will assign to the guest NIC by
    /// running the launcher in query mode (`-M` prints the address and
    /// exits instead of booting).
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<()> {
        if self.mac_address.is_some() {
            return Err(eyre!("MAC address already assigned; init may only run once"));
        }

        info!("Initializing VM");
        let mut cmd = hostexec::command(self.xhyve_path.as_str(), self.config.tools.elevate);
        cmd.args(self.xhyve_args());
        cmd.arg("-M");
        let output = hostexec::run_get_string(&mut cmd)
            .map_err(|err| VmError::Launch(format!("{err:#}")))?;

        let mac = parse_mac_address(&output).ok_or_else(|| {
            VmError::Launch(format!("no MAC address in launcher output: {output:?}"))
        })?;
        debug!("Found MAC address: '{mac}'");
        self.mac_address = Some(mac);
        Ok(())
    }

    /// Boot the hypervisor as a detached background process, then
    /// discover the guest's IP address.
    ///
    /// On discovery timeout the hypervisor is left running, not rolled
    /// back; callers must treat the failure as fatal and terminate the
    /// job (the PID is available via [`Vm::hypervisor_pid`]).
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<()> {
        let mac = self
            .mac_address
            .clone()
            .ok_or_else(|| eyre!("init must succeed before run"))?;
        if self.ip_address.is_some() {
            return Err(eyre!("IP address already discovered; run may only run once"));
        }

        info!("Booting VM");
        let mut cmd = hostexec::command(self.xhyve_path.as_str(), self.config.tools.elevate);
        cmd.args(self.xhyve_args());
        let pid =
            hostexec::spawn_detached(&mut cmd).map_err(|err| VmError::Launch(format!("{err:#}")))?;
        self.pid = Some(pid);

        let ip = self.discover_ip_address(&mac)?;
        info!("Found IP address: '{ip}'");
        self.ip_address = Some(ip);
        Ok(())
    }

    /// Wait for the guest's SSH service to accept commands, probing
    /// with a no-op once per second for up to `timeout_secs` attempts.
    ///
    /// Required because the address table showing the guest's IP only
    /// proves its network stack is up, not that sshd has started.
    pub fn wait(&self, timeout_secs: u32) -> Result<()> {
        info!("Waiting for VM to be ready");
        ssh::poll_ready(timeout_secs, POLL_INTERVAL, || {
            self.execute("true", &ExecuteOptions::for_readiness_probe())
        })?;
        info!("VM is ready");
        Ok(())
    }

    /// Run `command` inside the guest, returning its exit code. See
    /// [`ssh::run_remote_command`] for the option semantics.
    pub fn execute(&self, command: &str, options: &ExecuteOptions) -> Result<i32> {
        let ip = self
            .ip_address
            .as_deref()
            .ok_or_else(|| eyre!("no IP address; run must succeed before execute"))?;
        ssh::run_remote_command(&self.config.tools.ssh, &self.ssh_key, ip, command, options)
    }

    /// Power the guest off from the inside with the variant's shutdown
    /// command. The hypervisor process exits with the guest; the
    /// orchestrator does not wait on it.
    pub fn stop(&self) -> Result<()> {
        info!("Shutting down VM");
        self.execute(self.variant.shutdown_command(), &ExecuteOptions::default())?;
        Ok(())
    }

    fn discover_ip_address(&self, mac_address: &str) -> Result<String, VmError> {
        info!("Getting IP address for MAC address: '{mac_address}'");
        match self.config.discovery {
            Discovery::Arp => {
                poll_for_ip(mac_address, arp::DISCOVERY_ATTEMPTS, POLL_INTERVAL, || {
                    match arp::query_table(&self.config.tools.arp) {
                        Ok(output) => arp::extract_ip_address(&output, mac_address),
                        Err(err) => {
                            // Indistinguishable from "no entry yet"; retry.
                            debug!("ARP query failed: {err:#}");
                            None
                        }
                    }
                })
            }
            Discovery::DhcpdLeases => {
                poll_for_ip(mac_address, dhcpd::DISCOVERY_ATTEMPTS, POLL_INTERVAL, || {
                    dhcpd::read_leases(Path::new(dhcpd::LEASES_PATH))
                        .and_then(|leases| dhcpd::extract_ip_address(&leases, mac_address))
                })
            }
        }
    }

    /// Common xhyve argument vector, in the fixed order xhyve expects:
    /// UUID, ACPI and exit-on-HLT flags, memory, CPUs, host bridge,
    /// network device, block device, LPC, serial console on our own
    /// stdio, then the variant's boot loader fragment.
    fn xhyve_args(&self) -> Vec<String> {
        let config = &self.config;
        let mut args: Vec<String> = vec![
            "-U".to_string(),
            config.uuid.clone(),
            "-A".to_string(),
            "-H".to_string(),
            "-m".to_string(),
            config.memory.clone(),
            "-c".to_string(),
            config.cpu_count.to_string(),
            "-s".to_string(),
            "0:0,hostbridge".to_string(),
            "-s".to_string(),
            format!("2:0,{}", self.variant.network_device()),
            "-s".to_string(),
            format!("4:0,virtio-blk,{}", config.disk_image),
            "-s".to_string(),
            "31,lpc".to_string(),
            "-l".to_string(),
            "com1,stdio".to_string(),
        ];
        args.extend(self.variant.boot_args(config));
        args
    }
}

/// Repeat `probe` up to `attempts` times, sleeping `interval` between
/// attempts (N attempts, N-1 sleeps), until it yields an address.
fn poll_for_ip<F>(
    mac_address: &str,
    attempts: u32,
    interval: Duration,
    mut probe: F,
) -> Result<String, VmError>
where
    F: FnMut() -> Option<String>,
{
    for attempt in 0..attempts {
        if attempt > 0 {
            thread::sleep(interval);
        }
        if let Some(ip) = probe() {
            return Ok(ip);
        }
    }

    Err(VmError::AddressDiscoveryTimeout {
        mac: mac_address.to_string(),
        attempts,
    })
}

/// The launcher prints a label followed by the address
/// (e.g. `MAC: 40:8e:71:34:88:eb`); take the final token. Lower-cased
/// because the MAC is the join key for the ARP scan.
fn parse_mac_address(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .last()
        .map(|mac| mac.to_ascii_lowercase())
}
