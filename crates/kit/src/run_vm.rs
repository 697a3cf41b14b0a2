//! The `run` and `mac` CLI actions
//!
//! `run` drives the full lifecycle for one CI job: acquire the MAC,
//! boot the hypervisor, discover the IP, wait for SSH, execute the
//! job's commands, shut the guest down. `mac` surfaces the launcher's
//! query mode for debugging.

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::debug;

use crate::ssh::ExecuteOptions;
use crate::variant::GuestVariant;
use crate::vm::{Discovery, HostTools, Vm, VmConfig};

/// Guest definition shared by subcommands.
#[derive(Parser, Debug)]
pub struct GuestOpts {
    /// Path to the xhyve launcher binary
    #[clap(long)]
    pub xhyve: Utf8PathBuf,

    /// Raw disk image the guest boots from
    #[clap(long)]
    pub disk_image: Utf8PathBuf,

    /// Boot loader: userboot.so (FreeBSD) or a firmware image (OpenBSD)
    #[clap(long)]
    pub loader: Utf8PathBuf,

    /// SSH private key authorized for root in the guest
    #[clap(long)]
    pub ssh_key: Utf8PathBuf,

    /// Guest OS variant
    #[clap(long, value_enum, default_value_t = GuestVariant::FreeBsd)]
    pub variant: GuestVariant,

    /// Guest memory in xhyve notation
    #[clap(long, default_value = "4G")]
    pub memory: String,

    /// Number of vCPUs
    #[clap(long, default_value_t = 2)]
    pub cpus: u32,

    /// Guest UUID (v4 generated when omitted)
    #[clap(long)]
    pub uuid: Option<String>,
}

impl GuestOpts {
    fn into_vm(self, discovery: Discovery) -> Vm {
        let config = VmConfig {
            memory: self.memory,
            cpu_count: self.cpus,
            disk_image: self.disk_image,
            uuid: self
                .uuid
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            loader: self.loader,
            discovery,
            tools: HostTools::default(),
        };
        Vm::new(self.variant, self.ssh_key, self.xhyve, config)
    }
}

/// Options for booting a guest and running commands inside it.
#[derive(Parser, Debug)]
pub struct RunOpts {
    #[command(flatten)]
    pub guest: GuestOpts,

    /// IP discovery strategy
    #[clap(long, value_enum, default_value_t = Discovery::Arp)]
    pub discovery: Discovery,

    /// Seconds to wait for the guest's SSH service to accept commands
    #[clap(long, default_value_t = 60)]
    pub ready_timeout: u32,

    /// Print a JSON boot report (MAC, IP, hypervisor PID) once the
    /// guest is reachable
    #[clap(long)]
    pub json: bool,

    /// Commands to run inside the guest, in order
    #[clap(trailing_var_arg = true, required = true)]
    pub commands: Vec<String>,
}

/// Options for printing the MAC address the launcher will assign.
#[derive(Parser, Debug)]
pub struct MacOpts {
    #[command(flatten)]
    pub guest: GuestOpts,
}

/// Full lifecycle: boot, wait, run each command, shut down.
pub fn run(opts: RunOpts) -> Result<()> {
    let mut vm = opts.guest.into_vm(opts.discovery);

    vm.init()?;
    debug!("MAC address: {:?}", vm.mac_address());
    vm.run()?;
    vm.wait(opts.ready_timeout)?;

    if opts.json {
        let info = vm
            .guest_info()
            .ok_or_else(|| eyre!("guest booted but boot report is incomplete"))?;
        println!("{}", serde_json::to_string(&info)?);
    }

    for command in &opts.commands {
        vm.execute(command, &ExecuteOptions::default())?;
    }

    vm.stop()
}

/// Run the launcher's MAC query and print the result.
pub fn mac(opts: MacOpts) -> Result<()> {
    let mut vm = opts.guest.into_vm(Discovery::Arp);
    vm.init()?;
    let mac = vm
        .mac_address()
        .ok_or_else(|| eyre!("launcher reported no MAC address"))?;
    println!("{mac}");
    Ok(())
}
