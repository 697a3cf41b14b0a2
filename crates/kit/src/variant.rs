//! Per-guest-OS boot and shutdown policy

use crate::vm::VmConfig;

/// Guest operating system variant.
///
/// Each variant is a pure policy record deriving three values: the
/// xhyve network device model, the extra boot loader arguments, and
/// the in-guest shutdown command. Selection happens once when the VM
/// is constructed; adding a variant means adding one more case here
/// and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[clap(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GuestVariant {
    /// FreeBSD guest, booted through userboot.so
    FreeBsd,
    /// OpenBSD guest, booted through a firmware image
    OpenBsd,
}

impl GuestVariant {
    /// Network device model for PCI slot 2.
    pub fn network_device(&self) -> &'static str {
        match self {
            Self::FreeBsd => "virtio-net",
            Self::OpenBsd => "e1000",
        }
    }

    /// Extra boot arguments appended after the common argument vector.
    pub fn boot_args(&self, config: &VmConfig) -> Vec<String> {
        match self {
            Self::FreeBsd => vec![
                "-f".to_string(),
                format!("fbsd,{},{},", config.loader, config.disk_image),
            ],
            Self::OpenBsd => vec!["-f".to_string(), format!("bootrom,{},,", config.loader)],
        }
    }

    /// Command sent over SSH to power the guest off from the inside.
    /// This is also what terminates the hypervisor process.
    pub fn shutdown_command(&self) -> &'static str {
        match self {
            Self::FreeBsd => "shutdown -p now",
            Self::OpenBsd => "shutdown -h -p now",
        }
    }
}
