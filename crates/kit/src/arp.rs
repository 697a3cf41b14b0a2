//! Scanning the host's ARP table for the guest's IP address
//!
//! After the guest boots and asks the host's DHCP server for a lease,
//! its IP shows up in the host ARP table keyed by the MAC address the
//! launcher assigned. `arp -a -n` prints one entry per line with the
//! IP in parentheses:
//!
//! ```text
//! ? (192.168.0.2) at 40:8e:71:34:88:eb on en1 ifscope [ethernet]
//! ```

use std::process::Command;
use std::sync::LazyLock;

use camino::Utf8Path;
use color_eyre::Result;
use regex::Regex;
use tracing::debug;

use crate::hostexec;

/// Attempt budget for ARP discovery, one query per second. Guest DHCP
/// and ARP population after a cold boot is slow and variable, so the
/// budget is generous.
pub const DISCOVERY_ATTEMPTS: u32 = 500;

static PAREN_GROUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((.+)\)").unwrap());

/// Run the host ARP query tool, returning its raw table output.
///
/// `-a` requests all entries, `-n` keeps addresses numeric instead of
/// reverse-resolving them.
pub fn query_table(program: &Utf8Path) -> Result<String> {
    hostexec::run_get_string(Command::new(program).args(["-a", "-n"]))
}

/// Extract the IP address paired with `mac_address` from ARP output.
///
/// The first line containing the MAC as a substring is consulted.
/// Substring containment (not exact field matching) is deliberate:
/// there is no field-delimiter contract across platforms, only the
/// parenthesized IP and the MAC somewhere on the same line. A line
/// without a parenthesized group, or no matching line at all, is
/// "not found" rather than an error; callers retry later.
pub fn extract_ip_address(arp_output: &str, mac_address: &str) -> Option<String> {
    let line = arp_output.lines().find(|line| line.contains(mac_address))?;
    let ip = PAREN_GROUP.captures(line)?.get(1)?.as_str().to_string();
    debug!("Found IP address '{ip}' for MAC address '{mac_address}'");
    Some(ip)
}
