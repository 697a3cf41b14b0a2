//! Alternate IP discovery from the host DHCP server's lease file
//!
//! macOS's bundled DHCP server records vmnet leases in
//! `/var/db/dhcpd_leases` as brace-delimited blocks of `key=value`
//! lines. This path is selectable via `--discovery dhcpd-leases`; ARP
//! scanning is the default since it is simpler and platform-uniform.

use std::path::Path;

/// Attempt budget for lease-file discovery, one read per second.
pub const DISCOVERY_ATTEMPTS: u32 = 50;

/// Default location of the lease file.
pub const LEASES_PATH: &str = "/var/db/dhcpd_leases";

/// Read the lease file. A missing file reads as "no leases yet", not
/// an error; the DHCP server creates it lazily on first lease.
pub fn read_leases(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Extract the IP address for `mac_address` from lease-file text.
///
/// Finds the first block containing the MAC, then the first trimmed
/// line with an `ip_address=` prefix inside it. Every step of the
/// lookup may come up empty and short-circuits to `None`.
pub fn extract_ip_address(leases: &str, mac_address: &str) -> Option<String> {
    leases
        .split('{')
        .find(|block| block.contains(mac_address))?
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("ip_address="))
        .map(ToOwned::to_owned)
}
