//! Whole-binary lifecycle test against mocked host tools.
//!
//! `sudo`, `arp`, and `ssh` are shell-script stand-ins placed first on
//! PATH; the launcher is a script passed via --xhyve. No hypervisor or
//! network is involved.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

const MAC: &str = "40:8e:71:34:88:eb";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Mock tool directory: sudo passes through, arp reports the guest on
/// its second query, ssh records every delivered command and succeeds.
fn setup_mock_tools(dir: &Path) -> PathBuf {
    write_script(dir, "sudo", "#!/bin/sh\nexec \"$@\"\n");

    let arp_counter = dir.join("arp-count");
    write_script(
        dir,
        "arp",
        &format!(
            "#!/bin/sh\n\
             n=$(cat {counter} 2>/dev/null || echo 0)\n\
             n=$((n + 1))\n\
             echo \"$n\" > {counter}\n\
             if [ \"$n\" -ge 2 ]; then\n\
             \techo '? (192.168.0.2) at {MAC} on en1 ifscope [ethernet]'\n\
             fi\n",
            counter = arp_counter.display()
        ),
    );

    let ssh_log = dir.join("ssh.log");
    write_script(
        dir,
        "ssh",
        &format!(
            "#!/bin/sh\ncat >> {log}\necho >> {log}\nexit 0\n",
            log = ssh_log.display()
        ),
    );

    write_script(
        dir,
        "xhyve",
        &format!(
            "#!/bin/sh\n\
             for arg in \"$@\"; do\n\
             \tif [ \"$arg\" = \"-M\" ]; then echo \"MAC: {MAC}\"; exit 0; fi\n\
             done\n\
             exit 0\n"
        ),
    )
}

fn mock_path_env(dir: &Path) -> String {
    format!(
        "{}:{}",
        dir.display(),
        std::env::var("PATH").unwrap_or_default()
    )
}

#[test]
fn test_run_full_lifecycle() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let xhyve = setup_mock_tools(dir);

    let output = Command::new(env!("CARGO_BIN_EXE_xvk"))
        .env("PATH", mock_path_env(dir))
        .args([
            "run",
            "--xhyve",
            xhyve.to_str().unwrap(),
            "--disk-image",
            "/tmp/disk.raw",
            "--loader",
            "/tmp/userboot.so",
            "--ssh-key",
            "/tmp/id_rsa",
            "--json",
            "freebsd-version",
        ])
        .output()
        .expect("Failed to run xvk");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "xvk run failed: {stderr}");

    // Boot report names the discovered address
    assert!(stdout.contains(r#""ip_address":"192.168.0.2""#), "{stdout}");
    assert!(stdout.contains(&format!(r#""mac_address":"{MAC}""#)), "{stdout}");

    // The ARP table was queried twice (one miss, one hit)
    let arp_count = fs::read_to_string(dir.join("arp-count")).unwrap();
    assert_eq!(arp_count.trim(), "2");

    // Readiness probe, job command, and shutdown all went over SSH
    let ssh_log = fs::read_to_string(dir.join("ssh.log")).unwrap();
    let commands: Vec<&str> = ssh_log.lines().collect();
    assert_eq!(commands, ["true", "freebsd-version", "shutdown -p now"]);
}

#[test]
fn test_run_surfaces_remote_failure() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let xhyve = setup_mock_tools(dir);
    // Replace the ssh mock: probes (stdin 'true') succeed, everything
    // else fails with the guest command's exit code
    write_script(
        dir,
        "ssh",
        "#!/bin/sh\ncmd=$(cat)\n[ \"$cmd\" = \"true\" ] && exit 0\nexit 42\n",
    );

    let output = Command::new(env!("CARGO_BIN_EXE_xvk"))
        .env("PATH", mock_path_env(dir))
        .args([
            "run",
            "--xhyve",
            xhyve.to_str().unwrap(),
            "--disk-image",
            "/tmp/disk.raw",
            "--loader",
            "/tmp/userboot.so",
            "--ssh-key",
            "/tmp/id_rsa",
            "make test",
        ])
        .output()
        .expect("Failed to run xvk");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exited with status 42"), "{stderr}");
    assert!(stderr.contains("make test"), "{stderr}");
}

#[test]
fn test_mac_prints_assigned_address() {
    let td = TempDir::new().unwrap();
    let dir = td.path();
    let xhyve = setup_mock_tools(dir);

    let output = Command::new(env!("CARGO_BIN_EXE_xvk"))
        .env("PATH", mock_path_env(dir))
        .args([
            "mac",
            "--xhyve",
            xhyve.to_str().unwrap(),
            "--disk-image",
            "/tmp/disk.raw",
            "--loader",
            "/tmp/userboot.so",
            "--ssh-key",
            "/tmp/id_rsa",
        ])
        .output()
        .expect("Failed to run xvk");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "xvk mac failed: {stderr}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), MAC);
}
