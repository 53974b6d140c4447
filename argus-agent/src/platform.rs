//! Trait seams for the platform inputs the monitors consume.
//!
//! The OS APIs themselves (drive enumeration, foreground window, TCP
//! table) are external collaborators; each gets a small trait here with a
//! best-effort default implementation, so monitors stay testable with
//! scripted providers.

use std::path::PathBuf;
use sysinfo::Disks;
use tracing::debug;

/// One mounted drive as the scanner sees it.
#[derive(Debug, Clone)]
pub struct DriveInfo {
    pub root: PathBuf,
    pub removable: bool,
    pub network: bool,
    pub ready: bool,
}

/// Enumerates currently-mounted drives.
pub trait DriveProvider: Send + Sync {
    fn drives(&self) -> Vec<DriveInfo>;
}

/// sysinfo-backed drive enumeration. Network mounts are recognized by
/// filesystem type.
pub struct SysinfoDrives;

const NETWORK_FILESYSTEMS: &[&str] = &["cifs", "smbfs", "smb2", "nfs", "nfs4", "afpfs", "webdav"];

impl DriveProvider for SysinfoDrives {
    fn drives(&self) -> Vec<DriveInfo> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .map(|disk| {
                let fs = disk.file_system().to_string_lossy().to_lowercase();
                DriveInfo {
                    root: disk.mount_point().to_path_buf(),
                    removable: disk.is_removable(),
                    network: NETWORK_FILESYSTEMS.iter().any(|n| fs == *n),
                    ready: true,
                }
            })
            .collect()
    }
}

/// Foreground window snapshot used for process attribution and app-usage
/// sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundWindow {
    pub process_name: String,
    pub pid: u32,
    pub window_title: String,
}

/// Samples the currently focused window. Attribution through this provider
/// is advisory: the event may have been produced while another window held
/// focus.
pub trait ForegroundProvider: Send + Sync {
    fn sample(&self) -> Option<ForegroundWindow>;
}

/// Used on hosts without a supported window system (servers, CI). Every
/// sample reports no foreground window.
pub struct NoForeground;

impl ForegroundProvider for NoForeground {
    fn sample(&self) -> Option<ForegroundWindow> {
        None
    }
}

/// One row of the OS TCP table with cumulative byte counters.
#[derive(Debug, Clone)]
pub struct TcpConnection {
    pub pid: u32,
    pub process_name: String,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub state: String,
}

/// Snapshots the TCP connection table.
pub trait TcpTableProvider: Send + Sync {
    fn snapshot(&self) -> Vec<TcpConnection>;
}

/// `ss`-backed TCP table on Linux; other platforms report an empty table.
pub struct SsTcpTable;

impl TcpTableProvider for SsTcpTable {
    fn snapshot(&self) -> Vec<TcpConnection> {
        #[cfg(target_os = "linux")]
        {
            match std::process::Command::new("ss")
                .args(["-t", "-i", "-n", "-p", "-O", "-H"])
                .output()
            {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    stdout.lines().filter_map(parse_ss_line).collect()
                }
                Err(e) => {
                    debug!(error = %e, "ss invocation failed");
                    Vec::new()
                }
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            debug!("TCP table snapshot not supported on this platform");
            Vec::new()
        }
    }
}

/// Parse one `ss -tinpOH` line:
/// `ESTAB 0 0 192.168.1.5:50412 203.0.113.5:443 users:(("curl",pid=812,fd=5)) ... bytes_sent:12345 ... bytes_received:678`
pub fn parse_ss_line(line: &str) -> Option<TcpConnection> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }

    let state = parts[0].to_string();
    let (local_addr, local_port) = split_addr_port(parts[3])?;
    let (remote_addr, remote_port) = split_addr_port(parts[4])?;

    let mut pid = 0u32;
    let mut process_name = String::new();
    let mut bytes_sent = 0u64;
    let mut bytes_received = 0u64;

    for token in &parts[5..] {
        if let Some(users) = token.strip_prefix("users:((\"") {
            if let Some(name_end) = users.find('"') {
                process_name = users[..name_end].to_string();
            }
            if let Some(p) = users.split("pid=").nth(1) {
                pid = p
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0);
            }
        } else if let Some(v) = token.strip_prefix("bytes_sent:") {
            bytes_sent = v.parse().unwrap_or(0);
        } else if let Some(v) = token.strip_prefix("bytes_received:") {
            bytes_received = v.parse().unwrap_or(0);
        }
    }

    Some(TcpConnection {
        pid,
        process_name,
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        bytes_sent,
        bytes_received,
        state,
    })
}

/// Split "addr:port" into (addr, port), tolerating bracketed IPv6.
fn split_addr_port(s: &str) -> Option<(String, u16)> {
    let pos = s.rfind(':')?;
    let addr = s[..pos].trim_matches(['[', ']']).to_string();
    let port: u16 = s[pos + 1..]
        .trim_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()?;
    Some((addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ss_line_full() {
        let line = r#"ESTAB 0 0 192.168.1.5:50412 203.0.113.5:443 users:(("curl",pid=812,fd=5)) cubic wscale:7,7 bytes_sent:12345 bytes_acked:12300 bytes_received:678 segs_out:40"#;
        let conn = parse_ss_line(line).unwrap();
        assert_eq!(conn.state, "ESTAB");
        assert_eq!(conn.local_addr, "192.168.1.5");
        assert_eq!(conn.local_port, 50412);
        assert_eq!(conn.remote_addr, "203.0.113.5");
        assert_eq!(conn.remote_port, 443);
        assert_eq!(conn.process_name, "curl");
        assert_eq!(conn.pid, 812);
        assert_eq!(conn.bytes_sent, 12345);
        assert_eq!(conn.bytes_received, 678);
    }

    #[test]
    fn test_parse_ss_line_without_process() {
        let line = "ESTAB 0 0 10.0.0.2:22 10.0.0.9:55123 cubic bytes_sent:99";
        let conn = parse_ss_line(line).unwrap();
        assert_eq!(conn.pid, 0);
        assert!(conn.process_name.is_empty());
        assert_eq!(conn.bytes_sent, 99);
    }

    #[test]
    fn test_parse_ss_line_ipv6() {
        let line = r#"ESTAB 0 0 [::1]:8080 [2001:db8::5]:443 users:(("node",pid=44,fd=20))"#;
        let conn = parse_ss_line(line).unwrap();
        assert_eq!(conn.local_addr, "::1");
        assert_eq!(conn.remote_addr, "2001:db8::5");
        assert_eq!(conn.remote_port, 443);
    }

    #[test]
    fn test_parse_ss_line_garbage() {
        assert!(parse_ss_line("").is_none());
        assert!(parse_ss_line("not a table row").is_none());
    }
}
