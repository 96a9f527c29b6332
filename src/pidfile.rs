//! Liveness marker: the daemon's pid written to a well-known file.

use std::{
    fs, io,
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running(u32),
    /// The file names a process that no longer exists.
    Stale(u32),
    NotRunning,
}

pub fn write(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, pid.to_string())
        .with_context(|| format!("failed to write pid file {}", path.display()))
}

/// Pid recorded in `path`. Missing, empty or garbled files read as `None`.
pub fn read(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Probes `pid` with signal 0.
pub fn is_alive(pid: u32) -> bool {
    send_signal(pid, "-0").unwrap_or(false)
}

pub fn status(path: &Path) -> DaemonStatus {
    match read(path) {
        Some(pid) if is_alive(pid) => DaemonStatus::Running(pid),
        Some(pid) => DaemonStatus::Stale(pid),
        None => DaemonStatus::NotRunning,
    }
}

/// Records this process in `path`, refusing when another live process
/// already owns it.
pub fn claim(path: &Path) -> Result<()> {
    let own = std::process::id();
    match status(path) {
        DaemonStatus::Running(pid) if pid != own => {
            bail!("daemon already running with pid {pid} ({})", path.display())
        }
        DaemonStatus::Stale(pid) => {
            warn!("Replacing stale pid file for {pid}");
        }
        _ => {}
    }
    write(path, own)?;
    info!("Wrote pid {own} to {}", path.display());
    Ok(())
}

/// Sends SIGTERM to the recorded daemon and returns its pid.
pub fn signal_stop(path: &Path) -> Result<Option<u32>> {
    let Some(pid) = read(path) else {
        return Ok(None);
    };
    if !send_signal(pid, "-TERM").with_context(|| format!("failed to signal pid {pid}"))? {
        bail!("kill returned non-success status for pid {pid}");
    }
    Ok(Some(pid))
}

fn send_signal(pid: u32, signal: &str) -> io::Result<bool> {
    Command::new("kill")
        .arg(signal)
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
}
