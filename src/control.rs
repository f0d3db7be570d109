//! The control file advertises a running daemon: a small JSON document at
//! the session's socket path holding the TCP port and the daemon pid.
//! Clients read it to discover where to connect; cleanup removes it.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlInfo {
    pub port: u16,
    pub pid: u32,
}

/// Write `info` as compact JSON at `path`, creating parent directories.
pub fn write_control_file(path: &Path, info: &ControlInfo) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec(info)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("encode: {e}")))?;
    fs::write(path, data)
}

pub fn read_control_file(path: &Path) -> io::Result<ControlInfo> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("decode: {e}")))
}

pub fn remove_control_file(path: &Path) {
    let _ = fs::remove_file(path);
}
