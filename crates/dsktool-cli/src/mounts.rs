//! Mount state lookup via /proc/self/mounts

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MOUNTS_PATH: &str = "/proc/self/mounts";

/// Kernel device node for partition `number` of `disk`
///
/// `/dev/sda` → `/dev/sda1`, `/dev/nvme0n1` → `/dev/nvme0n1p1`.
pub fn partition_device_path(disk: &Path, number: usize) -> PathBuf {
    let disk = disk.to_string_lossy();
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk, number))
    } else {
        PathBuf::from(format!("{}{}", disk, number))
    }
}

/// Mount sources listed in a mounts table, with octal escapes decoded
pub fn mount_sources(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(unescape)
        .collect()
}

/// True if `device` appears as a mount source
///
/// Systems without /proc/self/mounts report nothing mounted.
pub fn is_mounted(device: &Path) -> io::Result<bool> {
    let contents = match fs::read_to_string(MOUNTS_PATH) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let device = fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());
    Ok(mount_sources(&contents).iter().any(|source| {
        let source = Path::new(source);
        source == device || fs::canonicalize(source).is_ok_and(|resolved| resolved == device)
    }))
}

fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(code as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
