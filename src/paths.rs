//! Socket path resolution.
//!
//! Sockets live in `/tmp/toolhub-{uid}/` rather than under the user config
//! directory because macOS limits Unix socket paths to 104 bytes and
//! `~/Library/Application Support/...` exceeds that. The directory is
//! created with a restrictive umask so other users on a shared host never
//! see a window where it is world-accessible.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;

/// Per-user socket directory, created on first use.
pub fn socket_dir() -> Result<PathBuf> {
    let uid = unsafe { libc::getuid() };
    let dir = PathBuf::from(format!("/tmp/toolhub-{uid}"));
    if !dir.exists() {
        // Restrictive umask before mkdir avoids a TOCTOU race between
        // mkdir and chmod on shared /tmp.
        let old_umask = unsafe { libc::umask(0o077) };
        let result = fs::create_dir_all(&dir);
        unsafe {
            libc::umask(old_umask);
        }
        result?;
    }
    Ok(dir)
}

/// Default socket path for this host process.
pub fn default_socket_path() -> Result<PathBuf> {
    Ok(socket_dir()?.join(format!("hub-{}.sock", std::process::id())))
}
