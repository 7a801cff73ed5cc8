//! Process-level startup helpers.
//!
//! # Responsibilities
//! - Detach from the terminal when `daemonize` is set
//! - Point stdout/stderr at the log file
//! - Label processes so `ps`/`top` show their role
//!
//! # Design Decisions
//! - Called before any thread or runtime exists; every step is fork-safe
//! - Title failures are ignored, matching best-effort `ps` labels

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use nix::unistd::{dup2, fork, setsid, ForkResult};

/// Fork into the background and start a new session. The parent exits 0;
/// only the detached child returns.
pub fn daemonize(log_file: &Path) -> io::Result<()> {
    // SAFETY: called from the single-threaded master before any runtime starts.
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }
    setsid().map_err(io::Error::from)?;
    redirect_output(log_file)
}

/// Reopen stdin on /dev/null and append stdout/stderr to `log_file`.
pub fn redirect_output(log_file: &Path) -> io::Result<()> {
    if let Some(dir) = log_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(log_file)?;
    let null = OpenOptions::new().read(true).open("/dev/null")?;

    dup2(null.as_raw_fd(), libc::STDIN_FILENO).map_err(io::Error::from)?;
    dup2(log.as_raw_fd(), libc::STDOUT_FILENO).map_err(io::Error::from)?;
    dup2(log.as_raw_fd(), libc::STDERR_FILENO).map_err(io::Error::from)?;
    Ok(())
}

/// Set the kernel-visible process name (first 15 bytes on Linux).
pub fn set_process_title(title: &str) {
    #[cfg(target_os = "linux")]
    {
        if let Ok(name) = std::ffi::CString::new(title) {
            // SAFETY: PR_SET_NAME reads a NUL-terminated string we own.
            unsafe {
                libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0);
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = title;
}

/// `<base>: <role>` title for a child process.
pub fn process_title(base: &str, role: &str) -> String {
    format!("{}: {}", base, role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_format() {
        assert_eq!(process_title("vicuna-server", "worker/task"), "vicuna-server: worker/task");
    }

    #[test]
    fn setting_title_does_not_panic() {
        set_process_title("vicuna-test");
        set_process_title("bad\0title");
    }
}
