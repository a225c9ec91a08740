//! Process discovery and liveness checks

#![cfg(target_os = "linux")]

use std::fs;
use std::io;
use std::path::Path;

/// Find a process whose executable file name is `process_name`
///
/// Walks `/proc/[pid]` and compares the final component of the `exe` link.
/// Processes whose link cannot be read (other users, kernel threads) are
/// skipped. Returns the first match in directory order.
pub fn find_process(process_name: &str) -> Option<u32> {
    let proc_dir = Path::new("/proc");

    for entry in fs::read_dir(proc_dir).ok()? {
        let Ok(entry) = entry else {
            continue;
        };

        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == 0 {
            continue;
        }

        let Ok(exe) = fs::read_link(entry.path().join("exe")) else {
            continue;
        };

        if exe.file_name().is_some_and(|name| name == process_name) {
            log::debug!("Found '{}' (PID: {})", process_name, pid);
            return Some(pid);
        }
    }

    None
}

/// Check if a process is still running by its PID
///
/// Sends signal 0; only `ESRCH` counts as gone, so a live process owned by
/// another user (`EPERM`) is still reported as running.
pub fn is_process_running(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    // SAFETY: signal 0 performs the existence and permission checks only
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_running() {
        assert!(is_process_running(std::process::id()));
    }

    #[test]
    fn test_invalid_pids_are_not_running() {
        assert!(!is_process_running(0));
        assert!(!is_process_running(u32::MAX));
        assert!(!is_process_running(i32::MAX as u32));
    }

    #[test]
    fn test_find_own_process() {
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_str().unwrap().to_string();
        assert!(find_process(&name).is_some());
    }

    #[test]
    fn test_find_missing_process() {
        assert!(find_process("no-such-process-name-for-procscope").is_none());
    }
}
