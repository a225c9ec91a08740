//! Patch a running process: find every "hello" in its "test" mappings and
//! overwrite it with "works"
//!
//! Usage: `cargo run --example remote -- <pid> [config.toml]`
//!
//! With a config file, its signatures are scanned instead and each match is
//! overwritten with the signature's `replace_with` text, if any. Matches are
//! printed as JSON. Needs root or `CAP_SYS_PTRACE` for most targets.

use std::process::ExitCode;
#[cfg(target_os = "linux")]
use std::{thread, time::Duration};

#[cfg(target_os = "linux")]
use procscope::{ScanConfig, SignatureConfig, Target};

#[cfg(target_os = "linux")]
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(target_os = "linux")]
fn default_config() -> ScanConfig {
    ScanConfig {
        target: None,
        signatures: vec![SignatureConfig {
            name: "hello".to_string(),
            region: "test".to_string(),
            pattern: "68 65 6c 6c 6f".to_string(),
            offset: 0,
            index: None,
            permissions: None,
            all: true,
            reload: true,
            relative: None,
            fallback_patterns: Vec::new(),
            replace_with: Some("works".to_string()),
        }],
    }
}

#[cfg(target_os = "linux")]
fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(pid) = args.next().and_then(|arg| arg.parse::<u32>().ok()) else {
        eprintln!("usage: remote <pid> [config.toml]");
        return ExitCode::FAILURE;
    };

    let config = match args.next() {
        Some(path) => match ScanConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => default_config(),
    };

    // SAFETY: geteuid has no preconditions
    if unsafe { libc::geteuid() } != 0 {
        log::warn!("Not running as root, reads of other processes will likely fail");
    }

    let mut target = Target::new(pid);
    while !target.is_running() {
        log::info!("Waiting for PID {}...", pid);
        thread::sleep(POLL_INTERVAL);
    }

    if let Err(e) = target.parse_maps() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let matches = target.scan(&config);
    match serde_json::to_string_pretty(&matches) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize matches: {}", e),
    }

    for found in &matches {
        let Some(replacement) = config
            .signatures
            .iter()
            .find(|s| s.name == found.name)
            .and_then(|s| s.replace_with.as_deref())
        else {
            continue;
        };
        match target.write_memory(found.address, replacement.as_bytes()) {
            Ok(written) => log::info!(
                "Wrote {} bytes at {:#x} ({} #{})",
                written,
                found.address,
                found.region,
                found.region_index
            ),
            Err(e) => log::error!("Write at {:#x} failed: {}", found.address, e),
        }
    }

    ExitCode::SUCCESS
}

#[cfg(not(target_os = "linux"))]
fn main() -> ExitCode {
    eprintln!("remote only runs on Linux");
    ExitCode::FAILURE
}
