use anyhow::{Context, Result};

#[cfg(unix)]
pub fn is_elevated() -> bool {
    // On Unix, check if running as root
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

/// Re-run the current command line through `sudo`, waiting for it to finish.
///
/// Returns `Ok(false)` when already elevated or when the elevated run failed.
#[cfg(unix)]
pub fn elevate_and_rerun() -> Result<bool> {
    use std::process::Command;

    if is_elevated() {
        return Ok(false);
    }

    let exe_path = std::env::current_exe().context("Could not determine current executable")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    log::info!("Re-running {} with sudo", exe_path.display());

    let status = Command::new("sudo")
        .arg(&exe_path)
        .args(&args)
        .status()
        .context("Failed to launch sudo")?;

    Ok(status.success())
}

#[cfg(not(unix))]
pub fn elevate_and_rerun() -> Result<bool> {
    Ok(false)
}
