//! Environment probes backing the pre-flight checks.
//!
//! Each probe returns `Result` so the validator can fold faults into
//! failing check results instead of aborting the battery.

use anyhow::{bail, Context, Result};
use std::net::{TcpStream, ToSocketAddrs};
use std::process::Command;
use std::time::Duration;

use crate::config::InterpreterConfig;

/// Whether the current process runs with elevated privileges.
#[cfg(unix)]
pub fn probe_elevation() -> Result<bool> {
    Ok(nix::unistd::Uid::effective().is_root())
}

/// Whether the current process token carries elevation.
#[cfg(windows)]
pub fn probe_elevation() -> Result<bool> {
    use std::mem;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{GetCurrentProcess, OpenProcessToken};
    use winapi::um::securitybaseapi::GetTokenInformation;
    use winapi::um::winnt::{TokenElevation, HANDLE, TOKEN_ELEVATION, TOKEN_QUERY};

    unsafe {
        let mut token: HANDLE = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            bail!("Failed to open process token");
        }

        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut size = mem::size_of::<TOKEN_ELEVATION>() as u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            size,
            &mut size,
        );
        CloseHandle(token);

        if ok == 0 {
            bail!("Failed to query token elevation");
        }
        Ok(elevation.TokenIsElevated != 0)
    }
}

/// Opens a raw TCP handshake to `host:port` within `timeout`.
pub fn probe_endpoint(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let addr = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve endpoint: {host}:{port}"))?
        .next()
        .with_context(|| format!("No address found for endpoint: {host}:{port}"))?;

    TcpStream::connect_timeout(&addr, timeout)
        .with_context(|| format!("Endpoint unreachable: {host}:{port}"))?;
    Ok(())
}

/// Queries the configured interpreter's version, falling back to the legacy
/// interpreter when the modern one is unreachable. Fails only when both are.
pub fn probe_interpreter(config: &InterpreterConfig) -> Result<String> {
    match probe_program(&config.program, &config.version_args) {
        Ok(version) => Ok(format!("{} {}", config.program, version)),
        Err(primary_err) => match &config.fallback {
            Some(fallback) => probe_program(fallback, &config.version_args)
                .map(|version| format!("{fallback} {version}"))
                .map_err(|fallback_err| {
                    anyhow::anyhow!(
                        "No interpreter runtime available: {} ({primary_err}); {fallback} ({fallback_err})",
                        config.program
                    )
                }),
            None => Err(primary_err.context(format!(
                "Interpreter runtime unavailable: {}",
                config.program
            ))),
        },
    }
}

fn probe_program(program: &str, version_args: &[String]) -> Result<String> {
    let path = which::which(program)
        .with_context(|| format!("Interpreter not found in PATH: {program}"))?;

    let output = Command::new(&path)
        .args(version_args)
        .output()
        .with_context(|| format!("Failed to run interpreter: {}", path.display()))?;

    if !output.status.success() {
        bail!(
            "Interpreter version query failed with exit code {:?}",
            output.status.code()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
