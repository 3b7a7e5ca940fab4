//! The single `wsl.exe` invocation contract.
//!
//! Every call sets `WSL_UTF8=1` (WSL otherwise emits UTF-16), hides
//! the console window, captures both output streams, and logs the
//! verbatim command line before running. Nonzero exits turn into a
//! synthetic error string concatenating stderr, stdout and the OS exit
//! reason, which is what the classifier matches on.

use crate::error::{Result, WslError};
use crate::find::find_wsl;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// CREATE_NO_WINDOW process creation flag.
///
/// Ref: <https://learn.microsoft.com/en-us/windows/win32/procthread/process-creation-flags>
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Builds a silenced command with the WSL environment applied.
pub(crate) fn silent_command(program: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.env("WSL_UTF8", "1");
    cmd.stdin(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd
}

/// Renders the verbatim command line for logging and error text.
pub(crate) fn render(program: &Path, args: &[&str]) -> String {
    format!("{} {}", program.display(), args.join(" "))
}

/// Runs `wsl.exe` with `args`, returning stdout on success.
pub async fn wsl_exec(args: &[&str]) -> Result<String> {
    let wsl = find_wsl();
    let command = render(wsl, args);
    tracing::info!("Running command in wsl: {command}");

    let output = silent_command(wsl, args).output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WslError::Command {
            command,
            detail: format!("{stderr} {stdout} ({})", output.status),
        });
    }

    Ok(stdout)
}

/// Runs a command inside `distro` (`wsl -d <distro> …`).
pub async fn wsl_invoke(distro: &str, args: &[&str]) -> Result<()> {
    let mut full = vec!["-d", distro];
    full.extend_from_slice(args);

    let wsl = find_wsl();
    let command = render(wsl, &full);
    tracing::info!("Running command in distro: {command}");

    let output = silent_command(wsl, &full).output().await?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WslError::Command {
            command,
            detail: format!("{stderr} {stdout} ({})", output.status),
        });
    }

    Ok(())
}

/// Runs an arbitrary external tool silently, discarding output.
///
/// Exit status is returned so callers can apply tool-specific success
/// codes (dism's reboot-required family).
pub async fn silent_status(program: &Path, args: &[&str]) -> Result<Option<i32>> {
    tracing::info!("Running command: {}", render(program, args));

    let status = silent_command(program, args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    Ok(status.code())
}
