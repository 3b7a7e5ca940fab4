//! Fluent invocation with full output capture.
//!
//! The environment gates need to inspect output even when `wsl.exe`
//! exits nonzero (its diagnostics land on either stream depending on
//! release), so unlike [`crate::invoke::wsl_exec`] this API returns
//! the captured streams alongside the status instead of failing.

use crate::error::Result;
use crate::find::find_wsl;
use crate::invoke::{render, silent_command};

/// Captured result of one invocation.
#[derive(Debug)]
pub struct ExecOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Exit code, when the process ran to completion.
    pub code: Option<i32>,
}

impl ExecOutput {
    /// Whether the process exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout and stderr concatenated, for keyword matching.
    #[must_use]
    pub fn all_out(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Builder for a captured `wsl.exe` run.
#[derive(Debug, Default)]
#[must_use = "an Exec does nothing until .run() is called"]
pub struct Exec {
    distro: Option<String>,
}

impl Exec {
    /// Creates a builder targeting the WSL CLI itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes the invocation with `-d <name>`.
    pub fn distro(mut self, name: impl Into<String>) -> Self {
        self.distro = Some(name.into());
        self
    }

    /// Runs `wsl.exe` with `args` and captures everything.
    ///
    /// Only spawn failures are errors; a nonzero exit is reported
    /// through [`ExecOutput::code`].
    pub async fn run(&self, args: &[&str]) -> Result<ExecOutput> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
        if let Some(ref distro) = self.distro {
            full.push("-d");
            full.push(distro);
        }
        full.extend_from_slice(args);

        let wsl = find_wsl();
        tracing::info!("Running wsl command: {}", render(wsl, &full));

        let output = silent_command(wsl, &full).output().await?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}

/// Spawns `sh -c <command>` inside `distro` with both output streams
/// piped, for callers that stream output as it appears.
pub fn spawn_shell(distro: &str, command: &str) -> std::io::Result<tokio::process::Child> {
    let args = ["-d", distro, "sh", "-c", command];
    let wsl = find_wsl();
    tracing::info!("Running command in distro: {}", render(wsl, &args));

    silent_command(wsl, &args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_out_concatenates_streams() {
        let out = ExecOutput {
            stdout: "left ".to_string(),
            stderr: "right".to_string(),
            code: Some(1),
        };
        assert_eq!(out.all_out(), "left right");
        assert!(!out.success());
    }
}
