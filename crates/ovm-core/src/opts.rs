//! Per-command options and derived identity.

use crate::error::{CoreError, Result};
use crate::manifest::Versions;
use std::path::{Path, PathBuf};

/// Prefix every managed distribution carries.
pub const DISTRO_PREFIX: &str = "ovm-";

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct BasicOpts {
    /// VM name; suffix of the distro and of all pipe endpoints.
    pub name: String,
    /// Directory receiving the rotating log files.
    pub log_path: PathBuf,
    /// Short name of the front-end event pipe (`foo` in `\\.\pipe\foo`).
    pub event_pipe_name: String,
    /// Host PID whose death terminates this process; 0 disables.
    pub bind_pid: u32,
}

impl BasicOpts {
    /// Name of the managed WSL distribution.
    #[must_use]
    pub fn distro_name(&self) -> String {
        format!("{DISTRO_PREFIX}{}", self.name)
    }

    /// Full path of the front-end event pipe.
    #[must_use]
    pub fn event_endpoint(&self) -> String {
        format!(r"\\.\pipe\{}", self.event_pipe_name)
    }

    /// RESTful control endpoint for the `init` command.
    #[must_use]
    pub fn init_restful_endpoint(&self) -> String {
        format!(r"\\.\pipe\ovm-init-{}", self.name)
    }

    /// RESTful control endpoint for the `run` command.
    #[must_use]
    pub fn run_restful_endpoint(&self) -> String {
        format!(r"\\.\pipe\ovm-{}", self.name)
    }

    /// Validates the shared fields and normalizes the log path.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::config("name is required"));
        }
        if self.event_pipe_name.is_empty() {
            return Err(CoreError::config("event-npipe-name is required"));
        }

        self.log_path = absolutize(&self.log_path)?;
        std::fs::create_dir_all(&self.log_path).map_err(|e| {
            CoreError::config(format!(
                "failed to create log folder {}: {e}",
                self.log_path.display()
            ))
        })?;

        Ok(())
    }
}

/// Options for the `run` command.
#[derive(Debug, Clone)]
pub struct RunOpts {
    /// Shared options.
    pub basic: BasicOpts,
    /// Directory owning the disk images and the version manifest.
    pub image_dir: PathBuf,
    /// On-host zstd-compressed rootfs tar.
    pub rootfs_path: PathBuf,
    /// Configured layer versions.
    pub versions: Versions,
}

impl RunOpts {
    /// Parses and validates run options from raw flag values.
    pub fn new(
        mut basic: BasicOpts,
        image_dir: PathBuf,
        rootfs_path: PathBuf,
        versions: &str,
    ) -> Result<Self> {
        basic.validate()?;

        let image_dir = absolutize(&image_dir)?;
        std::fs::create_dir_all(&image_dir).map_err(|e| {
            CoreError::config(format!(
                "failed to create image dir {}: {e}",
                image_dir.display()
            ))
        })?;

        Ok(Self {
            basic,
            image_dir,
            rootfs_path: absolutize(&rootfs_path)?,
            versions: Versions::parse(versions)?,
        })
    }
}

/// Options for the `migrate` command.
#[derive(Debug, Clone)]
pub struct MigrateOpts {
    /// Shared options. The event pipe is unused by `migrate`.
    pub basic: BasicOpts,
    /// Current image directory.
    pub old_image_dir: PathBuf,
    /// Target image directory.
    pub new_image_dir: PathBuf,
}

impl MigrateOpts {
    /// Validates migrate options and creates the target directory.
    pub fn new(mut basic: BasicOpts, old_image_dir: PathBuf, new_image_dir: PathBuf) -> Result<Self> {
        if basic.name.is_empty() {
            return Err(CoreError::config("name is required"));
        }
        basic.log_path = absolutize(&basic.log_path)?;
        std::fs::create_dir_all(&basic.log_path)?;

        let new_image_dir = absolutize(&new_image_dir)?;
        std::fs::create_dir_all(&new_image_dir)?;

        Ok(Self {
            basic,
            old_image_dir: absolutize(&old_image_dir)?,
            new_image_dir,
        })
    }
}

fn absolutize(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(name: &str) -> BasicOpts {
        BasicOpts {
            name: name.to_string(),
            log_path: PathBuf::from("logs"),
            event_pipe_name: "fe-events".to_string(),
            bind_pid: 0,
        }
    }

    #[test]
    fn derived_identity() {
        let opts = basic("alpha");
        assert_eq!(opts.distro_name(), "ovm-alpha");
        assert_eq!(opts.event_endpoint(), r"\\.\pipe\fe-events");
        assert_eq!(opts.init_restful_endpoint(), r"\\.\pipe\ovm-init-alpha");
        assert_eq!(opts.run_restful_endpoint(), r"\\.\pipe\ovm-alpha");
    }

    #[test]
    fn validate_rejects_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = basic("");
        opts.log_path = dir.path().join("logs");
        assert!(opts.validate().is_err());
    }

    #[test]
    fn validate_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = basic("alpha");
        opts.log_path = dir.path().join("nested").join("logs");
        opts.validate().unwrap();
        assert!(opts.log_path.is_dir());
    }

    #[test]
    fn run_opts_parse_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = basic("alpha");
        b.log_path = dir.path().join("logs");

        let opts = RunOpts::new(
            b,
            dir.path().join("images"),
            dir.path().join("rootfs.tar.zst"),
            "rootfs=v10, data=v2",
        )
        .unwrap();

        assert_eq!(opts.versions.rootfs, "v10");
        assert_eq!(opts.versions.data, "v2");
        assert!(opts.image_dir.is_dir());
    }
}
