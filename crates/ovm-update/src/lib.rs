//! Artifact updater.
//!
//! Reconciles the materialised `rootfs` and `data` layers against the
//! configured versions and performs destructive replacement. The data
//! disk goes first: importing a new rootfs fails while a running
//! distro still holds the old one, whereas data replacement tolerates
//! a missing distro entirely.

mod error;

pub use error::{Result, UpdateError};

use ovm_core::manifest::{DATA_DISK, Manifest, ROOTFS_DISK, SOURCECODE_DISK};
use ovm_core::{EventName, Notifier, RunOpts};
use ovm_wsl::WslError;
use ovm_wsl::distro;
use std::path::Path;

/// Reconciles and replaces stale layers, then persists the manifest.
pub struct Updater<'a> {
    opts: &'a RunOpts,
    notifier: &'a Notifier,
}

impl<'a> Updater<'a> {
    /// Creates an updater for one run command.
    #[must_use]
    pub fn new(opts: &'a RunOpts, notifier: &'a Notifier) -> Self {
        Self { opts, notifier }
    }

    /// Computes the stale set and replaces what differs. No-op when
    /// everything matches.
    pub async fn check_and_replace(&self) -> Result<()> {
        let manifest = Manifest::new(&self.opts.image_dir, self.opts.versions.clone());

        let stale = manifest.stale_layers();
        if stale.is_empty() {
            tracing::info!("Disk layers match the configured versions");
            return Ok(());
        }

        tracing::info!(
            rootfs = stale.rootfs,
            data = stale.data,
            "Disk layers need replacement"
        );

        if stale.data {
            self.notifier.notify(EventName::UpdatingData);
            match self.update_data().await {
                Ok(()) => self.notifier.notify(EventName::UpdateDataSuccess),
                Err(e) => {
                    self.notifier.notify(EventName::UpdateDataFailed);
                    return Err(e);
                }
            }
        }

        if stale.rootfs {
            self.notifier.notify(EventName::UpdatingRootFS);
            match self.update_rootfs().await {
                Ok(()) => self.notifier.notify(EventName::UpdateRootFSSuccess),
                Err(e) => {
                    self.notifier.notify(EventName::UpdateRootFSFailed);
                    return Err(e);
                }
            }
        }

        manifest.save().map_err(UpdateError::from)?;
        Ok(())
    }

    /// Replaces the data disk: settle the distro, detach, remove,
    /// provision a fresh sparse VHDX at the name-derived size.
    async fn update_data(&self) -> Result<()> {
        let distro_name = self.opts.basic.distro_name();

        match distro::safe_sync_disk(&distro_name).await {
            Err(WslError::DistroNotExist | WslError::DistroNotRunning) => {}
            _ => {
                distro::terminate(&distro_name).await.map_err(|e| {
                    UpdateError::data(format!("cannot terminate distro {distro_name}: {e}"))
                })?;
            }
        }

        let data_disk = self.opts.image_dir.join(DATA_DISK);
        let sourcecode_disk = self.opts.image_dir.join(SOURCECODE_DISK);

        distro::umount_vhdx(&[data_disk.as_path(), sourcecode_disk.as_path()])
            .await
            .map_err(|e| UpdateError::data(format!("failed to unmount data disks: {e}")))?;

        if data_disk.exists() {
            std::fs::remove_file(&data_disk)
                .map_err(|e| UpdateError::data(format!("failed to remove old data disk: {e}")))?;
        }

        let size = ovm_core::disk::data_size(&self.opts.basic.name);
        ovm_win32::vhdx::create_vhdx(&data_disk, size)
            .map_err(|e| UpdateError::data(format!("failed to create data disk: {e}")))?;

        Ok(())
    }

    /// Replaces the rootfs: drop the old registration, decompress the
    /// configured rootfs tar, and import it.
    async fn update_rootfs(&self) -> Result<()> {
        let distro_name = self.opts.basic.distro_name();

        match distro::safe_sync_disk(&distro_name).await {
            Err(WslError::DistroNotExist) => {}
            Ok(()) | Err(WslError::DistroNotRunning) => {
                distro::unregister(&distro_name).await.map_err(|e| {
                    UpdateError::rootfs(format!("cannot remove old distro {distro_name}: {e}"))
                })?;
            }
            Err(e) => {
                return Err(UpdateError::rootfs(format!(
                    "cannot remove old distro {distro_name} in sync step: {e}"
                )));
            }
        }

        let staging = tempfile::Builder::new().prefix("ovm-").tempdir()?;
        let tar = staging.path().join("ovm.tar");

        decompress_zstd(&self.opts.rootfs_path, &tar)
            .await
            .map_err(|e| UpdateError::rootfs(format!("failed to decompress rootfs: {e}")))?;

        distro::import_distro(&distro_name, &self.opts.image_dir, &tar)
            .await
            .map_err(|e| UpdateError::rootfs(format!("failed to import distro: {e}")))?;

        Ok(())
    }
}

/// Decompresses a `.zst` file to `dest` off the async runtime.
async fn decompress_zstd(src: &Path, dest: &Path) -> Result<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let input = std::fs::File::open(&src)?;
        let output = std::fs::File::create(&dest)?;
        zstd::stream::copy_decode(
            std::io::BufReader::new(input),
            std::io::BufWriter::new(output),
        )?;
        Ok(())
    })
    .await
    .map_err(|e| UpdateError::rootfs(format!("decompression task failed: {e}")))?
}

/// Whether a successful rootfs replacement left its artifacts behind.
/// Exposed for post-update sanity checks.
#[must_use]
pub fn rootfs_materialised(image_dir: &Path) -> bool {
    image_dir.join(ROOTFS_DISK).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn zstd_decompression_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let compressed = dir.path().join("rootfs.tar.zst");
        let out = dir.path().join("rootfs.tar");

        let payload = b"fake tar payload".repeat(100);
        let mut encoder =
            zstd::stream::Encoder::new(std::fs::File::create(&compressed).unwrap(), 3).unwrap();
        encoder.write_all(&payload).unwrap();
        encoder.finish().unwrap();

        decompress_zstd(&compressed, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), payload);
    }

    #[tokio::test]
    async fn decompressing_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let compressed = dir.path().join("bad.zst");
        std::fs::write(&compressed, b"this is not zstd").unwrap();

        let result = decompress_zstd(&compressed, &dir.path().join("out.tar")).await;
        assert!(result.is_err());
    }
}
