//! The `migrate` command: move the disk images to a new directory.

use super::{Cli, MigrateArgs};
use anyhow::{Context, Result};
use ovm_core::MigrateOpts;
use ovm_core::manifest::{DATA_DISK, MANIFEST_FILE, write_data_reset};
use ovm_wsl::WslError;
use ovm_wsl::distro;

pub async fn execute(cli: &Cli, args: MigrateArgs) -> Result<()> {
    let basic = cli.basic_opts(false)?;
    let opts = MigrateOpts::new(basic, args.old_image_dir, args.new_image_dir)?;

    ovm_core::logging::init(
        &opts.basic.log_path,
        &format!("migrate-{}", opts.basic.name),
        false,
        false,
    )?;

    start(&opts).await
}

async fn start(opts: &MigrateOpts) -> Result<()> {
    let distro_name = opts.basic.distro_name();

    tracing::info!(
        from = %opts.old_image_dir.display(),
        to = %opts.new_image_dir.display(),
        "Ready to migrate"
    );

    // Settle the distro so its VHDX handles are released.
    match distro::safe_sync_disk(&distro_name).await {
        Err(WslError::DistroNotExist) => tracing::info!("Distro does not exist"),
        Err(WslError::DistroNotRunning) => tracing::info!("Distro is not running"),
        Ok(()) | Err(_) => {
            if let Err(e) = distro::terminate(&distro_name).await {
                tracing::warn!("Terminate failed, shutting WSL down instead: {e}");
                distro::shutdown().await.context("failed to shutdown WSL")?;
            }
            tracing::info!("Distro is terminated");
        }
    }

    let old_data = opts.old_image_dir.join(DATA_DISK);
    let old_versions = opts.old_image_dir.join(MANIFEST_FILE);
    let new_versions = opts.new_image_dir.join(MANIFEST_FILE);

    // Copy the data disk. No remount needed; the next startup mounts
    // from the new location.
    distro::umount_vhdx(&[old_data.as_path()])
        .await
        .context("failed to unmount data disk")?;

    ovm_win32::fs::copy_file(&old_data, &opts.new_image_dir.join(DATA_DISK), true)
        .context("failed to copy data disk")?;
    tracing::info!("File data.vhdx is copied to the new dir");

    ovm_win32::fs::copy_file(&old_versions, &new_versions, true)
        .context("failed to copy versions manifest")?;
    tracing::info!("File versions.json is copied to the new dir");

    // Move the distro registration; a sharing violation means some
    // handle is still open, which a full shutdown releases.
    match distro::move_distro(&distro_name, &opts.new_image_dir).await {
        Ok(()) => {}
        Err(WslError::SharingViolation) => {
            tracing::info!("Sharing violation on move, shutting WSL down and retrying");
            distro::shutdown().await.context("failed to shutdown WSL")?;
            distro::move_distro(&distro_name, &opts.new_image_dir)
                .await
                .context("failed to move distro")?;
        }
        Err(e) => return Err(anyhow::Error::from(e).context("failed to move distro")),
    }
    tracing::info!("Distro is moved");

    for stale in [&old_data, &old_versions] {
        if let Err(e) = std::fs::remove_file(stale) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {e}", stale.display());
            }
        }
    }

    // Force a data re-provision on the next run.
    write_data_reset(&new_versions);

    tracing::info!(
        from = %opts.old_image_dir.display(),
        to = %opts.new_image_dir.display(),
        "Migration finished"
    );

    Ok(())
}
