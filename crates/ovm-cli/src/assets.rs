//! Embedded source-code disk.
//!
//! Some distributions ship with a read-only source-code VHDX packaged
//! into the binary as a zip. When the feature is enabled and the disk
//! is missing from the image directory, it is extracted on `run`.

use anyhow::Result;
use std::path::Path;

#[cfg(feature = "bundled-sourcecode")]
pub fn setup_source_code_disk(image_dir: &Path) -> Result<()> {
    use anyhow::Context;
    use ovm_core::manifest::SOURCECODE_DISK;

    static ARCHIVE: &[u8] = include_bytes!("../assets/sourcecode.vhdx.zip");

    if image_dir.join(SOURCECODE_DISK).exists() {
        tracing::info!("Source code disk already exists");
        return Ok(());
    }

    tracing::info!("Extracting bundled source code disk");
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(ARCHIVE))
        .context("failed to open embedded zip")?;
    archive
        .extract(image_dir)
        .context("failed to extract source code disk")?;

    Ok(())
}

#[cfg(not(feature = "bundled-sourcecode"))]
pub fn setup_source_code_disk(_image_dir: &Path) -> Result<()> {
    tracing::debug!("No bundled source code disk in this build");
    Ok(())
}
