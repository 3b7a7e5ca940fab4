//! The on-disk version manifest and layer reconciliation model.
//!
//! `versions.json` declares which `rootfs` and `data` layer identities
//! are currently materialised in the image directory. Comparing it
//! with the configured versions decides what the updater replaces.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest file name inside the image directory.
pub const MANIFEST_FILE: &str = "versions.json";
/// WSL-managed rootfs disk.
pub const ROOTFS_DISK: &str = "ext4.vhdx";
/// Mutable user-data disk.
pub const DATA_DISK: &str = "data.vhdx";
/// Optional embedded source-code disk.
pub const SOURCECODE_DISK: &str = "sourcecode.vhdx";
/// Sentinel for `data` forcing re-provisioning on the next run.
pub const DATA_RESET_SENTINEL: &str = "RESET";

/// Declared layer identities. Values are opaque; only equality matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    /// Rootfs layer identity.
    pub rootfs: String,
    /// Data layer identity.
    pub data: String,
}

impl Versions {
    /// Parses the CLI `--versions` value (`rootfs=…,data=…`).
    ///
    /// Unknown keys are ignored; both known keys are required.
    pub fn parse(value: &str) -> Result<Self> {
        let mut rootfs = None;
        let mut data = None;

        for pair in value.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rootfs" => rootfs = Some(value.trim().to_string()),
                "data" => data = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let rootfs = rootfs
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::config("need rootfs in versions"))?;
        let data = data
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::config("need data in versions"))?;

        Ok(Self { rootfs, data })
    }
}

/// Which layers must be replaced to match the configured versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleLayers {
    /// The rootfs layer needs replacement.
    pub rootfs: bool,
    /// The data layer needs replacement.
    pub data: bool,
}

impl StaleLayers {
    /// Whether nothing needs replacement.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.rootfs && !self.data
    }
}

/// Handle over an image directory's manifest.
#[derive(Debug)]
pub struct Manifest {
    image_dir: PathBuf,
    configured: Versions,
}

impl Manifest {
    /// Creates a manifest handle for `image_dir`.
    #[must_use]
    pub fn new(image_dir: impl Into<PathBuf>, configured: Versions) -> Self {
        Self {
            image_dir: image_dir.into(),
            configured,
        }
    }

    /// Path of the manifest file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.image_dir.join(MANIFEST_FILE)
    }

    /// Computes the stale set.
    ///
    /// A missing manifest marks both layers stale. A malformed one is
    /// deleted and marks both stale. A declared layer is additionally
    /// stale when its backing disk file is gone.
    #[must_use]
    pub fn stale_layers(&self) -> StaleLayers {
        let mut stale = match self.read_declared() {
            Some(declared) => StaleLayers {
                rootfs: declared.rootfs != self.configured.rootfs,
                data: declared.data != self.configured.data,
            },
            None => StaleLayers {
                rootfs: true,
                data: true,
            },
        };

        if !self.image_dir.join(ROOTFS_DISK).exists() {
            stale.rootfs = true;
        }
        if !self.image_dir.join(DATA_DISK).exists() {
            stale.data = true;
        }

        stale
    }

    /// Persists the configured versions atomically (write + rename).
    pub fn save(&self) -> Result<()> {
        let path = self.path();
        let tmp = path.with_extension("json.tmp");

        let data = serde_json::to_vec(&self.configured)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;

        Ok(())
    }

    fn read_declared(&self) -> Option<Versions> {
        let path = self.path();
        let raw = std::fs::read(&path).ok()?;

        match serde_json::from_slice(&raw) {
            Ok(declared) => Some(declared),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Malformed versions manifest, removing: {e}");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }
}

/// Rewrites the manifest at `path` with `data` set to the reset
/// sentinel so the next run re-provisions the data disk. Any failure
/// removes the file, which also forces re-provisioning.
pub fn write_data_reset(path: &Path) {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to read versions manifest: {e}");
            let _ = std::fs::remove_file(path);
            return;
        }
    };

    let mut declared: Versions = match serde_json::from_slice(&raw) {
        Ok(declared) => declared,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to parse versions manifest: {e}");
            let _ = std::fs::remove_file(path);
            return;
        }
    };

    declared.data = DATA_RESET_SENTINEL.to_string();

    let serialized = match serde_json::to_vec(&declared) {
        Ok(serialized) => serialized,
        Err(e) => {
            tracing::warn!("Failed to serialize versions manifest: {e}");
            let _ = std::fs::remove_file(path);
            return;
        }
    };

    if let Err(e) = std::fs::write(path, serialized) {
        tracing::warn!(path = %path.display(), "Failed to write versions manifest: {e}");
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(rootfs: &str, data: &str) -> Versions {
        Versions {
            rootfs: rootfs.to_string(),
            data: data.to_string(),
        }
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn parse_versions_roundtrip() {
        let v = Versions::parse("rootfs=v10,data=v2").unwrap();
        assert_eq!(v, versions("v10", "v2"));

        // Whitespace and unknown keys are tolerated.
        let v = Versions::parse(" data = v2 , rootfs = v10 , extra = 1 ").unwrap();
        assert_eq!(v, versions("v10", "v2"));
    }

    #[test]
    fn parse_versions_requires_both_layers() {
        assert!(Versions::parse("rootfs=v10").is_err());
        assert!(Versions::parse("data=v2").is_err());
        assert!(Versions::parse("rootfs=,data=v2").is_err());
    }

    #[test]
    fn missing_manifest_marks_both_stale() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::new(dir.path(), versions("v1", "v1"));

        let stale = manifest.stale_layers();
        assert!(stale.rootfs);
        assert!(stale.data);
    }

    #[test]
    fn malformed_manifest_is_deleted_and_both_stale() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();

        let manifest = Manifest::new(dir.path(), versions("v1", "v1"));
        let stale = manifest.stale_layers();

        assert!(stale.rootfs && stale.data);
        assert!(!dir.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn matching_manifest_with_disks_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ROOTFS_DISK);
        touch(dir.path(), DATA_DISK);

        let manifest = Manifest::new(dir.path(), versions("v1", "v2"));
        manifest.save().unwrap();

        assert!(manifest.stale_layers().is_empty());
    }

    #[test]
    fn missing_disk_forces_its_layer() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ROOTFS_DISK);

        let manifest = Manifest::new(dir.path(), versions("v1", "v2"));
        manifest.save().unwrap();

        let stale = manifest.stale_layers();
        assert!(!stale.rootfs);
        assert!(stale.data);
    }

    #[test]
    fn version_bump_marks_only_that_layer() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ROOTFS_DISK);
        touch(dir.path(), DATA_DISK);

        Manifest::new(dir.path(), versions("v1", "v1")).save().unwrap();

        let stale = Manifest::new(dir.path(), versions("v1", "v2")).stale_layers();
        assert!(!stale.rootfs);
        assert!(stale.data);
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::new(dir.path(), versions("a", "b"));
        manifest.save().unwrap();

        let raw = std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap();
        let declared: Versions = serde_json::from_slice(&raw).unwrap();
        assert_eq!(declared, versions("a", "b"));
    }

    #[test]
    fn data_reset_rewrites_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        Manifest::new(dir.path(), versions("v1", "v1")).save().unwrap();

        write_data_reset(&path);

        let declared: Versions = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(declared.rootfs, "v1");
        assert_eq!(declared.data, DATA_RESET_SENTINEL);
    }

    #[test]
    fn data_reset_removes_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        std::fs::write(&path, b"garbage").unwrap();

        write_data_reset(&path);
        assert!(!path.exists());
    }
}
