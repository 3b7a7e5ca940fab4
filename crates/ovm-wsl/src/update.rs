//! WSL runtime (MSI) update.
//!
//! Fetches the published release manifest, downloads the installer
//! into the local cache with SHA-256 verification, and runs `msiexec`
//! elevated.

use crate::error::{Result, WslError};
use futures_util::StreamExt;
use ovm_core::{Capabilities, EventName, Notifier};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Published WSL MSI release manifest.
const LATEST_URL: &str = "https://static.oomol.com/wsl-msi/latest.json";

/// Manifest fetch budget.
const FETCH_TIMEOUT: Duration = Duration::from_secs(6);

/// Download retry policy: bounded attempts with exponential backoff.
const DOWNLOAD_ATTEMPTS: u32 = 3;
const DOWNLOAD_BACKOFF: Duration = Duration::from_millis(500);

/// One architecture's installer entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseItem {
    /// Download URL.
    pub url: String,
    /// Lowercase hex SHA-256 of the installer.
    pub sha256: String,
    /// Installer size in bytes.
    pub size: i64,
}

/// The published release manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Latest {
    /// Release version.
    pub version: String,
    /// x86-64 installer.
    pub x64: ReleaseItem,
    /// ARM64 installer.
    pub arm64: ReleaseItem,
}

impl Latest {
    /// The installer matching this host's architecture.
    #[must_use]
    pub fn for_host(&self) -> &ReleaseItem {
        if cfg!(target_arch = "aarch64") {
            &self.arm64
        } else {
            &self.x64
        }
    }
}

/// Shared context for the runtime-update flow.
pub struct UpdateCtx<'a> {
    /// Event notifier.
    pub notifier: &'a Notifier,
    /// Capability flags.
    pub caps: &'a Capabilities,
    /// Log directory for the msiexec log.
    pub log_dir: &'a Path,
    /// VM name, used in log file names.
    pub name: &'a str,
}

/// Updates the WSL runtime. Emits the `UpdatingWSL` pair and clears
/// `CanUpdateWSL` on success.
pub async fn update(ctx: &UpdateCtx<'_>) -> Result<()> {
    ctx.notifier.notify(EventName::UpdatingWSL);

    match run_update(ctx).await {
        Ok(()) => {
            ctx.caps.set_can_update_wsl(false);
            ctx.notifier.notify(EventName::UpdateWSLSuccess);
            Ok(())
        }
        Err(e) => {
            ctx.notifier.notify(EventName::UpdateWSLFailed);
            Err(e)
        }
    }
}

async fn run_update(ctx: &UpdateCtx<'_>) -> Result<()> {
    tracing::info!("Checking the latest WSL release");
    let latest = fetch_latest().await?;
    tracing::info!(version = %latest.version, "Latest WSL release");

    let cache = ovm_core::path::cache_dir()
        .ok_or_else(|| WslError::setup("cannot resolve cache path"))?;
    std::fs::create_dir_all(&cache)?;

    let msi = cache.join("wsl2.msi");
    let item = latest.for_host();

    download_with_retry(&item.url, &msi, &item.sha256).await?;

    let msi_log = ovm_core::logging::create_aux_log(ctx.log_dir, &format!("{}-update-wsl", ctx.name))?;

    tracing::info!(msi = %msi.display(), "Installing WSL runtime");
    let msiexec_args = vec![
        "/i".to_string(),
        msi.to_string_lossy().into_owned(),
        "/passive".to_string(),
        "/norestart".to_string(),
        "/L*V".to_string(),
        msi_log.to_string_lossy().into_owned(),
    ];

    // msiexec runs elevated and is waited on synchronously.
    tokio::task::spawn_blocking(move || ovm_win32::elevation::run_elevated("msiexec", &msiexec_args))
        .await
        .map_err(|e| WslError::setup(format!("installer task failed: {e}")))?
        .map_err(|e| WslError::setup(format!("failed to install WSL runtime: {e}")))?;

    Ok(())
}

/// Fetches the release manifest, bypassing intermediary caches.
async fn fetch_latest() -> Result<Latest> {
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;

    let response = client
        .get(LATEST_URL)
        .header("Cache-Control", "no-cache")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(WslError::setup(format!(
            "release manifest fetch returned {}",
            response.status()
        )));
    }

    Ok(response.json().await?)
}

async fn download_with_retry(url: &str, dest: &Path, sha256: &str) -> Result<()> {
    let mut backoff = DOWNLOAD_BACKOFF;
    let mut last_err = None;

    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match download_verified(url, dest, sha256).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, "WSL download failed, retrying: {e}");
                last_err = Some(e);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| WslError::setup("download failed")))
}

/// Downloads `url` to `dest`, verified against `sha256`.
///
/// An existing file with the right hash is kept; a leftover `.tmp`
/// with the right hash is renamed into place; otherwise the body is
/// streamed to the `.tmp` sibling and renamed on success.
pub(crate) async fn download_verified(url: &str, dest: &Path, sha256: &str) -> Result<()> {
    if let Some(hash) = file_sha256(dest).await {
        if hash == sha256 {
            tracing::info!("Installer already downloaded, skipping");
            return Ok(());
        }
        tracing::info!(expected = sha256, actual = %hash, "Cached installer hash mismatch");
    }

    let tmp = tmp_path(dest);
    if let Some(hash) = file_sha256(&tmp).await {
        if hash == sha256 {
            tracing::info!("Temp installer already downloaded, renaming");
            std::fs::rename(&tmp, dest)?;
            return Ok(());
        }
    }

    let client = reqwest::Client::new();

    let head = client.head(url).send().await?;
    let total = head.content_length().unwrap_or(0);
    tracing::info!(url, total, "Downloading installer");

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(WslError::setup(format!(
            "download returned {}",
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(&tmp).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    use tokio::io::AsyncWriteExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tracing::info!(downloaded, "Download finished");

    let hash = file_sha256(&tmp)
        .await
        .ok_or_else(|| WslError::setup("downloaded file vanished"))?;
    if hash != sha256 {
        let _ = std::fs::remove_file(&tmp);
        return Err(WslError::setup(format!(
            "checksum mismatch: expected {sha256}, got {hash}"
        )));
    }

    std::fs::rename(&tmp, dest)?;
    Ok(())
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Streams a file through SHA-256 off the async runtime.
async fn file_sha256(path: &Path) -> Option<String> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path).ok()?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];

        loop {
            let n = file.read(&mut buf).ok()?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Some(hex_encode(&hasher.finalize()))
    })
    .await
    .ok()
    .flatten()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_parses() {
        let raw = r#"{
            "version": "2.3.24",
            "x64": {"url": "https://example.com/x64.msi", "sha256": "aa", "size": 1},
            "arm64": {"url": "https://example.com/arm64.msi", "sha256": "bb", "size": 2},
            "date": "2024-10-01"
        }"#;

        let latest: Latest = serde_json::from_str(raw).unwrap();
        assert_eq!(latest.version, "2.3.24");
        assert_eq!(latest.x64.sha256, "aa");
        assert_eq!(latest.arm64.size, 2);
    }

    #[tokio::test]
    async fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            file_sha256(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(file_sha256(&dir.path().join("absent")).await.is_none());
    }

    #[tokio::test]
    async fn matching_tmp_file_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("wsl2.msi");
        std::fs::write(dir.path().join("wsl2.msi.tmp"), b"abc").unwrap();

        download_verified(
            "http://unreachable.invalid/",
            &dest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
        assert!(!dir.path().join("wsl2.msi.tmp").exists());
    }

    #[tokio::test]
    async fn matching_dest_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("wsl2.msi");
        std::fs::write(&dest, b"abc").unwrap();

        download_verified(
            "http://unreachable.invalid/",
            &dest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        )
        .await
        .unwrap();
    }
}
