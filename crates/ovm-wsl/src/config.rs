//! `.wslconfig` reader and repair.
//!
//! The file is INI-like: `[section]` headers, `key = value` pairs,
//! `#` comments, unquoted values, case-insensitive sections and keys.
//! One scanner serves every question asked of the file.

use crate::error::{Result, WslError};
use std::path::PathBuf;

/// `[wsl2]` keys known to break the managed distro.
///
/// Currently only a custom kernel. Do not broaden this without
/// guest-side verification.
pub const INCOMPATIBLE_KEYS: &[&str] = &["kernel"];

/// Handle over the user's `.wslconfig`.
#[derive(Debug)]
pub struct WslConfig {
    path: Option<PathBuf>,
}

impl WslConfig {
    /// Resolves `~/.wslconfig`; `path` is `None` when the file does
    /// not exist.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: ovm_core::path::wslconfig_path().filter(|p| p.exists()),
        }
    }

    /// Uses an explicit file, for tests.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path: path.exists().then_some(path),
        }
    }

    /// Returns the incompatible `[wsl2]` keys present in the file.
    #[must_use]
    pub fn incompatible_keys(&self) -> Vec<String> {
        INCOMPATIBLE_KEYS
            .iter()
            .filter(|key| self.find_key("wsl2", key))
            .map(|key| (*key).to_string())
            .collect()
    }

    /// Whether `section` contains `key` with a non-empty value.
    #[must_use]
    pub fn find_key(&self, section: &str, key: &str) -> bool {
        self.get_value(section, key).is_some()
    }

    /// Returns the value of `key` in `section`, if set.
    #[must_use]
    pub fn get_value(&self, section: &str, key: &str) -> Option<String> {
        let content = std::fs::read_to_string(self.path.as_ref()?).ok()?;
        scan(&content, section, key)
    }

    /// Comments out every assignment of `key`, in place.
    pub fn comment_out_key(&self, key: &str) -> Result<()> {
        let Some(ref path) = self.path else {
            tracing::info!("WSL config file not found, nothing to comment");
            return Ok(());
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| WslError::setup(format!("failed to read wslconfig: {e}")))?;

        let key_lower = key.to_lowercase();
        let rewritten: Vec<String> = content
            .lines()
            .map(|line| {
                if is_assignment_of(line, &key_lower) {
                    format!("# {line}")
                } else {
                    line.to_string()
                }
            })
            .collect();

        std::fs::write(path, rewritten.join("\n"))
            .map_err(|e| WslError::setup(format!("failed to write wslconfig: {e}")))?;

        tracing::info!(key, "Commented out wslconfig key");
        Ok(())
    }

    /// Opens the file in Notepad, detached.
    pub fn open_in_editor(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            tracing::info!("WSL config file not found, nothing to open");
            return Ok(());
        };

        let notepad = ovm_core::path::system32().join("notepad.exe");
        let notepad = if notepad.exists() {
            notepad
        } else {
            PathBuf::from("notepad")
        };

        crate::invoke::silent_command(&notepad, &[&path.to_string_lossy()])
            .spawn()
            .map_err(|e| WslError::setup(format!("failed to open wslconfig: {e}")))?;

        Ok(())
    }
}

impl Default for WslConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the compatibility gate is silenced for `name`.
#[must_use]
pub fn skip_marker_exists(name: &str) -> bool {
    ovm_core::path::wslconfig_skip_marker(name).is_some_and(|p| p.exists())
}

/// Silences the compatibility gate for `name`. Idempotent.
pub fn write_skip_marker(name: &str) -> Result<()> {
    let marker = ovm_core::path::wslconfig_skip_marker(name)
        .ok_or_else(|| WslError::setup("cannot resolve user config dir"))?;

    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&marker, b"")?;

    tracing::info!(marker = %marker.display(), "Wrote wslconfig skip marker");
    Ok(())
}

/// Scans INI-like content for `key` inside `[section]`.
fn scan(content: &str, section: &str, key: &str) -> Option<String> {
    let wanted_section = format!("[{}]", section.to_lowercase());
    let wanted_key = key.to_lowercase();

    let mut current_section = String::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current_section = line.to_lowercase();
            continue;
        }
        if current_section != wanted_section {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        if k.trim().to_lowercase() != wanted_key {
            continue;
        }

        let value = v.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        return Some(value.to_string());
    }

    None
}

/// Whether a line assigns `key` (already lowercased), ignoring leading
/// whitespace and case.
fn is_assignment_of(line: &str, key_lower: &str) -> bool {
    let trimmed = line.trim_start().to_lowercase();
    match trimmed.strip_prefix(key_lower) {
        Some(rest) => rest.trim_start().starts_with('='),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# global comment
[wsl2]
memory = 8GB
kernel = C:\\kernels\\bzImage
networkingMode = mirrored

[experimental]
sparseVhd = true
kernel = ignored-here-too
";

    fn write_sample(dir: &std::path::Path) -> PathBuf {
        let path = dir.join(".wslconfig");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn finds_keys_in_section() {
        let dir = tempfile::tempdir().unwrap();
        let config = WslConfig::with_path(write_sample(dir.path()));

        assert!(config.find_key("wsl2", "kernel"));
        assert!(config.find_key("WSL2", "Kernel"));
        assert!(!config.find_key("wsl2", "sparseVhd"));
        assert_eq!(
            config.get_value("wsl2", "networkingmode").as_deref(),
            Some("mirrored")
        );
    }

    #[test]
    fn missing_file_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = WslConfig::with_path(dir.path().join("absent"));
        assert!(!config.find_key("wsl2", "kernel"));
        assert!(config.incompatible_keys().is_empty());
    }

    #[test]
    fn reports_incompatible_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = WslConfig::with_path(write_sample(dir.path()));
        assert_eq!(config.incompatible_keys(), ["kernel"]);
    }

    #[test]
    fn commented_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".wslconfig");
        std::fs::write(&path, "[wsl2]\n# kernel = C:\\x\n").unwrap();

        let config = WslConfig::with_path(path);
        assert!(!config.find_key("wsl2", "kernel"));
    }

    #[test]
    fn empty_values_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".wslconfig");
        std::fs::write(&path, "[wsl2]\nkernel =\n").unwrap();

        let config = WslConfig::with_path(path);
        assert!(!config.find_key("wsl2", "kernel"));
    }

    #[test]
    fn comment_out_rewrites_every_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        WslConfig::with_path(path.clone())
            .comment_out_key("kernel")
            .unwrap();

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("# kernel = C:\\kernels\\bzImage"));
        assert!(rewritten.contains("# kernel = ignored-here-too"));
        // Untouched keys survive.
        assert!(rewritten.contains("memory = 8GB"));

        let config = WslConfig::with_path(path);
        assert!(!config.find_key("wsl2", "kernel"));
    }

    #[test]
    fn quoted_values_are_unquoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".wslconfig");
        std::fs::write(&path, "[wsl2]\nkernel = \"C:\\\\k\"\n").unwrap();

        let config = WslConfig::with_path(path);
        assert_eq!(config.get_value("wsl2", "kernel").as_deref(), Some("C:\\\\k"));
    }
}
