//! Well-known host paths.

use std::path::PathBuf;

/// `%LOCALAPPDATA%`, with the standard profile fallback.
#[must_use]
pub fn local_app_data() -> Option<PathBuf> {
    if let Some(p) = std::env::var_os("LOCALAPPDATA") {
        return Some(PathBuf::from(p));
    }
    std::env::var_os("USERPROFILE").map(|user| PathBuf::from(user).join("AppData").join("Local"))
}

/// Download cache: `%LOCALAPPDATA%\ovm\Cache`.
#[must_use]
pub fn cache_dir() -> Option<PathBuf> {
    Some(local_app_data()?.join("ovm").join("Cache"))
}

/// Per-user config: `%USERPROFILE%\.config\ovm`.
#[must_use]
pub fn user_config_dir() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".config").join("ovm"))
}

/// The user's `~/.wslconfig`.
#[must_use]
pub fn wslconfig_path() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".wslconfig"))
}

/// Marker file silencing the `.wslconfig` compatibility gate.
#[must_use]
pub fn wslconfig_skip_marker(name: &str) -> Option<PathBuf> {
    Some(user_config_dir()?.join(format!("{name}_check-wslconfig.skip")))
}

/// `%ProgramFiles%`.
#[must_use]
pub fn program_files() -> PathBuf {
    std::env::var_os("ProgramFiles")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"))
}

/// `%SystemRoot%\System32`.
#[must_use]
pub fn system32() -> PathBuf {
    std::env::var_os("SystemRoot")
        .map(|root| PathBuf::from(root).join("System32"))
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows\System32"))
}

/// Maps a host path into the guest mount namespace.
///
/// `C:\Users\a\file.txt` becomes `/mnt/c/Users/a/file.txt`. Forward
/// direction only; the guest never hands paths back.
#[must_use]
pub fn host_path_to_wsl(path: &str) -> String {
    if path.len() < 3 || path.as_bytes()[1] != b':' {
        return path.replace('\\', "/");
    }

    let drive = path[..1].to_ascii_lowercase();
    let rest = path[2..].replace('\\', "/");
    format!("/mnt/{drive}{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_path_conversion() {
        assert_eq!(host_path_to_wsl(r"C:\a\b.txt"), "/mnt/c/a/b.txt");
        assert_eq!(
            host_path_to_wsl(r"D:\Users\bh\test.txt"),
            "/mnt/d/Users/bh/test.txt"
        );
    }

    #[test]
    fn drive_letter_is_lowercased() {
        assert_eq!(host_path_to_wsl(r"X:\data"), "/mnt/x/data");
    }

    #[test]
    fn skip_marker_carries_name() {
        if let Some(marker) = wslconfig_skip_marker("alpha") {
            assert!(marker.ends_with("alpha_check-wslconfig.skip"));
        }
    }
}
