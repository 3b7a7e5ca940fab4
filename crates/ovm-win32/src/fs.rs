//! File copy at the Win32 contract.

use crate::Result;
use std::path::Path;

/// Copies `src` to `dst`. With `overwrite` false an existing target
/// fails the copy.
#[cfg(windows)]
pub fn copy_file(src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
    use windows_sys::Win32::Storage::FileSystem::CopyFileW;

    let src_wide = crate::wide::wide(src.as_os_str());
    let dst_wide = crate::wide::wide(dst.as_os_str());
    let fail_if_exists = i32::from(!overwrite);

    unsafe {
        if CopyFileW(src_wide.as_ptr(), dst_wide.as_ptr(), fail_if_exists) == 0 {
            return Err(crate::Win32Error::last_error("CopyFileW"));
        }
    }

    Ok(())
}

#[cfg(not(windows))]
pub fn copy_file(src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && dst.exists() {
        return Err(crate::Win32Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", dst.display()),
        )));
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_overwrites_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, b"new contents").unwrap();
        std::fs::write(&dst, b"old").unwrap();

        copy_file(&src, &dst, true).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"new contents");
    }

    #[test]
    fn copy_refuses_existing_target_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, b"data").unwrap();
        std::fs::write(&dst, b"keep").unwrap();

        assert!(copy_file(&src, &dst, false).is_err());
        assert_eq!(std::fs::read(&dst).unwrap(), b"keep");
    }
}
