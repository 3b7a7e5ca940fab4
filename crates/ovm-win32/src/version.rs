//! OS build number probe.

use crate::Result;

/// Returns the Windows build number via `RtlGetVersion`.
///
/// `GetVersionExW` lies without a compatibility manifest; the ntdll
/// entry point reports the real build.
#[cfg(windows)]
pub fn windows_build_number() -> Result<u32> {
    use windows_sys::Win32::System::SystemInformation::OSVERSIONINFOW;

    #[link(name = "ntdll")]
    extern "system" {
        fn RtlGetVersion(version_information: *mut OSVERSIONINFOW) -> i32;
    }

    unsafe {
        let mut info: OSVERSIONINFOW = std::mem::zeroed();
        info.dwOSVersionInfoSize = std::mem::size_of::<OSVERSIONINFOW>() as u32;

        let status = RtlGetVersion(&mut info);
        if status != 0 {
            return Err(crate::Win32Error::Api {
                op: "RtlGetVersion",
                source: std::io::Error::from_raw_os_error(status),
            });
        }

        Ok(info.dwBuildNumber)
    }
}

#[cfg(not(windows))]
pub fn windows_build_number() -> Result<u32> {
    Err(crate::Win32Error::unsupported("windows_build_number"))
}
