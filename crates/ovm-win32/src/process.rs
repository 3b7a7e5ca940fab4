//! Process liveness probe for the bind-PID watchdog.

use crate::Result;

/// STILL_ACTIVE pseudo exit code.
#[cfg(windows)]
const STILL_ACTIVE: u32 = 259;

/// Reports whether a process with `pid` is still alive.
#[cfg(windows)]
pub fn process_exists(pid: u32) -> Result<bool> {
    use windows_sys::Win32::Foundation::{CloseHandle, ERROR_INVALID_PARAMETER};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            let err = std::io::Error::last_os_error();
            // No such PID looks like an invalid-parameter failure.
            if err.raw_os_error() == Some(ERROR_INVALID_PARAMETER as i32) {
                return Ok(false);
            }
            // Access denied still proves the process exists.
            return Ok(true);
        }

        let mut code = 0u32;
        let ok = GetExitCodeProcess(handle, &mut code);
        CloseHandle(handle);

        if ok == 0 {
            return Err(crate::Win32Error::last_error("GetExitCodeProcess"));
        }
        Ok(code == STILL_ACTIVE)
    }
}

#[cfg(not(windows))]
pub fn process_exists(_pid: u32) -> Result<bool> {
    Err(crate::Win32Error::unsupported("process_exists"))
}
