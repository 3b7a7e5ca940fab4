//! System reboot and the HKCU RunOnce relaunch hook.

use crate::Result;

/// `ExitWindowsEx` flags for a fast restart.
///
/// Ref: <https://learn.microsoft.com/en-us/windows/win32/api/winuser/nf-winuser-exitwindowsex#parameters>
#[cfg(windows)]
const REBOOT_FLAGS: u32 = {
    use windows_sys::Win32::System::Shutdown::{
        EWX_FORCEIFHUNG, EWX_HYBRID_SHUTDOWN, EWX_REBOOT, EWX_RESTARTAPPS,
    };
    EWX_HYBRID_SHUTDOWN | EWX_REBOOT | EWX_RESTARTAPPS | EWX_FORCEIFHUNG
};

/// "Application: Installation (Planned)" shutdown reason.
///
/// Ref: <https://learn.microsoft.com/en-us/windows/win32/shutdown/system-shutdown-reason-codes>
#[cfg(windows)]
const REBOOT_REASON: u32 = {
    use windows_sys::Win32::System::Shutdown::{
        SHTDN_REASON_FLAG_PLANNED, SHTDN_REASON_MAJOR_APPLICATION, SHTDN_REASON_MINOR_INSTALLATION,
    };
    SHTDN_REASON_MAJOR_APPLICATION | SHTDN_REASON_MINOR_INSTALLATION | SHTDN_REASON_FLAG_PLANNED
};

/// Reboots the system under `SeShutdownPrivilege`.
#[cfg(windows)]
pub fn reboot() -> Result<()> {
    use windows_sys::Win32::System::Shutdown::ExitWindowsEx;

    with_shutdown_privilege(|| unsafe {
        if ExitWindowsEx(REBOOT_FLAGS, REBOOT_REASON) == 0 {
            return Err(crate::Win32Error::last_error("ExitWindowsEx"));
        }
        Ok(())
    })
}

#[cfg(not(windows))]
pub fn reboot() -> Result<()> {
    Err(crate::Win32Error::unsupported("reboot"))
}

/// Enables `SeShutdownPrivilege` on the process token, runs `f`, and
/// leaves the privilege enabled (the process is about to go away).
#[cfg(windows)]
fn with_shutdown_privilege<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    use std::mem;
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::Security::{
        AdjustTokenPrivileges, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW, SE_PRIVILEGE_ENABLED,
        TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    let name = crate::wide::wide("SeShutdownPrivilege");

    unsafe {
        let mut token = std::ptr::null_mut();
        if OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        ) == 0
        {
            return Err(crate::Win32Error::last_error("OpenProcessToken"));
        }

        let mut privileges: TOKEN_PRIVILEGES = mem::zeroed();
        privileges.PrivilegeCount = 1;
        privileges.Privileges[0] = LUID_AND_ATTRIBUTES {
            Luid: mem::zeroed(),
            Attributes: SE_PRIVILEGE_ENABLED,
        };

        if LookupPrivilegeValueW(
            std::ptr::null(),
            name.as_ptr(),
            &mut privileges.Privileges[0].Luid,
        ) == 0
        {
            CloseHandle(token);
            return Err(crate::Win32Error::last_error("LookupPrivilegeValueW"));
        }

        let adjusted = AdjustTokenPrivileges(
            token,
            0,
            &privileges,
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        );
        CloseHandle(token);

        if adjusted == 0 {
            return Err(crate::Win32Error::last_error("AdjustTokenPrivileges"));
        }
    }

    f()
}

#[cfg(windows)]
const RUN_ONCE_PATH: &str = r"Software\Microsoft\Windows\CurrentVersion\RunOnce";

/// Registers `command` to run once after the next logon, under an
/// expand-string value named after the VM. Modifying HKCU needs no
/// administrator privileges.
#[cfg(windows)]
pub fn set_run_once(value_name: &str, command: &str) -> Result<()> {
    use windows_sys::Win32::System::Registry::{
        HKEY_CURRENT_USER, KEY_SET_VALUE, REG_EXPAND_SZ, RegCloseKey, RegCreateKeyExW,
        RegSetValueExW,
    };

    let path = crate::wide::wide(RUN_ONCE_PATH);
    let name = crate::wide::wide(value_name);
    let data = crate::wide::wide(command);

    unsafe {
        let mut key = std::ptr::null_mut();
        let rc = RegCreateKeyExW(
            HKEY_CURRENT_USER,
            path.as_ptr(),
            0,
            std::ptr::null(),
            0,
            KEY_SET_VALUE,
            std::ptr::null(),
            &mut key,
            std::ptr::null_mut(),
        );
        if rc != 0 {
            return Err(crate::Win32Error::Api {
                op: "RegCreateKeyExW",
                source: std::io::Error::from_raw_os_error(rc as i32),
            });
        }

        let bytes = data.len() * std::mem::size_of::<u16>();
        let rc = RegSetValueExW(
            key,
            name.as_ptr(),
            0,
            REG_EXPAND_SZ,
            data.as_ptr().cast(),
            bytes as u32,
        );
        RegCloseKey(key);

        if rc != 0 {
            return Err(crate::Win32Error::Api {
                op: "RegSetValueExW",
                source: std::io::Error::from_raw_os_error(rc as i32),
            });
        }
    }

    Ok(())
}

#[cfg(not(windows))]
pub fn set_run_once(_value_name: &str, _command: &str) -> Result<()> {
    Err(crate::Win32Error::unsupported("set_run_once"))
}
