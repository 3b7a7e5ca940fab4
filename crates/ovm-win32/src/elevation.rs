//! Elevation broker: admin detection, elevated-child recognition and
//! the `runas` relaunch used for admin-only work.

use crate::{Result, Win32Error};

/// Returns `true` when the current process token is elevated.
#[cfg(windows)]
#[must_use]
pub fn is_admin() -> bool {
    use std::mem;
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }

        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut len = mem::size_of::<TOKEN_ELEVATION>() as u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            (&mut elevation as *mut TOKEN_ELEVATION).cast(),
            len,
            &mut len,
        );
        CloseHandle(token);

        ok != 0 && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(windows))]
#[must_use]
pub fn is_admin() -> bool {
    false
}

/// Returns the image path of the parent process.
#[cfg(windows)]
pub fn parent_executable() -> Result<std::path::PathBuf> {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
        QueryFullProcessImageNameW,
    };

    let ppid = parent_pid()?;

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, ppid);
        if handle.is_null() {
            return Err(Win32Error::last_error("OpenProcess"));
        }

        let mut buf = [0u16; 1024];
        let mut size = buf.len() as u32;
        let ok = QueryFullProcessImageNameW(handle, PROCESS_NAME_WIN32, buf.as_mut_ptr(), &mut size);
        CloseHandle(handle);

        if ok == 0 {
            return Err(Win32Error::last_error("QueryFullProcessImageNameW"));
        }

        Ok(std::path::PathBuf::from(crate::wide::from_wide(&buf)))
    }
}

#[cfg(not(windows))]
pub fn parent_executable() -> Result<std::path::PathBuf> {
    Err(Win32Error::unsupported("parent_executable"))
}

/// Finds the parent PID by walking the process snapshot.
#[cfg(windows)]
fn parent_pid() -> Result<u32> {
    use std::mem;
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };

    let pid = std::process::id();

    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
        if snapshot == INVALID_HANDLE_VALUE {
            return Err(Win32Error::last_error("CreateToolhelp32Snapshot"));
        }

        let mut entry: PROCESSENTRY32W = mem::zeroed();
        entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

        let mut found = None;
        if Process32FirstW(snapshot, &mut entry) != 0 {
            loop {
                if entry.th32ProcessID == pid {
                    found = Some(entry.th32ParentProcessID);
                    break;
                }
                if Process32NextW(snapshot, &mut entry) == 0 {
                    break;
                }
            }
        }
        CloseHandle(snapshot);

        found.ok_or_else(|| {
            Win32Error::Api {
                op: "Process32FirstW",
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "current process not in snapshot",
                ),
            }
        })
    }
}

/// Reports whether this process is an elevated copy of itself launched
/// through [`relaunch_elevated_wait`].
///
/// Recognition is by parent-executable-path equality, which is a weak
/// heuristic: any elevated process whose parent happens to be the same
/// image is misclassified. Kept because the parent has no better
/// channel to mark the child before it starts.
#[cfg(windows)]
pub fn is_elevated_child() -> Result<bool> {
    if !is_admin() {
        return Ok(false);
    }

    let parent = parent_executable()?;
    let own = std::env::current_exe()?;
    Ok(parent == own)
}

#[cfg(not(windows))]
pub fn is_elevated_child() -> Result<bool> {
    Ok(false)
}

/// Quotes a single argument for the Windows command line.
///
/// Follows the CommandLineToArgvW convention: backslashes are literal
/// unless they precede a quote, quotes are backslash-escaped, and the
/// whole argument is quoted when it contains whitespace or is empty.
#[must_use]
pub fn escape_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote must be doubled, plus one
                // to escape the quote itself.
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                backslashes = 0;
                out.push('"');
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                backslashes = 0;
                out.push(c);
            }
        }
    }
    // Backslashes before the closing quote must also be doubled.
    out.extend(std::iter::repeat('\\').take(backslashes * 2));
    out.push('"');
    out
}

/// Joins arguments into an escaped command-line tail.
#[must_use]
pub fn escape_args(args: &[String]) -> String {
    args.iter()
        .map(|a| escape_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Relaunches the current executable elevated with the same arguments
/// and blocks until the child exits.
pub fn relaunch_elevated_wait() -> Result<()> {
    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    run_elevated(&exe.to_string_lossy(), &args)
}

/// Launches `program` elevated via ShellExecuteEx with the `runas`
/// verb, hidden window, and blocks until it exits. A nonzero exit code
/// is reported as [`Win32Error::ChildExit`].
#[cfg(windows)]
pub fn run_elevated(program: &str, args: &[String]) -> Result<()> {
    use std::mem;
    use windows_sys::Win32::Foundation::{CloseHandle, WAIT_OBJECT_0};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, INFINITE, WaitForSingleObject,
    };
    use windows_sys::Win32::UI::Shell::{SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW, ShellExecuteExW};
    use windows_sys::Win32::UI::WindowsAndMessaging::SW_HIDE;

    let verb = crate::wide::wide("runas");
    let file = crate::wide::wide(program);
    let params = crate::wide::wide(escape_args(args));
    let cwd = crate::wide::wide(launch_directory(program)?);

    unsafe {
        let mut info: SHELLEXECUTEINFOW = mem::zeroed();
        info.cbSize = mem::size_of::<SHELLEXECUTEINFOW>() as u32;
        info.fMask = SEE_MASK_NOCLOSEPROCESS;
        info.lpVerb = verb.as_ptr();
        info.lpFile = file.as_ptr();
        info.lpParameters = params.as_ptr();
        info.lpDirectory = cwd.as_ptr();
        info.nShow = SW_HIDE;

        if ShellExecuteExW(&mut info) == 0 {
            return Err(match shell_exec_error(info.hInstApp as usize) {
                Some(msg) => Win32Error::ShellExecute(msg),
                None => Win32Error::last_error("ShellExecuteExW"),
            });
        }

        let handle = info.hProcess;
        if handle.is_null() {
            return Err(Win32Error::last_error("ShellExecuteExW"));
        }

        let waited = WaitForSingleObject(handle, INFINITE);
        if waited != WAIT_OBJECT_0 {
            CloseHandle(handle);
            return Err(Win32Error::last_error("WaitForSingleObject"));
        }

        let mut code = 0u32;
        let ok = GetExitCodeProcess(handle, &mut code);
        CloseHandle(handle);

        if ok == 0 {
            return Err(Win32Error::last_error("GetExitCodeProcess"));
        }
        if code != 0 {
            return Err(Win32Error::ChildExit(code));
        }
    }

    Ok(())
}

#[cfg(not(windows))]
pub fn run_elevated(_program: &str, _args: &[String]) -> Result<()> {
    Err(Win32Error::unsupported("run_elevated"))
}

/// Resolves the working directory to hand to the elevated child.
///
/// When the executable lives on a UNC share the child must also get a
/// UNC working directory, otherwise its parameters are dropped.
#[cfg(windows)]
fn launch_directory(program: &str) -> Result<String> {
    let cwd = std::env::current_dir()?;
    let cwd = cwd.to_string_lossy().into_owned();

    if !is_unc(program) {
        return Ok(cwd);
    }

    match universal_name(&cwd) {
        Ok(unc) => Ok(unc),
        Err(_) => Ok(cwd),
    }
}

#[cfg(windows)]
fn is_unc(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() > 1 && (b[0] == b'\\' || b[0] == b'/') && (b[1] == b'\\' || b[1] == b'/')
}

/// Maps a local path to its UNC form via WNetGetUniversalNameW.
#[cfg(windows)]
fn universal_name(path: &str) -> Result<String> {
    use windows_sys::Win32::NetworkManagement::WNet::{
        UNIVERSAL_NAME_INFO_LEVEL, UNIVERSAL_NAME_INFOW, WNetGetUniversalNameW,
    };
    use windows_sys::Win32::Foundation::NO_ERROR;

    let local = crate::wide::wide(path);
    let mut buf = vec![0u8; 1024];
    let mut size = buf.len() as u32;

    unsafe {
        let rc = WNetGetUniversalNameW(
            local.as_ptr(),
            UNIVERSAL_NAME_INFO_LEVEL,
            buf.as_mut_ptr().cast(),
            &mut size,
        );
        if rc != NO_ERROR {
            return Err(Win32Error::Api {
                op: "WNetGetUniversalNameW",
                source: std::io::Error::from_raw_os_error(rc as i32),
            });
        }

        let info = &*buf.as_ptr().cast::<UNIVERSAL_NAME_INFOW>();
        let mut len = 0;
        while *info.lpUniversalName.add(len) != 0 {
            len += 1;
        }
        Ok(String::from_utf16_lossy(std::slice::from_raw_parts(
            info.lpUniversalName,
            len,
        )))
    }
}

/// Maps ShellExecuteEx `hInstApp` error codes to readable text.
#[cfg(windows)]
fn shell_exec_error(code: usize) -> Option<&'static str> {
    match code {
        2 => Some("file not found"),
        3 => Some("path not found"),
        5 => Some("access denied"),
        8 => Some("out of memory"),
        26 => Some("cannot share an open file"),
        27 => Some("file association information not complete"),
        28 => Some("DDE operation timed out"),
        29 => Some("DDE operation failed"),
        30 => Some("DDE operation is busy"),
        31 => Some("file association not available"),
        32 => Some("dynamic-link library not found"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_args_are_not_quoted() {
        assert_eq!(escape_arg("run"), "run");
        assert_eq!(escape_arg("--name=foo"), "--name=foo");
    }

    #[test]
    fn args_with_spaces_are_quoted() {
        assert_eq!(escape_arg("C:\\Program Files\\x"), "\"C:\\Program Files\\x\"");
        assert_eq!(escape_arg(""), "\"\"");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(escape_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn trailing_backslashes_double_before_closing_quote() {
        assert_eq!(escape_arg("dir with space\\"), "\"dir with space\\\\\"");
    }

    #[test]
    fn joined_command_line() {
        let args = vec!["--log-path".to_string(), "C:\\my logs".to_string()];
        assert_eq!(escape_args(&args), "--log-path \"C:\\my logs\"");
    }
}
