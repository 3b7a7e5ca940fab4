//! Console re-attachment for the elevated child.

use crate::Result;

/// Detaches from the child's own console and attaches to the parent's,
/// so `runas`-launched output lands in the invoking terminal.
#[cfg(windows)]
pub fn attach_parent_console() -> Result<()> {
    use windows_sys::Win32::System::Console::{ATTACH_PARENT_PROCESS, AttachConsole, FreeConsole};

    unsafe {
        if FreeConsole() == 0 {
            return Err(crate::Win32Error::last_error("FreeConsole"));
        }
        if AttachConsole(ATTACH_PARENT_PROCESS) == 0 {
            return Err(crate::Win32Error::last_error("AttachConsole"));
        }
    }

    Ok(())
}

#[cfg(not(windows))]
pub fn attach_parent_console() -> Result<()> {
    Ok(())
}
