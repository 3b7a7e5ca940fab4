//! Named-pipe listener and dialer.
//!
//! The listener restricts connections with an SDDL descriptor granting
//! generic-all to SYSTEM, built-in administrators, and the current
//! user; nobody else may even connect.

use crate::Result;

/// Base SDDL: allow system/kernel components and built-in admins.
///
/// Ref: [Security Descriptor String Format] / [ACE strings] / [SID strings]
///
/// [Security Descriptor String Format]: https://learn.microsoft.com/en-us/windows/win32/secauthz/security-descriptor-string-format
/// [ACE strings]: https://learn.microsoft.com/en-us/windows/win32/secauthz/ace-strings
/// [SID strings]: https://learn.microsoft.com/en-us/windows/win32/secauthz/sid-strings
#[cfg(windows)]
const SDDL_SYS_ALL_ADM_ALL: &str = "D:P(A;;GA;;;SY)(A;;GA;;;BA)";

#[cfg(windows)]
mod imp {
    use super::*;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};
    use windows_sys::Win32::Foundation::LocalFree;
    use windows_sys::Win32::Security::Authorization::ConvertStringSecurityDescriptorToSecurityDescriptorW;
    use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;

    /// ERROR_PIPE_BUSY: all instances busy; retry shortly.
    const PIPE_BUSY: i32 = 231;

    /// A named-pipe listener that hands out connected server instances.
    pub struct PipeListener {
        path: String,
        descriptor: OwnedDescriptor,
        pending: Option<NamedPipeServer>,
    }

    /// Owns the converted security descriptor for the listener lifetime.
    struct OwnedDescriptor(*mut core::ffi::c_void);

    // The descriptor is only read by pipe creation calls.
    unsafe impl Send for OwnedDescriptor {}
    unsafe impl Sync for OwnedDescriptor {}

    impl Drop for OwnedDescriptor {
        fn drop(&mut self) {
            unsafe {
                LocalFree(self.0);
            }
        }
    }

    impl PipeListener {
        /// Creates the listener and its first pipe instance.
        pub fn bind(path: &str) -> Result<Self> {
            let descriptor = build_descriptor()?;
            let mut listener = Self {
                path: path.to_string(),
                descriptor,
                pending: None,
            };
            let first = listener.create_instance(true)?;
            listener.pending = Some(first);
            Ok(listener)
        }

        /// Waits for a client and returns the connected instance,
        /// pre-creating the next one so no connect window is lost.
        pub async fn accept(&mut self) -> Result<NamedPipeServer> {
            let server = match self.pending.take() {
                Some(s) => s,
                None => self.create_instance(false)?,
            };

            server
                .connect()
                .await
                .map_err(|e| crate::Win32Error::Api {
                    op: "ConnectNamedPipe",
                    source: e,
                })?;

            self.pending = Some(self.create_instance(false)?);
            Ok(server)
        }

        fn create_instance(&self, first: bool) -> Result<NamedPipeServer> {
            let mut attributes = SECURITY_ATTRIBUTES {
                nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: self.descriptor.0,
                bInheritHandle: 0,
            };

            let mut options = ServerOptions::new();
            options.first_pipe_instance(first);

            let server = unsafe {
                options.create_with_security_attributes_raw(
                    &self.path,
                    (&mut attributes as *mut SECURITY_ATTRIBUTES).cast(),
                )
            }
            .map_err(|e| crate::Win32Error::Api {
                op: "CreateNamedPipeW",
                source: e,
            })?;

            Ok(server)
        }
    }

    /// Converts the SDDL string (base ACEs plus the current user) into
    /// a self-relative security descriptor.
    fn build_descriptor() -> Result<OwnedDescriptor> {
        let sddl = format!("{}(A;;GA;;;{})", SDDL_SYS_ALL_ADM_ALL, current_user_sid()?);
        let wide = crate::wide::wide(&sddl);

        let mut descriptor = std::ptr::null_mut();
        let ok = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                wide.as_ptr(),
                1, // SDDL_REVISION_1
                &mut descriptor,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(crate::Win32Error::last_error(
                "ConvertStringSecurityDescriptorToSecurityDescriptorW",
            ));
        }

        Ok(OwnedDescriptor(descriptor))
    }

    /// Returns the current process token's user SID in string form.
    fn current_user_sid() -> Result<String> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::Security::Authorization::ConvertSidToStringSidW;
        use windows_sys::Win32::Security::{GetTokenInformation, TOKEN_QUERY, TOKEN_USER, TokenUser};
        use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

        unsafe {
            let mut token = std::ptr::null_mut();
            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
                return Err(crate::Win32Error::last_error("OpenProcessToken"));
            }

            let mut len = 0u32;
            GetTokenInformation(token, TokenUser, std::ptr::null_mut(), 0, &mut len);

            let mut buf = vec![0u8; len as usize];
            let ok = GetTokenInformation(token, TokenUser, buf.as_mut_ptr().cast(), len, &mut len);
            CloseHandle(token);
            if ok == 0 {
                return Err(crate::Win32Error::last_error("GetTokenInformation"));
            }

            let user = &*buf.as_ptr().cast::<TOKEN_USER>();
            let mut sid_str = std::ptr::null_mut();
            if ConvertSidToStringSidW(user.User.Sid, &mut sid_str) == 0 {
                return Err(crate::Win32Error::last_error("ConvertSidToStringSidW"));
            }

            let mut n = 0;
            while *sid_str.add(n) != 0 {
                n += 1;
            }
            let sid = String::from_utf16_lossy(std::slice::from_raw_parts(sid_str, n));
            LocalFree(sid_str.cast());

            Ok(sid)
        }
    }

    /// Connects to a named pipe, retrying briefly while all server
    /// instances are busy.
    pub async fn connect_client(path: &str) -> Result<NamedPipeClient> {
        loop {
            match ClientOptions::new().open(path) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(PIPE_BUSY) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => {
                    return Err(crate::Win32Error::Api {
                        op: "CreateFileW",
                        source: e,
                    });
                }
            }
        }
    }
}

#[cfg(windows)]
pub use imp::{PipeListener, connect_client};

#[cfg(not(windows))]
mod imp {
    use super::*;

    /// Stub listener for non-Windows builds.
    pub struct PipeListener;

    impl PipeListener {
        pub fn bind(_path: &str) -> Result<Self> {
            Err(crate::Win32Error::unsupported("named pipe listener"))
        }
    }
}

#[cfg(not(windows))]
pub use imp::PipeListener;
