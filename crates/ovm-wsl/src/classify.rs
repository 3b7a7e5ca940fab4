//! Substring classification of `wsl.exe` failures.
//!
//! The WSL CLI reports errors as unstructured English text, so the
//! controller matches known markers in the captured output. The whole
//! substring set lives in this one table; when a WSL release changes
//! its wording only this file moves. Fixtures below pin the outputs of
//! the targeted releases (2.3.24+).

/// Known failure classes in `wsl.exe` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WslFailure {
    /// `--mount` of an already-attached VHD; treated as success.
    VhdAlreadyAttached,
    /// `--unmount` of a disk that is not attached; treated as success.
    FileNotFound,
    /// The distro's files are held open; shutdown and retry.
    SharingViolation,
    /// CPU virtualization is disabled in firmware.
    HypervNotInstalled,
    /// The WSL2 runtime is required but unavailable.
    Wsl2Needed,
    /// Anything else; fatal to the current operation.
    Unknown,
}

const MARKERS: &[(&str, WslFailure)] = &[
    ("WSL_E_USER_VHD_ALREADY_ATTACHED", WslFailure::VhdAlreadyAttached),
    ("ERROR_FILE_NOT_FOUND", WslFailure::FileNotFound),
    ("ERROR_SHARING_VIOLATION", WslFailure::SharingViolation),
    ("WSL_E_DISTRO_NOT_STOPPED", WslFailure::SharingViolation),
    ("HCS_E_HYPERV_NOT_INSTALLED", WslFailure::HypervNotInstalled),
    ("WSL_E_WSL2_NEEDED", WslFailure::Wsl2Needed),
];

/// Classifies concatenated stdout/stderr output.
#[must_use]
pub fn classify(output: &str) -> WslFailure {
    for (marker, failure) in MARKERS {
        if output.contains(marker) {
            return *failure;
        }
    }
    WslFailure::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_mount_conflict() {
        let out = "The disk is already attached. \
                   Error code: Wsl/Service/WSL_E_USER_VHD_ALREADY_ATTACHED";
        assert_eq!(classify(out), WslFailure::VhdAlreadyAttached);
    }

    #[test]
    fn classifies_unmount_of_missing_disk() {
        let out = "The system cannot find the file specified. \
                   Error code: Wsl/Service/ERROR_FILE_NOT_FOUND";
        assert_eq!(classify(out), WslFailure::FileNotFound);
    }

    #[test]
    fn classifies_sharing_violations() {
        let moving = "The process cannot access the file because it is being used \
                      by another process. Error code: Wsl/Service/ERROR_SHARING_VIOLATION";
        assert_eq!(classify(moving), WslFailure::SharingViolation);

        let stopped = "The operation cannot be performed while the distribution is \
                       running. Error code: Wsl/Service/WSL_E_DISTRO_NOT_STOPPED";
        assert_eq!(classify(stopped), WslFailure::SharingViolation);
    }

    #[test]
    fn classifies_missing_hypervisor() {
        let out = "Please enable the Virtual Machine Platform Windows feature and \
                   ensure virtualization is enabled in the BIOS. \
                   Error code: Wsl/Service/CreateInstance/CreateVm/HCS_E_HYPERV_NOT_INSTALLED";
        assert_eq!(classify(out), WslFailure::HypervNotInstalled);
    }

    #[test]
    fn classifies_wsl2_needed() {
        let out = "This operation requires WSL 2. Error code: Wsl/WSL_E_WSL2_NEEDED";
        assert_eq!(classify(out), WslFailure::Wsl2Needed);
    }

    #[test]
    fn unknown_output_is_unknown() {
        assert_eq!(classify("some novel failure"), WslFailure::Unknown);
        assert_eq!(classify(""), WslFailure::Unknown);
    }
}
