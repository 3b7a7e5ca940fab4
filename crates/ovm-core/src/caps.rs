//! Capability flags gating the REST control surface.
//!
//! The orchestrator sets a flag only after emitting the paired
//! front-end event; the matching REST handler refuses with 403 while
//! the flag is down and clears it once the gated action succeeds.

use std::sync::atomic::{AtomicBool, Ordering};

/// Mutable orchestrator state shared with the REST handlers.
#[derive(Debug, Default)]
pub struct Capabilities {
    reboot: AtomicBool,
    enable_feature: AtomicBool,
    update_wsl: AtomicBool,
    fix_wsl_config: AtomicBool,
    stopped_with_api: AtomicBool,
}

impl Capabilities {
    /// Creates all-cleared capabilities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `/reboot` is currently authorized.
    #[must_use]
    pub fn can_reboot(&self) -> bool {
        self.reboot.load(Ordering::SeqCst)
    }

    /// Authorizes or revokes `/reboot`.
    pub fn set_can_reboot(&self, allowed: bool) {
        self.reboot.store(allowed, Ordering::SeqCst);
    }

    /// Whether `/enable-feature` is currently authorized.
    #[must_use]
    pub fn can_enable_feature(&self) -> bool {
        self.enable_feature.load(Ordering::SeqCst)
    }

    /// Authorizes or revokes `/enable-feature`.
    pub fn set_can_enable_feature(&self, allowed: bool) {
        self.enable_feature.store(allowed, Ordering::SeqCst);
    }

    /// Whether `/update-wsl` is currently authorized.
    #[must_use]
    pub fn can_update_wsl(&self) -> bool {
        self.update_wsl.load(Ordering::SeqCst)
    }

    /// Authorizes or revokes `/update-wsl`.
    pub fn set_can_update_wsl(&self, allowed: bool) {
        self.update_wsl.store(allowed, Ordering::SeqCst);
    }

    /// Whether `/fix-wsl-config` is currently authorized.
    #[must_use]
    pub fn can_fix_wsl_config(&self) -> bool {
        self.fix_wsl_config.load(Ordering::SeqCst)
    }

    /// Authorizes or revokes `/fix-wsl-config`.
    pub fn set_can_fix_wsl_config(&self, allowed: bool) {
        self.fix_wsl_config.store(allowed, Ordering::SeqCst);
    }

    /// Whether a stop came in through the control API.
    #[must_use]
    pub fn stopped_with_api(&self) -> bool {
        self.stopped_with_api.load(Ordering::SeqCst)
    }

    /// Records that a stop came in through the control API.
    pub fn set_stopped_with_api(&self) {
        self.stopped_with_api.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_cleared() {
        let caps = Capabilities::new();
        assert!(!caps.can_reboot());
        assert!(!caps.can_enable_feature());
        assert!(!caps.can_update_wsl());
        assert!(!caps.can_fix_wsl_config());
        assert!(!caps.stopped_with_api());
    }

    #[test]
    fn set_and_clear() {
        let caps = Capabilities::new();
        caps.set_can_update_wsl(true);
        assert!(caps.can_update_wsl());
        caps.set_can_update_wsl(false);
        assert!(!caps.can_update_wsl());
    }
}
