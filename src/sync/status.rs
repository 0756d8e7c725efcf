//! Sticky device-lost flag.
//!
//! Once a submission or wait fails the device context is considered lost for
//! good. Every component sharing the status short-circuits afterwards
//! without touching hardware.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::diagnostics::{self, GH101};
use crate::error::{Error, Result};
use crate::sync::mutex::Mutex;

/// Shared loss state of one device context.
#[derive(Debug, Default)]
pub struct DeviceStatus {
    lost: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl DeviceStatus {
    /// Create a healthy status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device has been marked lost.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Fail fast if the device is lost.
    pub fn check(&self) -> Result<()> {
        if self.is_lost() {
            return Err(Error::DeviceLost(self.reason().unwrap_or_default()));
        }
        Ok(())
    }

    /// The reason recorded by the first loss, if any.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Mark the device lost and return the matching error.
    ///
    /// Only the first reason is kept; later calls return it unchanged.
    pub fn set_lost(&self, reason: impl Into<String>) -> Error {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            let reason = reason.into();
            log::error!("device lost: {}", reason);
            diagnostics::emit_with_context(&GH101, &reason);
            *slot = Some(reason);
            self.lost.store(true, Ordering::Release);
        }
        Error::DeviceLost(slot.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_status_passes() {
        let status = DeviceStatus::new();
        assert!(!status.is_lost());
        assert!(status.check().is_ok());
    }

    #[test]
    fn test_first_reason_sticks() {
        crate::diagnostics::suppress_diagnostics(true);
        let status = DeviceStatus::new();

        let err = status.set_lost("submit failed");
        assert_eq!(err, Error::DeviceLost("submit failed".to_string()));

        let err = status.set_lost("wait failed");
        assert_eq!(err, Error::DeviceLost("submit failed".to_string()));

        assert!(status.is_lost());
        assert!(status.check().unwrap_err().is_device_lost());
    }
}
