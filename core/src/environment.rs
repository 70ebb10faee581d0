//! Platform environment queries
//!
//! The relay never talks to the OS directly. Platform code supplies an
//! [`Environment`] that answers the four questions parameter validation needs:
//! can this device do BLE at all, is the radio on, is location enabled, and has
//! the app been granted location permission (required for scanning on mobile).

use serde::{Deserialize, Serialize};

/// Boolean capability predicates supplied by the platform layer.
///
/// Implementations must be cheap and side-effect free; they are queried on
/// every parameter update and never cached.
#[cfg_attr(test, mockall::automock)]
pub trait Environment: Send + Sync {
    /// Device has a BLE radio and an OS version that supports peripheral mode
    fn supports_ble(&self) -> bool;
    /// Bluetooth radio is currently powered on
    fn is_bluetooth_enabled(&self) -> bool;
    /// Location provider (GPS) is enabled
    fn is_location_enabled(&self) -> bool;
    /// Fine location permission has been granted
    fn has_location_permission(&self) -> bool;
}

/// Fixed environment snapshot, used by the desktop harness and by tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticEnvironment {
    pub ble_supported: bool,
    pub bluetooth_enabled: bool,
    pub location_enabled: bool,
    pub location_permission: bool,
}

impl StaticEnvironment {
    /// Everything available and granted
    pub fn ready() -> Self {
        Self {
            ble_supported: true,
            bluetooth_enabled: true,
            location_enabled: true,
            location_permission: true,
        }
    }

    pub fn with_bluetooth(mut self, enabled: bool) -> Self {
        self.bluetooth_enabled = enabled;
        self
    }

    pub fn with_location(mut self, enabled: bool) -> Self {
        self.location_enabled = enabled;
        self
    }

    pub fn with_permission(mut self, granted: bool) -> Self {
        self.location_permission = granted;
        self
    }

    pub fn with_ble_support(mut self, supported: bool) -> Self {
        self.ble_supported = supported;
        self
    }
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self::ready()
    }
}

impl Environment for StaticEnvironment {
    fn supports_ble(&self) -> bool {
        self.ble_supported
    }

    fn is_bluetooth_enabled(&self) -> bool {
        self.bluetooth_enabled
    }

    fn is_location_enabled(&self) -> bool {
        self.location_enabled
    }

    fn has_location_permission(&self) -> bool {
        self.location_permission
    }
}
