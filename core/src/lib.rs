// BLE Relay Core: dual-role relay orchestration
//
// Drives a platform Radio Service as BLE central, peripheral, or both, and
// relays short text payloads between the two roles. The radio itself lives
// behind the `radio` traits; this crate owns validation, the mode state
// machine, the bind/reconnect lifecycle and event delivery.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod environment;
pub mod facade;
pub mod logging;
pub mod machine;
pub mod params;
pub mod radio;
mod worker;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use config::{ConfigError, LogConfig, ReconnectPolicy, RelayConfig};
pub use connection::{ConnectionState, ConnectionStatus, RadioServiceConnection};
pub use dispatcher::{EventDispatcher, RelayListener};
pub use environment::{Environment, StaticEnvironment};
pub use facade::{RelayFacade, RelayStats};
pub use logging::{init_logging, LoggingGuard};
pub use machine::{ActiveMode, ModeStateMachine};
pub use params::{
    ParameterChange, ParameterValidator, RelayMode, RelayParameters, ValidationError,
    MAX_FILTER_BYTES, MIN_KEY_BYTES,
};
pub use radio::loopback::{LoopbackRadio, RecordedCommand};
pub use radio::{
    DiscoveredDevice, LinkEvent, LinkSender, RadioBinder, RadioCommand, RadioEvent,
    RadioEventSender, RadioHandle,
};

// ============================================================================
// STATUS CODES
// ============================================================================

/// Result of a facade operation as seen by platform callers.
///
/// The integer codes are stable and are what mobile bindings hand back to the
/// application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    InvalidParameter,
    UnsupportedPlatform,
    BluetoothDisabled,
    LocationServiceDisabled,
    LocationPermissionDenied,
}

impl StatusCode {
    /// Stable integer code for this status
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::InvalidParameter => -1,
            StatusCode::UnsupportedPlatform => -2,
            StatusCode::BluetoothDisabled => -3,
            StatusCode::LocationServiceDisabled => -4,
            StatusCode::LocationPermissionDenied => -5,
        }
    }

    /// Inverse of [`StatusCode::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(StatusCode::Success),
            -1 => Some(StatusCode::InvalidParameter),
            -2 => Some(StatusCode::UnsupportedPlatform),
            -3 => Some(StatusCode::BluetoothDisabled),
            -4 => Some(StatusCode::LocationServiceDisabled),
            -5 => Some(StatusCode::LocationPermissionDenied),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// Short human-readable description, suitable for a status line
    pub fn description(self) -> &'static str {
        match self {
            StatusCode::Success => "ok",
            StatusCode::InvalidParameter => "invalid parameter",
            StatusCode::UnsupportedPlatform => "BLE is not supported on this platform",
            StatusCode::BluetoothDisabled => "Bluetooth is turned off",
            StatusCode::LocationServiceDisabled => "location service is disabled",
            StatusCode::LocationPermissionDenied => "location permission not granted",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

impl From<&ValidationError> for StatusCode {
    fn from(err: &ValidationError) -> Self {
        match err {
            ValidationError::InvalidParameter(_) => StatusCode::InvalidParameter,
            ValidationError::UnsupportedPlatform => StatusCode::UnsupportedPlatform,
            ValidationError::BluetoothDisabled => StatusCode::BluetoothDisabled,
            ValidationError::LocationServiceDisabled => StatusCode::LocationServiceDisabled,
            ValidationError::LocationPermissionDenied => StatusCode::LocationPermissionDenied,
        }
    }
}

impl<T> From<Result<T, ValidationError>> for StatusCode {
    fn from(result: Result<T, ValidationError>) -> Self {
        match result {
            Ok(_) => StatusCode::Success,
            Err(ref e) => StatusCode::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        let all = [
            StatusCode::Success,
            StatusCode::InvalidParameter,
            StatusCode::UnsupportedPlatform,
            StatusCode::BluetoothDisabled,
            StatusCode::LocationServiceDisabled,
            StatusCode::LocationPermissionDenied,
        ];

        for status in all {
            assert_eq!(StatusCode::from_code(status.code()), Some(status));
        }
        assert_eq!(StatusCode::Success.code(), 0);
        assert!(StatusCode::from_code(42).is_none());
    }

    #[test]
    fn test_validation_error_maps_to_status() {
        let err = ValidationError::InvalidParameter("key too short".to_string());
        assert_eq!(StatusCode::from(&err), StatusCode::InvalidParameter);
        assert_eq!(
            StatusCode::from(&ValidationError::BluetoothDisabled),
            StatusCode::BluetoothDisabled
        );

        let ok: Result<(), ValidationError> = Ok(());
        assert!(StatusCode::from(ok).is_success());
    }
}
