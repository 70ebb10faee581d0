//! Relay parameters and their validation gate
//!
//! Every `update_parameters` call builds a fresh [`RelayParameters`] through
//! [`ParameterValidator::validate`]. Validation is fail-fast: the first
//! violated rule decides the error, and nothing is committed on failure.

use crate::environment::Environment;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Minimum accepted encryption key length, in bytes
pub const MIN_KEY_BYTES: usize = 8;

/// Maximum filter value length, in bytes. Some handsets accept 14 or 16 bytes
/// of advertisement payload, 10 fits all of them.
pub const MAX_FILTER_BYTES: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("BLE is not supported on this platform")]
    UnsupportedPlatform,
    #[error("Bluetooth is disabled")]
    BluetoothDisabled,
    #[error("Location service is disabled")]
    LocationServiceDisabled,
    #[error("Location permission denied")]
    LocationPermissionDenied,
}

/// Configured relay role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayMode {
    /// Scan and connect only
    CentralOnly,
    /// Advertise only
    PeripheralOnly,
    /// Scan and advertise
    Both,
}

impl RelayMode {
    /// Integer code used by platform callers
    pub fn code(self) -> i32 {
        match self {
            RelayMode::CentralOnly => 1,
            RelayMode::PeripheralOnly => 2,
            RelayMode::Both => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(RelayMode::CentralOnly),
            2 => Some(RelayMode::PeripheralOnly),
            3 => Some(RelayMode::Both),
            _ => None,
        }
    }

    pub fn scans(self) -> bool {
        matches!(self, RelayMode::CentralOnly | RelayMode::Both)
    }

    pub fn advertises(self) -> bool {
        matches!(self, RelayMode::PeripheralOnly | RelayMode::Both)
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::CentralOnly => write!(f, "CentralOnly"),
            RelayMode::PeripheralOnly => write!(f, "PeripheralOnly"),
            RelayMode::Both => write!(f, "Both"),
        }
    }
}

/// Validated, normalized relay parameters
#[derive(Clone, PartialEq, Eq)]
pub struct RelayParameters {
    pub mode: RelayMode,
    pub filter_value: Vec<u8>,
    encryption_key: Zeroizing<Vec<u8>>,
}

impl RelayParameters {
    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }
}

impl fmt::Debug for RelayParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayParameters")
            .field("mode", &self.mode)
            .field("filter_value", &String::from_utf8_lossy(&self.filter_value))
            .field("encryption_key", &format_args!("<{} bytes>", self.encryption_key.len()))
            .finish()
    }
}

/// What a successful update changes relative to the committed parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChange {
    /// Configured mode differs (or nothing was committed yet): full restart
    ModeChanged,
    /// Same mode, new filter value: restart advertising only
    FilterChanged,
    /// Only the key differs: picked up by the next relay, no restart
    KeyChanged,
    Unchanged,
}

impl ParameterChange {
    pub fn between(committed: Option<&RelayParameters>, next: &RelayParameters) -> Self {
        let Some(committed) = committed else {
            return ParameterChange::ModeChanged;
        };

        if committed.mode != next.mode {
            ParameterChange::ModeChanged
        } else if committed.filter_value != next.filter_value {
            ParameterChange::FilterChanged
        } else if committed.encryption_key != next.encryption_key {
            ParameterChange::KeyChanged
        } else {
            ParameterChange::Unchanged
        }
    }
}

/// Stateless validation gate holding only the fallback key
pub struct ParameterValidator {
    default_key: Zeroizing<Vec<u8>>,
}

impl ParameterValidator {
    pub fn new(default_key: &str) -> Self {
        Self {
            default_key: Zeroizing::new(default_key.as_bytes().to_vec()),
        }
    }

    /// Key used when the caller supplies none
    pub fn default_key(&self) -> &[u8] {
        &self.default_key
    }

    /// Validate raw caller input against the rules and the live environment.
    ///
    /// Order matters: argument checks first, then platform capability, radio
    /// power, location service and finally location permission.
    pub fn validate(
        &self,
        mode_code: i32,
        filter_value: &str,
        encryption_key: Option<&str>,
        env: &dyn Environment,
    ) -> Result<RelayParameters, ValidationError> {
        let mode = RelayMode::from_code(mode_code).ok_or_else(|| {
            ValidationError::InvalidParameter(format!("unknown relay mode {}", mode_code))
        })?;

        let key = match encryption_key {
            Some(key) => Zeroizing::new(key.as_bytes().to_vec()),
            None => self.default_key.clone(),
        };
        if key.len() < MIN_KEY_BYTES {
            return Err(ValidationError::InvalidParameter(format!(
                "encryption key must be at least {} bytes, got {}",
                MIN_KEY_BYTES,
                key.len()
            )));
        }

        let filter = filter_value.as_bytes();
        if filter.len() > MAX_FILTER_BYTES {
            return Err(ValidationError::InvalidParameter(format!(
                "filter value must be at most {} bytes, got {}",
                MAX_FILTER_BYTES,
                filter.len()
            )));
        }

        if !env.supports_ble() {
            return Err(ValidationError::UnsupportedPlatform);
        }
        if !env.is_bluetooth_enabled() {
            return Err(ValidationError::BluetoothDisabled);
        }
        if !env.is_location_enabled() {
            return Err(ValidationError::LocationServiceDisabled);
        }
        if !env.has_location_permission() {
            return Err(ValidationError::LocationPermissionDenied);
        }

        Ok(RelayParameters {
            mode,
            filter_value: filter.to_vec(),
            encryption_key: key,
        })
    }
}
