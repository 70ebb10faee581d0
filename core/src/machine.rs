//! Dual-role mode state machine
//!
//! Scanning and advertising are tracked as two independent booleans. These
//! booleans are the desired-active intent: they survive a lost connection and
//! are replayed by [`ModeStateMachine::resume`] once a new handle is bound.

use crate::connection::RadioServiceConnection;
use crate::params::{ParameterChange, RelayParameters};
use crate::radio::RadioCommand;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Runtime mode, derived from the two intent flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveMode {
    Off,
    ScanningOnly,
    AdvertisingOnly,
    Both,
}

impl ActiveMode {
    pub fn from_flags(scanning: bool, advertising: bool) -> Self {
        match (scanning, advertising) {
            (false, false) => ActiveMode::Off,
            (true, false) => ActiveMode::ScanningOnly,
            (false, true) => ActiveMode::AdvertisingOnly,
            (true, true) => ActiveMode::Both,
        }
    }
}

impl fmt::Display for ActiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveMode::Off => write!(f, "Off"),
            ActiveMode::ScanningOnly => write!(f, "ScanningOnly"),
            ActiveMode::AdvertisingOnly => write!(f, "AdvertisingOnly"),
            ActiveMode::Both => write!(f, "Both"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ModeStateMachine {
    scanning: bool,
    advertising: bool,
}

impl ModeStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_mode(&self) -> ActiveMode {
        ActiveMode::from_flags(self.scanning, self.advertising)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Whether a reconnect should resume any activity
    pub fn desired_active(&self) -> bool {
        self.scanning || self.advertising
    }

    /// Both dimensions on; advertising is started first
    pub fn start(&mut self, conn: &RadioServiceConnection, filter_value: &[u8]) {
        self.start_advertising(conn, filter_value);
        self.start_scan(conn);
    }

    pub fn stop(&mut self, conn: &RadioServiceConnection) {
        self.stop_advertising(conn);
        self.stop_scan(conn);
    }

    pub fn start_scan(&mut self, conn: &RadioServiceConnection) {
        self.scanning = true;
        conn.issue(RadioCommand::StartScan);
    }

    pub fn stop_scan(&mut self, conn: &RadioServiceConnection) {
        self.scanning = false;
        conn.issue(RadioCommand::StopScan);
    }

    pub fn start_advertising(&mut self, conn: &RadioServiceConnection, filter_value: &[u8]) {
        self.advertising = true;
        conn.issue(RadioCommand::StartAdvertise { filter_value });
    }

    pub fn stop_advertising(&mut self, conn: &RadioServiceConnection) {
        self.advertising = false;
        conn.issue(RadioCommand::StopAdvertise);
    }

    /// Re-issue start commands for every dimension still wanted.
    ///
    /// Called after a (re)bind; the intent flags are not modified.
    pub fn resume(&self, conn: &RadioServiceConnection, filter_value: &[u8]) {
        if !self.desired_active() {
            return;
        }
        info!("Resuming relay activity: {}", self.active_mode());
        if self.advertising {
            conn.issue(RadioCommand::StartAdvertise { filter_value });
        }
        if self.scanning {
            conn.issue(RadioCommand::StartScan);
        }
    }

    /// Drive the transition for a validated parameter update
    pub fn apply(
        &mut self,
        conn: &RadioServiceConnection,
        change: ParameterChange,
        params: &RelayParameters,
    ) {
        match change {
            ParameterChange::ModeChanged => {
                info!("Relay mode set to {}, restarting", params.mode);
                self.stop(conn);
                if params.mode.advertises() {
                    self.start_advertising(conn, &params.filter_value);
                }
                if params.mode.scans() {
                    self.start_scan(conn);
                }
            }
            ParameterChange::FilterChanged => {
                if self.advertising {
                    info!("Filter value changed, restarting advertising");
                    conn.issue(RadioCommand::StopAdvertise);
                    conn.issue(RadioCommand::StartAdvertise {
                        filter_value: &params.filter_value,
                    });
                }
            }
            ParameterChange::KeyChanged | ParameterChange::Unchanged => {}
        }
    }
}
