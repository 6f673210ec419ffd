use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of hold mounted at a placement.
///
/// Only bolt-on holds carry an LED that the board can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoldType {
    BoltOn,
    ScrewOn,
    Unknown,
}

impl HoldType {
    /// Map a catalog placement `set_id` to a hold type
    pub fn from_set_id(set_id: i64) -> Self {
        match set_id {
            1 => Self::BoltOn,
            20 => Self::ScrewOn,
            _ => Self::Unknown,
        }
    }
}

/// One row of the hold catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldLocation {
    pub x: i32,
    pub y: i32,
    pub led_position: u16,
    pub placement_id: i64,
    pub hold_type: HoldType,
}

/// Address and color for a single LED
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedCommand {
    pub led_id: u16,
    /// 6 hex chars like "FFA07A" (no leading '#')
    pub color_hex: String,
}

impl LedCommand {
    pub fn new(led_id: u16, color_hex: impl Into<String>) -> Self {
        Self {
            led_id,
            color_hex: color_hex.into(),
        }
    }

    pub fn for_hold(hold: &HoldLocation, color_hex: &str) -> Self {
        Self::new(hold.led_position, color_hex)
    }
}

/// Snapshot of the peer a session connects to.
///
/// Handed over once at open time; the session never looks at scan results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub address: String,
    pub name: Option<String>,
}

impl PeerDescriptor {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Lifecycle of a board connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Ready,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
