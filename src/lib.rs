//! Kilter Board Connector
//!
//! Lights climbing-board holds over BLE: builds the addressable hold grid
//! from the board catalog, encodes LED frames and delivers them through a
//! tracked connection session.

pub mod domain;
pub mod infrastructure;
pub mod lighting;

pub use domain::grid::{GridDimensions, GridError, GridIndexing, HoldGrid};
pub use domain::models::{HoldLocation, HoldType, LedCommand, PeerDescriptor, SessionState};
pub use lighting::{LightingConfig, LightingController, LightingError, LightingReport};
