//! Bluetooth Module
//!
//! Provides BLE communication with the board's LED controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionSession                      │
//! │   (link lifecycle, gates writes on the Ready state)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         │                           │
//!         ▼                           ▼
//! ┌────────────────┐          ┌──────────────┐
//! │ LinkTransport  │          │   Protocol   │
//! │                │          │              │
//! │ - BtleTransport│          │ - UUIDs      │
//! │   (btleplug)   │          │ - Frames     │
//! │ - events       │          │ - Chunking   │
//! └────────────────┘          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame encoding, checksums, color packing and chunking
//! - [`transport`] - Transport interface and link events
//! - [`connection`] - Session state machine
//! - [`btle`] - Host Bluetooth stack transport

pub mod btle;
pub mod connection;
pub mod protocol;
pub mod transport;

pub use btle::{BtleConfig, BtleTransport};
pub use connection::{ConnectionSession, SendError, SessionConfig, SessionError};
pub use protocol::{CodecError, Frame};
pub use transport::{LinkTransport, TransportError, TransportEvent};
