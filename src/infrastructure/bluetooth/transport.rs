//! BLE Transport Interface
//!
//! The narrow surface a connection session needs from the platform stack:
//! open a link, ask for service discovery, write without response and close.
//! Link state changes come back as [`TransportEvent`]s on the channel
//! returned by [`LinkTransport::open`].

use crate::domain::models::PeerDescriptor;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("peer {0} not found")]
    PeerNotFound(String),
    #[error("no open link")]
    NotConnected,
    #[error("characteristic {characteristic} of service {service} not found")]
    CharacteristicNotFound { service: Uuid, characteristic: Uuid },
    #[error("bluetooth error: {0}")]
    Platform(String),
}

/// A GATT service reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl DiscoveredService {
    pub fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.characteristics.contains(&uuid)
    }
}

/// Link state changes reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    ServicesDiscovered(Vec<DiscoveredService>),
    DiscoveryFailed(String),
    Disconnected,
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Start connecting to `peer`. Progress is reported on the returned channel.
    async fn open(&self, peer: &PeerDescriptor) -> Result<TransportEvents, TransportError>;

    /// Request service discovery; the result arrives as
    /// [`TransportEvent::ServicesDiscovered`] or [`TransportEvent::DiscoveryFailed`].
    async fn discover_services(&self) -> Result<(), TransportError>;

    /// Write without response. Returns once the write is handed to the stack.
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Release the link
    async fn close(&self) -> Result<(), TransportError>;
}
