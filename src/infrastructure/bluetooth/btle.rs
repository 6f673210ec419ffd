//! btleplug Transport
//!
//! [`LinkTransport`] on top of the host Bluetooth stack.

use crate::domain::models::PeerDescriptor;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    DiscoveredService, LinkTransport, TransportError, TransportEvent, TransportEvents,
};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        TransportError::Platform(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct BtleConfig {
    /// How long to look for the peer before giving up
    pub scan_duration: Duration,
    /// Advertised service the board is filtered on
    pub service_filter: Uuid,
}

impl Default for BtleConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            service_filter: protocol::SERVICE_UUID,
        }
    }
}

struct ActiveLink {
    peripheral: Peripheral,
    events: mpsc::UnboundedSender<TransportEvent>,
    watcher: JoinHandle<()>,
}

pub struct BtleTransport {
    adapter: Adapter,
    config: BtleConfig,
    link: Mutex<Option<ActiveLink>>,
}

impl BtleTransport {
    /// Use the first Bluetooth adapter of the host
    pub async fn new(config: BtleConfig) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(TransportError::NoAdapter)?;
        Ok(Self {
            adapter,
            config,
            link: Mutex::new(None),
        })
    }

    async fn matches(peripheral: &Peripheral, peer: &PeerDescriptor) -> bool {
        if peripheral
            .address()
            .to_string()
            .eq_ignore_ascii_case(&peer.address)
        {
            return true;
        }
        let Some(name) = &peer.name else {
            return false;
        };
        matches!(
            peripheral.properties().await,
            Ok(Some(props)) if props.local_name.as_deref() == Some(name.as_str())
        )
    }

    async fn find_peripheral(&self, peer: &PeerDescriptor) -> Result<Peripheral, TransportError> {
        info!("Scanning for {} ({:?})...", peer, self.config.scan_duration);
        self.adapter
            .start_scan(ScanFilter {
                services: vec![self.config.service_filter],
            })
            .await?;

        let deadline = Instant::now() + self.config.scan_duration;
        let found = loop {
            let mut hit = None;
            for peripheral in self.adapter.peripherals().await? {
                if Self::matches(&peripheral, peer).await {
                    hit = Some(peripheral);
                    break;
                }
            }
            if hit.is_some() || Instant::now() >= deadline {
                break hit;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        found.ok_or_else(|| TransportError::PeerNotFound(peer.address.clone()))
    }

    async fn peripheral(&self) -> Result<Peripheral, TransportError> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.peripheral.clone())
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl LinkTransport for BtleTransport {
    async fn open(&self, peer: &PeerDescriptor) -> Result<TransportEvents, TransportError> {
        if let Some(old) = self.link.lock().await.take() {
            old.watcher.abort();
            let _ = old.peripheral.disconnect().await;
        }

        let peripheral = self.find_peripheral(peer).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        // Subscribe before connecting so a quick drop is not missed
        let mut central_events = self.adapter.events().await?;
        let id = peripheral.id();
        let watcher_tx = tx.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        let _ = watcher_tx.send(TransportEvent::Disconnected);
                        break;
                    }
                }
            }
        });

        if let Err(e) = peripheral.connect().await {
            watcher.abort();
            return Err(e.into());
        }
        info!("Device connected: {}", peripheral.address());
        let _ = tx.send(TransportEvent::Connected);

        *self.link.lock().await = Some(ActiveLink {
            peripheral,
            events: tx,
            watcher,
        });
        Ok(rx)
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        let peripheral = self.peripheral().await?;
        peripheral.discover_services().await?;

        let services: Vec<DiscoveredService> = peripheral
            .services()
            .into_iter()
            .map(|service| DiscoveredService {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect();
        debug!("Discovered {} services", services.len());

        if let Some(link) = self.link.lock().await.as_ref() {
            let _ = link
                .events
                .send(TransportEvent::ServicesDiscovered(services));
        }
        Ok(())
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral().await?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(TransportError::CharacteristicNotFound {
                service,
                characteristic,
            })?;
        peripheral
            .write(&target, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        link.watcher.abort();
        link.peripheral.disconnect().await?;
        Ok(())
    }
}
