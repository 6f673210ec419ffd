//! BLE Connection Module
//!
//! Tracks the lifecycle of one link to the board and gates writes on it.
//!
//! ```text
//!   Idle ──open──▶ Connecting ──Connected + discovery ok──▶ Ready
//!                      │                                     │
//!                      └──────────── Disconnected ◀──────────┘
//! ```
//!
//! `Disconnected` is terminal until the next `open`, which starts a fresh
//! link. Events of an earlier link are ignored.

use crate::domain::models::{PeerDescriptor, SessionState};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    DiscoveredService, LinkTransport, TransportError, TransportEvent, TransportEvents,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Service UUID to look for
    pub service_uuid: Uuid,
    /// Characteristic frames are written to
    pub write_char_uuid: Uuid,
    /// How long `wait_until_ready` waits for the link
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID,
            write_char_uuid: protocol::WRITE_CHAR_UUID,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is already {0}")]
    AlreadyOpen(SessionState),
    #[error("session was never opened")]
    NotOpened,
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("link not ready after {0:?}")]
    ConnectTimeout(Duration),
    #[error("link disconnected")]
    Disconnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("session not ready (state: {0})")]
    NotReady(SessionState),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Snapshot published to subscribers on every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: SessionState,
    /// Set while Connecting if the board lacks the expected service
    pub discovery_error: Option<String>,
    /// The transport reported the link as connected
    pub link_up: bool,
    epoch: u64,
}

struct Link {
    transport: Arc<dyn LinkTransport>,
    config: SessionConfig,
    status: watch::Sender<LinkStatus>,
}

impl Link {
    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Move `from -> to` if the status still belongs to `epoch`
    fn transition(&self, epoch: u64, from: &[SessionState], to: SessionState) -> bool {
        self.status.send_if_modified(|status| {
            if status.epoch != epoch || !from.contains(&status.state) {
                return false;
            }
            status.state = to;
            true
        })
    }

    /// `Connecting -> Ready`, only once the link is up
    fn become_ready(&self, epoch: u64) -> bool {
        self.status.send_if_modified(|status| {
            if status.epoch != epoch || status.state != SessionState::Connecting || !status.link_up
            {
                return false;
            }
            status.state = SessionState::Ready;
            true
        })
    }

    fn fail_discovery(&self, epoch: u64, reason: String) {
        let applied = self.status.send_if_modified(|status| {
            if status.epoch != epoch || status.state != SessionState::Connecting {
                return false;
            }
            status.discovery_error = Some(reason.clone());
            true
        });
        if applied {
            error!("Service discovery failed: {}", reason);
        }
    }

    fn check_services(&self, services: &[DiscoveredService]) -> Result<(), String> {
        let service = services
            .iter()
            .find(|s| s.uuid == self.config.service_uuid)
            .ok_or_else(|| format!("service {} not found", self.config.service_uuid))?;
        if !service.has_characteristic(self.config.write_char_uuid) {
            return Err(format!(
                "characteristic {} not found",
                self.config.write_char_uuid
            ));
        }
        Ok(())
    }

    async fn apply(&self, epoch: u64, event: TransportEvent) {
        debug!("Transport event: {:?}", event);
        match event {
            TransportEvent::Connected => {
                let accepted = self.status.send_if_modified(|status| {
                    if status.epoch != epoch || status.state != SessionState::Connecting {
                        return false;
                    }
                    status.link_up = true;
                    true
                });
                if !accepted {
                    return;
                }
                info!("Link up, discovering services...");
                if let Err(e) = self.transport.discover_services().await {
                    self.fail_discovery(epoch, e.to_string());
                }
            }
            TransportEvent::ServicesDiscovered(services) => match self.check_services(&services) {
                Ok(()) => {
                    if self.become_ready(epoch) {
                        info!("Found write characteristic, session ready");
                    } else {
                        debug!("Services discovered before the link is up, ignoring");
                    }
                }
                Err(reason) => self.fail_discovery(epoch, reason),
            },
            TransportEvent::DiscoveryFailed(reason) => self.fail_discovery(epoch, reason),
            TransportEvent::Disconnected => {
                if self.transition(
                    epoch,
                    &[SessionState::Connecting, SessionState::Ready],
                    SessionState::Disconnected,
                ) {
                    warn!("Link disconnected");
                }
            }
        }
    }
}

async fn pump_events(link: Arc<Link>, epoch: u64, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        link.apply(epoch, event).await;
        if link.state() == SessionState::Disconnected {
            return;
        }
    }
    // The transport dropped its side without saying goodbye
    link.apply(epoch, TransportEvent::Disconnected).await;
}

/// A single link to the board.
///
/// All methods take `&self`; transport events are applied on a background
/// task and every state change is published on a watch channel.
///
/// Dropping the session stops event handling but does not release the
/// transport link; call [`Self::close`] first.
pub struct ConnectionSession {
    link: Arc<Link>,
    peer: Mutex<Option<PeerDescriptor>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    pub fn new(transport: Arc<dyn LinkTransport>, config: SessionConfig) -> Self {
        let (status, _) = watch::channel(LinkStatus::default());
        Self {
            link: Arc::new(Link {
                transport,
                config,
                status,
            }),
            peer: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.link.state()
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.link.status.subscribe()
    }

    pub fn peer(&self) -> Option<PeerDescriptor> {
        self.peer.lock().ok().and_then(|p| p.clone())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.link.config
    }

    /// Start connecting to `peer`.
    ///
    /// Allowed from `Idle` and `Disconnected`; returns as soon as the
    /// transport accepted the request. Use [`Self::wait_until_ready`] to
    /// wait for the link.
    pub async fn open(&self, peer: PeerDescriptor) -> Result<(), SessionError> {
        let mut rejected = None;
        let mut epoch = 0;
        self.link.status.send_if_modified(|status| {
            if matches!(
                status.state,
                SessionState::Connecting | SessionState::Ready
            ) {
                rejected = Some(status.state);
                return false;
            }
            status.epoch += 1;
            status.state = SessionState::Connecting;
            status.discovery_error = None;
            status.link_up = false;
            epoch = status.epoch;
            true
        });
        if let Some(state) = rejected {
            return Err(SessionError::AlreadyOpen(state));
        }

        self.stop_pump();
        info!("Connecting to board: {}", peer);

        let events = match self.link.transport.open(&peer).await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to open link to {}: {}", peer, e);
                self.link
                    .transition(epoch, &[SessionState::Connecting], SessionState::Disconnected);
                return Err(e.into());
            }
        };

        // Closed while the transport was still opening
        if self.link.status.borrow().epoch != epoch {
            warn!("Session closed while connecting to {}, releasing link", peer);
            if let Err(e) = self.link.transport.close().await {
                error!("Failed to release link: {}", e);
            }
            return Err(SessionError::Disconnected);
        }

        if let Ok(mut slot) = self.peer.lock() {
            *slot = Some(peer);
        }
        let handle = tokio::spawn(pump_events(self.link.clone(), epoch, events));
        if let Ok(mut slot) = self.pump.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Wait until the session is `Ready`, bounded by the connect timeout
    pub async fn wait_until_ready(&self) -> Result<(), SessionError> {
        let timeout = self.link.config.connect_timeout;
        let mut rx = self.subscribe();

        let wait = async {
            loop {
                {
                    let status = rx.borrow_and_update();
                    match status.state {
                        SessionState::Ready => return Ok(()),
                        SessionState::Idle => return Err(SessionError::NotOpened),
                        SessionState::Disconnected => return Err(SessionError::Disconnected),
                        SessionState::Connecting => {
                            if let Some(reason) = &status.discovery_error {
                                return Err(SessionError::DiscoveryFailed(reason.clone()));
                            }
                        }
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(SessionError::Disconnected);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::ConnectTimeout(timeout))?
    }

    /// Write one chunk without response.
    ///
    /// Only valid while `Ready`. Nothing is retried or confirmed.
    pub async fn send_chunk(&self, chunk: &[u8]) -> Result<(), SendError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(SendError::NotReady(state));
        }
        trace!("Writing chunk: {:02X?}", chunk);
        self.link
            .transport
            .write(
                self.link.config.service_uuid,
                self.link.config.write_char_uuid,
                chunk,
            )
            .await?;
        Ok(())
    }

    /// Release the link. The session ends up `Disconnected`.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.stop_pump();

        let mut previous = SessionState::Idle;
        self.link.status.send_modify(|status| {
            previous = status.state;
            status.epoch += 1;
            status.link_up = false;
            if status.state != SessionState::Idle {
                status.state = SessionState::Disconnected;
            }
        });

        if matches!(previous, SessionState::Connecting | SessionState::Ready) {
            self.link.transport.close().await?;
            info!("Disconnected from board");
        }
        Ok(())
    }

    fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().ok().and_then(|mut p| p.take()) {
            handle.abort();
        }
    }
}

// Cannot await the transport here, see `close`
impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
