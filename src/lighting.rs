//! Lighting Controller
//!
//! Drives a [`ConnectionSession`] to light holds of a [`HoldGrid`].
//! Frames are sent one after another with a fixed pause in between; the
//! board has no flow control and drops writes it cannot buffer.

use crate::domain::grid::HoldGrid;
use crate::domain::models::{HoldLocation, LedCommand, SessionState};
use crate::infrastructure::bluetooth::connection::{ConnectionSession, SendError};
use crate::infrastructure::bluetooth::protocol::{
    self, CodecError, Frame, Rgb, DEFAULT_CHUNK_SIZE, DEFAULT_FRAME_DELAY_MS,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LightingConfig {
    /// Pause between two frames
    pub inter_frame_delay: Duration,
    /// Largest single write
    pub chunk_size: usize,
}

impl LightingConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.chunk_size == 0 {
            return Err(CodecError::InvalidChunkSize(self.chunk_size));
        }
        Ok(())
    }
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            inter_frame_delay: Duration::from_millis(DEFAULT_FRAME_DELAY_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LightingError {
    #[error("a lighting sequence is already running")]
    SequenceInProgress,
    #[error("no hold at grid position ({x}, {y})")]
    HoldNotFound { x: i32, y: i32 },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// What happened to one hold during [`LightingController::light_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldOutcome {
    pub placement_id: i64,
    pub led_position: u16,
    pub result: Result<(), SendError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightingReport {
    pub outcomes: Vec<HoldOutcome>,
    /// The link went away and the remaining holds were skipped
    pub stopped_early: bool,
}

impl LightingReport {
    pub fn sent(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HoldOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub struct LightingController {
    session: ConnectionSession,
    config: LightingConfig,
    sequence: Mutex<()>,
}

impl LightingController {
    pub fn new(session: ConnectionSession, config: LightingConfig) -> Result<Self, LightingError> {
        config.validate()?;
        Ok(Self {
            session,
            config,
            sequence: Mutex::new(()),
        })
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    /// Light every hold of `grid` in grid order, one frame per hold.
    ///
    /// Does nothing unless the session is ready. A failed hold does not
    /// stop the run; losing the link does.
    pub async fn light_all(
        &self,
        grid: &HoldGrid,
        color: &str,
    ) -> Result<LightingReport, LightingError> {
        let _sequence = self
            .sequence
            .try_lock()
            .map_err(|_| LightingError::SequenceInProgress)?;
        Rgb::parse_hex(color)?;

        let state = self.session.state();
        if state != SessionState::Ready {
            warn!(
                "Session is {}, skipping {} holds",
                state,
                grid.all_targets().len()
            );
            return Ok(LightingReport::default());
        }

        let targets = grid.all_targets();
        info!("Lighting {} holds with #{}", targets.len(), color);

        let mut report = LightingReport::default();
        for (i, hold) in targets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_frame_delay).await;
            }

            let frame = Frame::encode(&[LedCommand::for_hold(hold, color)], 0, 1)?;
            let chunks = frame.chunks(self.config.chunk_size)?;
            let result = self.send_chunks(&frame, &chunks).await;
            let link_lost = matches!(result, Err(SendError::NotReady(_)));
            if let Err(e) = &result {
                warn!(
                    "Failed to light placement {} (led {}): {}",
                    hold.placement_id, hold.led_position, e
                );
            }
            report.outcomes.push(HoldOutcome {
                placement_id: hold.placement_id,
                led_position: hold.led_position,
                result,
            });

            if link_lost {
                report.stopped_early = true;
                warn!(
                    "Link lost after {} of {} holds, stopping",
                    i + 1,
                    targets.len()
                );
                break;
            }
        }

        info!(
            "Lit {} holds, {} failed",
            report.sent(),
            report.failures().count()
        );
        Ok(report)
    }

    /// Light the hold at grid coordinate `(x, y)`
    pub async fn light_at(
        &self,
        grid: &HoldGrid,
        x: i32,
        y: i32,
        color: &str,
    ) -> Result<HoldLocation, LightingError> {
        let _sequence = self
            .sequence
            .try_lock()
            .map_err(|_| LightingError::SequenceInProgress)?;

        let hold = grid
            .lookup(x, y)
            .ok_or(LightingError::HoldNotFound { x, y })?
            .clone();
        let frame = Frame::encode(&[LedCommand::for_hold(&hold, color)], 0, 1)?;
        let chunks = frame.chunks(self.config.chunk_size)?;
        self.send_chunks(&frame, &chunks).await?;

        info!(
            "Lit hold ({}, {}) -> placement {} led {}",
            x, y, hold.placement_id, hold.led_position
        );
        Ok(hold)
    }

    /// Send `leds` as one message, split over as many frames as needed.
    ///
    /// Returns the number of frames written.
    pub async fn light_holds(&self, leds: &[LedCommand]) -> Result<usize, LightingError> {
        let _sequence = self
            .sequence
            .try_lock()
            .map_err(|_| LightingError::SequenceInProgress)?;

        let frames = protocol::encode_message(leds)?;
        for (i, frame) in frames.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_frame_delay).await;
            }
            let chunks = frame.chunks(self.config.chunk_size)?;
            self.send_chunks(frame, &chunks).await?;
        }

        info!("Sent {} leds in {} frames", leds.len(), frames.len());
        Ok(frames.len())
    }

    async fn send_chunks(&self, frame: &Frame, chunks: &[Vec<u8>]) -> Result<(), SendError> {
        for chunk in chunks {
            self.session.send_chunk(chunk).await?;
        }
        debug!(
            "Sent frame {}/{} ({} bytes)",
            frame.packet_id() as u16 + 1,
            frame.num_packets(),
            frame.as_bytes().len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::grid::{GridDimensions, GridIndexing};
    use crate::domain::models::{HoldType, PeerDescriptor};
    use crate::infrastructure::bluetooth::connection::SessionConfig;
    use crate::infrastructure::bluetooth::transport::mock::MockTransport;
    use std::sync::Arc;

    const WIDTH: usize = 4;
    const HEIGHT: usize = 3;

    fn small_grid(indexing: GridIndexing) -> HoldGrid {
        let mut rows = Vec::new();
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let n = y * WIDTH + x;
                rows.push(HoldLocation {
                    x: 10 * x as i32,
                    y: 10 * y as i32,
                    led_position: 300 + n as u16,
                    placement_id: n as i64,
                    hold_type: HoldType::BoltOn,
                });
            }
        }
        rows.reverse();
        HoldGrid::build(
            rows,
            GridDimensions {
                width: WIDTH,
                height: HEIGHT,
            },
            indexing,
        )
        .unwrap()
    }

    fn config(chunk_size: usize) -> LightingConfig {
        LightingConfig {
            inter_frame_delay: Duration::from_millis(2),
            chunk_size,
        }
    }

    async fn ready_controller(
        transport: Arc<MockTransport>,
        chunk_size: usize,
    ) -> LightingController {
        let session = ConnectionSession::new(transport, SessionConfig::default());
        session
            .open(PeerDescriptor::new("C4:4F:33:12:34:56"))
            .await
            .unwrap();
        session.wait_until_ready().await.unwrap();
        LightingController::new(session, config(chunk_size)).unwrap()
    }

    fn frame_for(led: u16, color: &str) -> Vec<u8> {
        Frame::encode(&[LedCommand::new(led, color)], 0, 1)
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn test_light_all_in_grid_order() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport.clone(), DEFAULT_CHUNK_SIZE).await;
        let grid = small_grid(GridIndexing::RowMajor);

        let report = controller.light_all(&grid, "FF0000").await.unwrap();
        assert_eq!(report.sent(), WIDTH * HEIGHT);
        assert!(!report.stopped_early);

        let expected: Vec<Vec<u8>> = (0..WIDTH * HEIGHT)
            .map(|n| frame_for(300 + n as u16, "FF0000"))
            .collect();
        assert_eq!(transport.written_bytes(), expected);
        assert_eq!(
            report
                .outcomes
                .iter()
                .map(|o| o.placement_id)
                .collect::<Vec<_>>(),
            (0..(WIDTH * HEIGHT) as i64).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_light_all_not_ready_is_noop() {
        let transport = Arc::new(MockTransport::new());
        let session = ConnectionSession::new(transport.clone(), SessionConfig::default());
        let controller = LightingController::new(session, config(20)).unwrap();

        let report = controller
            .light_all(&small_grid(GridIndexing::RowMajor), "FF0000")
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_light_all_stops_on_disconnect() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport.clone(), DEFAULT_CHUNK_SIZE).await;
        transport.disconnect_after(3);

        let report = controller
            .light_all(&small_grid(GridIndexing::RowMajor), "00FF00")
            .await
            .unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.sent(), 3);
        assert_eq!(
            report.outcomes[3].result,
            Err(SendError::NotReady(SessionState::Disconnected))
        );
        assert_eq!(transport.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_light_all_continues_after_failed_hold() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport.clone(), DEFAULT_CHUNK_SIZE).await;
        transport.fail_write(1);

        let report = controller
            .light_all(&small_grid(GridIndexing::RowMajor), "0000FF")
            .await
            .unwrap();
        assert!(!report.stopped_early);
        assert_eq!(report.outcomes.len(), WIDTH * HEIGHT);
        let failed: Vec<i64> = report.failures().map(|o| o.placement_id).collect();
        assert_eq!(failed, vec![1]);
    }

    #[tokio::test]
    async fn test_light_all_rejects_bad_color() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport.clone(), DEFAULT_CHUNK_SIZE).await;

        let err = controller
            .light_all(&small_grid(GridIndexing::RowMajor), "#FF0000")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LightingError::Codec(CodecError::InvalidColor("#FF0000".to_string()))
        );
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_frames_are_chunked() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport.clone(), 4).await;

        controller
            .light_all(&small_grid(GridIndexing::RowMajor), "FFFFFF")
            .await
            .unwrap();

        let writes = transport.written_bytes();
        // 9 byte frames -> 4 + 4 + 1
        assert_eq!(writes.len(), 3 * WIDTH * HEIGHT);
        assert!(writes.iter().all(|w| w.len() <= 4));
        assert_eq!(writes[..3].concat(), frame_for(300, "FFFFFF"));
    }

    #[tokio::test]
    async fn test_concurrent_sequences_rejected() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport, DEFAULT_CHUNK_SIZE).await;
        let grid = small_grid(GridIndexing::RowMajor);

        let (first, second) = tokio::join!(
            controller.light_all(&grid, "FF0000"),
            controller.light_all(&grid, "00FF00")
        );
        assert_eq!(first.unwrap().sent(), WIDTH * HEIGHT);
        assert_eq!(second.unwrap_err(), LightingError::SequenceInProgress);
    }

    #[tokio::test]
    async fn test_light_at() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport.clone(), DEFAULT_CHUNK_SIZE).await;
        let grid = small_grid(GridIndexing::RowMajor);

        let hold = controller.light_at(&grid, 1, 2, "FFFF00").await.unwrap();
        assert_eq!((hold.x, hold.y), (10, 20));
        assert_eq!(
            transport.written_bytes(),
            vec![frame_for(300 + (2 * WIDTH + 1) as u16, "FFFF00")]
        );

        assert_eq!(
            controller.light_at(&grid, WIDTH as i32, 0, "FFFF00").await,
            Err(LightingError::HoldNotFound {
                x: WIDTH as i32,
                y: 0
            })
        );
    }

    #[tokio::test]
    async fn test_light_holds_multi_frame() {
        let transport = Arc::new(MockTransport::new());
        let controller = ready_controller(transport.clone(), 512).await;

        let leds: Vec<LedCommand> = (0..100).map(|i| LedCommand::new(i, "FF00FF")).collect();
        assert_eq!(controller.light_holds(&leds).await.unwrap(), 2);

        let writes = transport.written_bytes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0][4], 82);
        assert_eq!(writes[0].len(), 6 + 3 * 84);
        assert_eq!(writes[1][4], 83);
        assert_eq!(writes[1].len(), 6 + 3 * 16);
    }

    #[test]
    fn test_config_validate() {
        assert_eq!(LightingConfig::default().validate(), Ok(()));
        assert_eq!(
            config(0).validate(),
            Err(CodecError::InvalidChunkSize(0))
        );
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let session = ConnectionSession::new(
            Arc::new(MockTransport::new()),
            SessionConfig::default(),
        );
        assert!(matches!(
            LightingController::new(session, config(0)),
            Err(LightingError::Codec(CodecError::InvalidChunkSize(0)))
        ));
    }
}
