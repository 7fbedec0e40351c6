//! Ordered, best-effort teardown of one call.
//!
//! Runs on every hangup path. Steps, in order:
//! 1. release local media (stream handles are already cleared by the caller),
//! 2. delete the shared session artifacts so the other side's teardown
//!    watch fires,
//! 3. close the connection object.
//!
//! A failing step is logged and the next one still runs.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::peer::connection::PeerConnection;
use crate::peer::media::{MediaSource, MediaStream};
use crate::signaling::SignalingChannel;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub media_released: bool,
    pub session_destroyed: bool,
    pub connection_closed: bool,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct CleanupCoordinator<'a> {
    media: &'a dyn MediaSource,
    signaling: &'a SignalingChannel,
}

impl<'a> CleanupCoordinator<'a> {
    pub fn new(media: &'a dyn MediaSource, signaling: &'a SignalingChannel) -> Self {
        Self { media, signaling }
    }

    /// Absent resources count as already cleaned up.
    pub async fn run(
        &self,
        local_stream: Option<MediaStream>,
        connection: Option<Arc<dyn PeerConnection>>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        match local_stream {
            Some(stream) => match self.media.release(&stream).await {
                Ok(()) => {
                    debug!("Released local stream {}", stream.id);
                    report.media_released = true;
                }
                Err(e) => {
                    warn!("Failed to release local stream {}: {e}", stream.id);
                    report.failures.push(format!("media: {e}"));
                }
            },
            None => report.media_released = true,
        }

        match self.signaling.destroy_session().await {
            Ok(()) => report.session_destroyed = true,
            Err(e) => {
                warn!("Session cleanup incomplete: {e}");
                report.failures.push(format!("signaling: {e}"));
            }
        }

        match connection {
            Some(connection) => match connection.close().await {
                Ok(()) => report.connection_closed = true,
                Err(e) => {
                    warn!("Failed to close connection: {e}");
                    report.failures.push(format!("connection: {e}"));
                }
            },
            None => report.connection_closed = true,
        }

        report
    }
}
