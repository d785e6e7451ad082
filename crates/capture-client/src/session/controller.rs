//! `SessionController` - ties REST session calls to the two relay channels.
//!
//! The controller is the single owner of the access token. It passes the
//! token to the collaborator on every call and into the channel URL on every
//! open.
//!
//! # Stream lifecycle
//!
//! 1. `start_stream()` asks the server to start capturing
//! 2. On success, the frame relay opens on `/stream/ws/{name}`
//! 3. The event feed opens once and stays up across streams
//! 4. `stop_stream()` asks the server to stop, then closes the frame relay
//!
//! Starting the stream that is already running and stopping when nothing
//! runs are no-ops.

use super::control::{AttendanceStartRequest, StreamControl, StreamStartRequest};
use crate::errors::ClientError;
use crate::relay::{ConnectionState, ReconnectPolicy, RelayConnection, RelayEvent};
use common::secret::AccessToken;
use common::types::StreamName;
use relay_protocol::address::{ChannelAddress, RelayMode, RelayTarget};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Receivers for the two relay channels.
#[derive(Debug)]
pub struct SessionChannels {
    /// Frame relay events (`RelayEvent::Frame` and state changes)
    pub frames: mpsc::UnboundedReceiver<RelayEvent>,
    /// Event feed events (`RelayEvent::Recognition` and state changes)
    pub events: mpsc::UnboundedReceiver<RelayEvent>,
}

/// Orchestrates stream and attendance sessions.
pub struct SessionController {
    control: Arc<dyn StreamControl>,
    token: AccessToken,
    frames: RelayConnection,
    events: RelayConnection,
    active_stream: Option<StreamName>,
    attendance_active: bool,
}

impl SessionController {
    /// Create a controller with both relays idle.
    #[must_use]
    pub fn new(
        control: Arc<dyn StreamControl>,
        address: ChannelAddress,
        token: AccessToken,
        policy: ReconnectPolicy,
    ) -> (Self, SessionChannels) {
        let (frames, frames_rx) = RelayConnection::new("frames", address.clone(), policy);
        let (events, events_rx) = RelayConnection::new("events", address, policy);

        let controller = Self {
            control,
            token,
            frames,
            events,
            active_stream: None,
            attendance_active: false,
        };
        let channels = SessionChannels {
            frames: frames_rx,
            events: events_rx,
        };

        (controller, channels)
    }

    /// Replace the access token. Applies to later calls and opens; open
    /// relays keep the URL they connected with.
    pub fn set_token(&mut self, token: AccessToken) {
        self.token = token;
    }

    /// Stream the frame relay is bound to
    #[must_use]
    pub fn active_stream(&self) -> Option<&StreamName> {
        self.active_stream.as_ref()
    }

    /// Whether an attendance session was started and not yet stopped
    #[must_use]
    pub const fn attendance_active(&self) -> bool {
        self.attendance_active
    }

    /// Frame relay state
    #[must_use]
    pub fn frame_state(&self) -> ConnectionState {
        self.frames.state()
    }

    /// Event feed state
    #[must_use]
    pub fn event_state(&self) -> ConnectionState {
        self.events.state()
    }

    /// Open the event feed unless it is already active.
    ///
    /// Returns `true` if a new session was started.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connection` if the channel URL cannot be built.
    pub fn ensure_event_feed(&mut self) -> Result<bool, ClientError> {
        let opened = self
            .events
            .open(RelayTarget::LiveEvents, &self.token, RelayMode::EventFeed)?;
        Ok(opened)
    }

    /// Start a stream and bind the frame relay to it.
    ///
    /// A different running stream is stopped first. If the server refuses,
    /// the frame relay stays closed. Once the server accepts, the stream is
    /// active even if a relay fails to open.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::External` with the server's reason, or
    /// `ClientError::Connection` if a channel URL cannot be built.
    #[instrument(skip_all, name = "client.session.start_stream", fields(stream = %request.name))]
    pub async fn start_stream(&mut self, request: StreamStartRequest) -> Result<(), ClientError> {
        if self.active_stream.as_ref() == Some(&request.name)
            && self.frames.state() != ConnectionState::Idle
        {
            debug!(target: "client.session", stream = %request.name, "Stream already active");
            return Ok(());
        }

        if self.active_stream.is_some() {
            if let Err(e) = self.stop_stream().await {
                warn!(target: "client.session", error = %e, "Previous stream did not stop cleanly");
            }
        }

        self.control.start_stream(&self.token, &request).await?;
        // Recorded before the relays open so stop_stream reaches the server
        // even if a relay cannot be opened.
        self.active_stream = Some(request.name.clone());

        self.frames.open(
            RelayTarget::Stream(request.name.clone()),
            &self.token,
            RelayMode::RelayFrames,
        )?;
        self.ensure_event_feed()?;

        info!(target: "client.session", stream = %request.name, "Stream started");
        Ok(())
    }

    /// Stop the active stream and close the frame relay.
    ///
    /// The relay is closed even if the server call fails.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::External` if the server refused the stop.
    #[instrument(skip_all, name = "client.session.stop_stream")]
    pub async fn stop_stream(&mut self) -> Result<(), ClientError> {
        let Some(name) = self.active_stream.take() else {
            debug!(target: "client.session", "No active stream");
            return Ok(());
        };

        let result = self.control.stop_stream(&self.token, &name).await;
        self.frames.close().await;

        match result {
            Ok(()) => {
                info!(target: "client.session", stream = %name, "Stream stopped");
                Ok(())
            }
            Err(e) => {
                warn!(target: "client.session", stream = %name, error = %e, "Stream stop refused");
                Err(e.into())
            }
        }
    }

    /// Start an attendance session. No-op if one is already running.
    ///
    /// Returns `true` when a new session began; the recognition feed should
    /// then be cleared.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::External` with the server's reason.
    #[instrument(skip_all, name = "client.session.start_attendance", fields(subject = %request.subject))]
    pub async fn start_attendance(
        &mut self,
        request: &AttendanceStartRequest,
    ) -> Result<bool, ClientError> {
        if self.attendance_active {
            debug!(target: "client.session", "Attendance already active");
            return Ok(false);
        }

        self.control.start_attendance(&self.token, request).await?;
        self.attendance_active = true;
        self.ensure_event_feed()?;

        info!(
            target: "client.session",
            stream = %request.stream_name,
            subject = %request.subject,
            "Attendance started"
        );
        Ok(true)
    }

    /// Stop the attendance session. No-op if none is running.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::External` with the server's reason; the session
    /// is then still considered active.
    #[instrument(skip_all, name = "client.session.stop_attendance")]
    pub async fn stop_attendance(&mut self) -> Result<(), ClientError> {
        if !self.attendance_active {
            debug!(target: "client.session", "No attendance session");
            return Ok(());
        }

        self.control.stop_attendance(&self.token).await?;
        self.attendance_active = false;
        info!(target: "client.session", "Attendance stopped");
        Ok(())
    }

    /// Stop everything and close both relays. Failures are logged.
    pub async fn teardown(&mut self) {
        if let Err(e) = self.stop_attendance().await {
            warn!(target: "client.session", error = %e, "Attendance stop failed during teardown");
            self.attendance_active = false;
        }
        if let Err(e) = self.stop_stream().await {
            warn!(target: "client.session", error = %e, "Stream stop failed during teardown");
        }
        self.frames.close().await;
        self.events.close().await;
        debug!(target: "client.session", "Session torn down");
    }
}
