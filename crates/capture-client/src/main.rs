//! Capture Client
//!
//! Headless relay client for a live-attendance station.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Create the REST collaborator and the session controller
//! 4. Open the recognition event feed
//! 5. Start the configured stream, if any
//! 6. Pump frames into the presenter and recognitions into the feed until
//!    a shutdown signal arrives
//! 7. Stop the stream and close both relays

#![warn(clippy::pedantic)]

use capture_client::config::ClientConfig;
use capture_client::feed::RecognitionFeed;
use capture_client::presenter::FramePresenter;
use capture_client::relay::RelayEvent;
use capture_client::resource::{InMemoryResources, ResourceBackend};
use capture_client::session::{
    AttendanceStartRequest, HttpStreamControl, SessionController, StreamControl, StreamStartRequest,
};
use common::config::ObservabilityConfig;
use relay_protocol::address::{camera_id, validate_source_url};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &observability.log_level;
        format!("capture_client={level},relay_protocol={level}").into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from_env();

    // Log with defaults if the configuration itself is broken
    let observability = config
        .as_ref()
        .map(|c| c.observability.clone())
        .unwrap_or_default();
    init_tracing(&observability);

    info!("Starting Capture Client");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        api_base_url = %config.api_base_url,
        reconnect_backoff_ms = u64::try_from(config.reconnect_backoff.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = ?config.max_reconnect_attempts,
        feed_capacity = config.feed_capacity,
        "Configuration loaded successfully"
    );

    let control: Arc<dyn StreamControl> =
        Arc::new(HttpStreamControl::new(&config.api_base_url, config.http_timeout)?);
    let (mut controller, mut channels) = SessionController::new(
        control,
        config.channel_address.clone(),
        config.access_token.clone(),
        config.reconnect_policy(),
    );

    let resources: Arc<dyn ResourceBackend> = InMemoryResources::shared();
    let mut presenter = FramePresenter::new(resources);
    let mut feed = RecognitionFeed::new(config.feed_capacity);

    controller.ensure_event_feed()?;

    if let Some(auto_start) = &config.auto_start {
        match validate_source_url(&auto_start.source_url) {
            Ok(source) => info!(
                stream = %auto_start.stream_name,
                camera = %camera_id(&auto_start.source_url),
                host = %source.host,
                "Starting configured stream"
            ),
            Err(e) => warn!(
                stream = %auto_start.stream_name,
                error = %e,
                "Stream source is not an RTSP URL, starting anyway"
            ),
        }

        let request =
            StreamStartRequest::new(auto_start.stream_name.clone(), auto_start.source_url.clone());
        match controller.start_stream(request).await {
            Ok(()) => {
                if let Some(attendance) = &config.auto_attendance {
                    let request = AttendanceStartRequest::new(
                        auto_start.stream_name.clone(),
                        attendance.subject.clone(),
                        attendance.department.clone(),
                        attendance.semester.clone(),
                    )
                    .with_section(attendance.section.clone());
                    match controller.start_attendance(&request).await {
                        Ok(true) => feed.clear(),
                        Ok(false) => {}
                        Err(e) => error!(error = %e, "Failed to start attendance session"),
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to start configured stream"),
        }
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            Some(event) = channels.frames.recv() => match event {
                RelayEvent::Frame(frame) => {
                    // No display attached: every frame is installed at once.
                    let id = presenter.on_frame(&frame);
                    presenter.installed(id);
                }
                RelayEvent::StateChanged(state) => info!(relay = "frames", state = %state, "Relay state"),
                RelayEvent::ReconnectExhausted { attempts } => {
                    warn!(relay = "frames", attempts, "Frame relay gave up");
                }
                other => debug!(relay = "frames", event = ?other, "Relay event"),
            },
            Some(event) = channels.events.recv() => match event {
                RelayEvent::Recognition(recognition) => {
                    info!(
                        subject = %recognition.subject_id,
                        name = %recognition.display_name,
                        confidence = %recognition.confidence_percent(),
                        modality = %recognition.modality.label(),
                        "Recognition"
                    );
                    feed.ingest(recognition);
                    let stats = feed.stats();
                    debug!(
                        total = stats.total,
                        recognized = stats.recognized,
                        unknown = stats.unknown,
                        groups = feed.grouped_view().len(),
                        "Feed updated"
                    );
                }
                RelayEvent::StateChanged(state) => info!(relay = "events", state = %state, "Relay state"),
                RelayEvent::ReconnectExhausted { attempts } => {
                    warn!(relay = "events", attempts, "Event feed gave up");
                }
                other => debug!(relay = "events", event = ?other, "Relay event"),
            },
            else => break,
        }
    }

    info!("Shutting down");
    controller.teardown().await;
    presenter.teardown();
    info!(
        recognitions = feed.len(),
        dropped_frames = presenter.dropped_frames(),
        "Capture Client stopped"
    );

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
