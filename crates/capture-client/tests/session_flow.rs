//! Session integration tests.
//!
//! Drives `HttpStreamControl` and `SessionController` against a mocked
//! stream/attendance REST API.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use capture_client::errors::ClientError;
use capture_client::feed::RecognitionFeed;
use capture_client::relay::{ConnectionState, ReconnectPolicy};
use capture_client::session::{
    AttendanceStartRequest, HttpStreamControl, SessionController, StreamControl,
    StreamStartRequest,
};
use common::secret::AccessToken;
use common::types::{StreamName, SubjectId};
use relay_protocol::address::ChannelAddress;
use relay_protocol::event::RecognitionEvent;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-access-token";

fn token() -> AccessToken {
    AccessToken::from(TOKEN)
}

fn control(server: &MockServer) -> HttpStreamControl {
    HttpStreamControl::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

fn stream_request(name: &str) -> StreamStartRequest {
    StreamStartRequest::new(StreamName::new(name).unwrap(), "rtsp://10.0.0.5:554/live")
}

fn controller(server: &MockServer) -> SessionController {
    let control: Arc<dyn StreamControl> = Arc::new(control(server));
    let address = ChannelAddress::from_api_base(&server.uri()).unwrap();
    // The mock server refuses the upgrade; relays sit in their retry delay.
    let policy = ReconnectPolicy {
        backoff: Duration::from_secs(60),
        max_attempts: None,
    };
    let (controller, _channels) = SessionController::new(control, address, token(), policy);
    controller
}

// ============================================================================
// HttpStreamControl
// ============================================================================

#[tokio::test]
async fn test_start_stream_sends_form_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/start"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("name=cam1"))
        .and(body_string_contains("url=rtsp%3A%2F%2F10.0.0.5%3A554%2Flive"))
        .and(body_string_contains("keyframe_interval=30"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"started": true, "name": "cam1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut request = stream_request("cam1");
    request.keyframe_interval = Some(30);

    control(&server).start_stream(&token(), &request).await.unwrap();
}

#[tokio::test]
async fn test_stop_stream_sends_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/stop"))
        .and(body_string_contains("name=cam1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"stopped": true, "name": "cam1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    control(&server)
        .stop_stream(&token(), &StreamName::new("cam1").unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_attendance_start_sends_all_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/attendance/start"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(body_string_contains("subject=CS501"))
        .and(body_string_contains("department=CSE"))
        .and(body_string_contains("semester=5"))
        .and(body_string_contains("section=A"))
        .and(body_string_contains("stream_name=cam1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "started": true,
            "subject_code": "CS501",
            "stream_name": "cam1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request =
        AttendanceStartRequest::new(StreamName::new("cam1").unwrap(), "CS501", "CSE", "5");
    control(&server)
        .start_attendance(&token(), &request)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_error_detail_becomes_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/start"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"detail": "Stream cam1 already exists"})),
        )
        .mount(&server)
        .await;

    let err = control(&server)
        .start_stream(&token(), &stream_request("cam1"))
        .await
        .unwrap_err();

    assert_eq!(err.operation, "stream start");
    assert_eq!(err.reason, "Stream cam1 already exists");
}

#[tokio::test]
async fn test_error_without_detail_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/attendance/stop"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = control(&server).stop_attendance(&token()).await.unwrap_err();
    assert_eq!(err.reason, "HTTP 503");
}

#[tokio::test]
async fn test_unreachable_server_reports_transport_error() {
    let control = HttpStreamControl::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();

    let err = control.stop_attendance(&token()).await.unwrap_err();
    assert_eq!(err.operation, "attendance stop");
    assert!(!err.reason.is_empty());
    assert!(!err.reason.starts_with("HTTP "));
}

// ============================================================================
// SessionController
// ============================================================================

#[tokio::test]
async fn test_stream_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"started": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stream/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stopped": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mut controller = controller(&server);

    controller.start_stream(stream_request("cam1")).await.unwrap();
    // Second start of the same stream never reaches the server
    controller.start_stream(stream_request("cam1")).await.unwrap();
    assert_ne!(controller.frame_state(), ConnectionState::Idle);
    assert_ne!(controller.event_state(), ConnectionState::Idle);

    controller.stop_stream().await.unwrap();
    controller.stop_stream().await.unwrap();
    assert_eq!(controller.frame_state(), ConnectionState::Idle);
    assert_ne!(controller.event_state(), ConnectionState::Idle);

    controller.teardown().await;
    assert_eq!(controller.event_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_refused_stream_keeps_frame_relay_closed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/start"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})))
        .mount(&server)
        .await;

    let mut controller = controller(&server);
    match controller.start_stream(stream_request("cam1")).await {
        Err(ClientError::External(failure)) => assert_eq!(failure.reason, "Invalid token"),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(controller.frame_state(), ConnectionState::Idle);
    assert!(controller.active_stream().is_none());
    controller.teardown().await;
}

#[tokio::test]
async fn test_attendance_start_clears_feed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/attendance/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"started": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/attendance/stop"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"stopped": true, "message": "Session ended"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut controller = controller(&server);
    let mut feed = RecognitionFeed::default();
    feed.ingest(RecognitionEvent::new(SubjectId::known("S1"), "Previous Session"));

    let request =
        AttendanceStartRequest::new(StreamName::new("cam1").unwrap(), "CS501", "CSE", "5");
    if controller.start_attendance(&request).await.unwrap() {
        feed.clear();
    }
    assert!(feed.is_empty());
    assert!(controller.attendance_active());

    controller.teardown().await;
    assert!(!controller.attendance_active());
}
