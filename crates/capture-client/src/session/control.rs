//! Stream/attendance REST collaborator.
//!
//! The server owns stream capture and attendance sessions; this client only
//! asks it to start and stop them. All calls are form-encoded `POST`s with
//! the access token as a bearer header. Error bodies follow the
//! `{"detail": ...}` convention; the detail becomes the failure reason.

use crate::errors::{ClientError, ExternalRequestFailure};
use common::secret::{bearer_value, AccessToken};
use common::types::StreamName;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default timeout for REST calls in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Parameters for starting server-side capture of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStartRequest {
    /// Name the stream is published under
    pub name: StreamName,
    /// Camera source (usually `rtsp://...`)
    pub source_url: String,
    /// Keyframe interval override
    pub keyframe_interval: Option<u32>,
}

impl StreamStartRequest {
    #[must_use]
    pub fn new(name: StreamName, source_url: impl Into<String>) -> Self {
        Self {
            name,
            source_url: source_url.into(),
            keyframe_interval: None,
        }
    }
}

/// Parameters for starting an attendance session on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceStartRequest {
    pub stream_name: StreamName,
    /// Subject code or name
    pub subject: String,
    pub department: String,
    pub semester: String,
    pub section: String,
}

impl AttendanceStartRequest {
    /// Section used when none is given.
    pub const DEFAULT_SECTION: &'static str = "A";

    #[must_use]
    pub fn new(
        stream_name: StreamName,
        subject: impl Into<String>,
        department: impl Into<String>,
        semester: impl Into<String>,
    ) -> Self {
        Self {
            stream_name,
            subject: subject.into(),
            department: department.into(),
            semester: semester.into(),
            section: Self::DEFAULT_SECTION.to_string(),
        }
    }

    /// Override the section
    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }
}

/// Trait for the stream/attendance collaborator (enables mocking).
#[async_trait::async_trait]
pub trait StreamControl: Send + Sync {
    /// Ask the server to start capturing a stream.
    async fn start_stream(
        &self,
        token: &AccessToken,
        request: &StreamStartRequest,
    ) -> Result<(), ExternalRequestFailure>;

    /// Ask the server to stop a stream.
    async fn stop_stream(
        &self,
        token: &AccessToken,
        name: &StreamName,
    ) -> Result<(), ExternalRequestFailure>;

    /// Start an attendance session.
    async fn start_attendance(
        &self,
        token: &AccessToken,
        request: &AttendanceStartRequest,
    ) -> Result<(), ExternalRequestFailure>;

    /// Stop the running attendance session.
    async fn stop_attendance(&self, token: &AccessToken) -> Result<(), ExternalRequestFailure>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Turn a `detail` value into a message. Validation errors arrive as a list
/// of objects with a `msg` field.
fn detail_message(detail: &serde_json::Value) -> Option<String> {
    match detail {
        serde_json::Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        serde_json::Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(serde_json::Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        serde_json::Value::Null | serde_json::Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

fn failure_reason(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .and_then(|d| detail_message(&d))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// HTTP implementation of [`StreamControl`].
#[derive(Clone)]
pub struct HttpStreamControl {
    client: Client,
    base_url: String,
}

impl fmt::Debug for HttpStreamControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStreamControl")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpStreamControl {
    /// Create a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| {
                error!(target: "client.session.http", error = %e, "Failed to build HTTP client");
                ClientError::Internal(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    /// API base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(
        &self,
        operation: &'static str,
        path: &str,
        token: &AccessToken,
        form: Option<&[(&str, String)]>,
    ) -> Result<(), ExternalRequestFailure> {
        let url = format!("{}{path}", self.base_url);

        let mut request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, bearer_value(token));
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "client.session.http", operation, error = %e, "Request failed");
            ExternalRequestFailure::new(operation, e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(target: "client.session.http", operation, status = %status, "Request succeeded");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let reason = failure_reason(status, &body);
        warn!(
            target: "client.session.http",
            operation,
            status = %status,
            reason = %reason,
            "Request rejected"
        );
        Err(ExternalRequestFailure::new(operation, reason))
    }
}

#[async_trait::async_trait]
impl StreamControl for HttpStreamControl {
    #[instrument(skip_all, fields(stream = %request.name))]
    async fn start_stream(
        &self,
        token: &AccessToken,
        request: &StreamStartRequest,
    ) -> Result<(), ExternalRequestFailure> {
        let mut form = vec![
            ("name", request.name.as_str().to_string()),
            ("url", request.source_url.clone()),
        ];
        if let Some(interval) = request.keyframe_interval {
            form.push(("keyframe_interval", interval.to_string()));
        }
        self.post("stream start", "/stream/start", token, Some(form.as_slice()))
            .await
    }

    #[instrument(skip_all, fields(stream = %name))]
    async fn stop_stream(
        &self,
        token: &AccessToken,
        name: &StreamName,
    ) -> Result<(), ExternalRequestFailure> {
        let form = [("name", name.as_str().to_string())];
        self.post("stream stop", "/stream/stop", token, Some(form.as_slice()))
            .await
    }

    #[instrument(skip_all, fields(stream = %request.stream_name, subject = %request.subject))]
    async fn start_attendance(
        &self,
        token: &AccessToken,
        request: &AttendanceStartRequest,
    ) -> Result<(), ExternalRequestFailure> {
        let form = [
            ("subject", request.subject.clone()),
            ("department", request.department.clone()),
            ("semester", request.semester.clone()),
            ("section", request.section.clone()),
            ("stream_name", request.stream_name.as_str().to_string()),
        ];
        self.post("attendance start", "/attendance/start", token, Some(form.as_slice()))
            .await
    }

    #[instrument(skip_all)]
    async fn stop_attendance(&self, token: &AccessToken) -> Result<(), ExternalRequestFailure> {
        self.post("attendance stop", "/attendance/stop", token, None)
            .await
    }
}

/// Mock collaborator module for testing.
///
/// Records every call and can be told to fail all of them.
pub mod mock {
    use super::{
        AccessToken, AttendanceStartRequest, ExternalRequestFailure, StreamControl,
        StreamName, StreamStartRequest,
    };
    use std::sync::{Mutex, PoisonError};

    /// One recorded call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ControlCall {
        StartStream(StreamStartRequest),
        StopStream(StreamName),
        StartAttendance(AttendanceStartRequest),
        StopAttendance,
    }

    /// Mock collaborator for unit testing.
    #[derive(Debug, Default)]
    pub struct MockStreamControl {
        calls: Mutex<Vec<ControlCall>>,
        failure: Mutex<Option<String>>,
    }

    impl MockStreamControl {
        /// Create a mock that accepts every call.
        #[must_use]
        pub fn accepting() -> Self {
            Self::default()
        }

        /// Create a mock that rejects every call with `reason`.
        #[must_use]
        pub fn failing(reason: impl Into<String>) -> Self {
            let mock = Self::default();
            mock.set_failure(Some(reason.into()));
            mock
        }

        /// Change the failure mode.
        pub fn set_failure(&self, reason: Option<String>) {
            *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = reason;
        }

        /// Calls made so far, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<ControlCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Number of calls made.
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        fn record(
            &self,
            operation: &'static str,
            call: ControlCall,
        ) -> Result<(), ExternalRequestFailure> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);

            match &*self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
                Some(reason) => Err(ExternalRequestFailure::new(operation, reason.clone())),
                None => Ok(()),
            }
        }
    }

    #[async_trait::async_trait]
    impl StreamControl for MockStreamControl {
        async fn start_stream(
            &self,
            _token: &AccessToken,
            request: &StreamStartRequest,
        ) -> Result<(), ExternalRequestFailure> {
            self.record("stream start", ControlCall::StartStream(request.clone()))
        }

        async fn stop_stream(
            &self,
            _token: &AccessToken,
            name: &StreamName,
        ) -> Result<(), ExternalRequestFailure> {
            self.record("stream stop", ControlCall::StopStream(name.clone()))
        }

        async fn start_attendance(
            &self,
            _token: &AccessToken,
            request: &AttendanceStartRequest,
        ) -> Result<(), ExternalRequestFailure> {
            self.record(
                "attendance start",
                ControlCall::StartAttendance(request.clone()),
            )
        }

        async fn stop_attendance(&self, _token: &AccessToken) -> Result<(), ExternalRequestFailure> {
            self.record("attendance stop", ControlCall::StopAttendance)
        }
    }
}
