//! Relay channel addressing.
//!
//! Both relay channels live on the same host as the REST API. The channel
//! base is derived from the API base URL by swapping the scheme
//! (`http` -> `ws`, `https` -> `wss`); the access token travels as the
//! `token` query parameter because browsers and most WebSocket clients
//! cannot set headers on the upgrade request.

use common::secret::{is_present, AccessToken, ExposeSecret};
use common::types::StreamName;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Camera id used when none can be derived from a source URL.
pub const UNKNOWN_CAMERA: &str = "unknown-camera";

/// Errors from building channel addresses or validating source URLs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid API base URL: {0}")]
    InvalidBase(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid stream source URL: {0}")]
    InvalidSourceUrl(String),
}

/// What a relay connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Binary messages, one encoded image each
    RelayFrames,
    /// JSON envelopes tagged with `type`
    EventFeed,
}

/// Which channel a relay connection attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    /// Frame channel of a named stream (`/stream/ws/{name}`)
    Stream(StreamName),
    /// Live recognition events (`/attendance/live`)
    LiveEvents,
}

impl RelayTarget {
    /// Mode a connection to this target is normally opened in.
    #[must_use]
    pub const fn default_mode(&self) -> RelayMode {
        match self {
            Self::Stream(_) => RelayMode::RelayFrames,
            Self::LiveEvents => RelayMode::EventFeed,
        }
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(name) => write!(f, "stream/{name}"),
            Self::LiveEvents => f.write_str("live-events"),
        }
    }
}

/// WebSocket base derived from the REST API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    base: Url,
    prefix: Vec<String>,
}

impl ChannelAddress {
    /// Derive the channel base from the API base URL.
    ///
    /// Any path prefix on the API base is kept (minus a trailing `ws`
    /// segment); query and fragment are dropped. `ws`/`wss` bases are
    /// accepted as-is.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidBase` if the URL does not parse or has
    /// no host, and `AddressError::UnsupportedScheme` for schemes other than
    /// `http`, `https`, `ws` and `wss`.
    pub fn from_api_base(api_base: &str) -> Result<Self, AddressError> {
        let mut base =
            Url::parse(api_base.trim()).map_err(|e| AddressError::InvalidBase(e.to_string()))?;

        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };
        base.set_scheme(scheme)
            .map_err(|()| AddressError::UnsupportedScheme(scheme.to_string()))?;

        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(AddressError::InvalidBase(api_base.to_string()));
        }

        let mut prefix: Vec<String> = base
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if prefix.last().is_some_and(|s| s == "ws") {
            prefix.pop();
        }

        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base, prefix })
    }

    /// Scheme of the channel base (`ws` or `wss`)
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.base.scheme()
    }

    /// Full channel URL for a target, with the token as a query parameter.
    ///
    /// A blank token is omitted rather than sent empty. The returned URL
    /// contains the secret; never log it.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidBase` if the base cannot carry a path
    /// (rejected at construction, so only reachable through misuse).
    pub fn url_for(&self, target: &RelayTarget, token: &AccessToken) -> Result<Url, AddressError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| AddressError::InvalidBase(self.base.to_string()))?;
            path.clear();
            path.extend(self.prefix.iter().map(String::as_str));
            match target {
                RelayTarget::Stream(name) => {
                    path.extend(["stream", "ws", name.as_str()]);
                }
                RelayTarget::LiveEvents => {
                    path.extend(["attendance", "live"]);
                }
            }
        }

        if is_present(token) {
            url.query_pairs_mut()
                .append_pair("token", token.expose_secret());
        }

        Ok(url)
    }
}

/// Components of a validated `rtsp://host[:port][/path]` source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    pub host: String,
    pub port: Option<u16>,
    pub path: Option<String>,
}

/// Validate a camera source URL of the form `rtsp://host[:port][/path]`.
///
/// The host may contain ASCII letters, digits, `.` and `-` only; userinfo
/// and query-only forms are rejected.
///
/// # Errors
///
/// Returns `AddressError::InvalidSourceUrl` when the URL does not match.
pub fn validate_source_url(raw: &str) -> Result<SourceUrl, AddressError> {
    let invalid = || AddressError::InvalidSourceUrl(raw.to_string());

    let rest = raw.strip_prefix("rtsp://").ok_or_else(invalid)?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => {
            let (authority, path) = rest.split_at(idx);
            (authority, Some(path.to_string()))
        }
        None => (rest, None),
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            (host, Some(port.parse::<u16>().map_err(|_| invalid())?))
        }
        None => (authority, None),
    };

    let host_ok = !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-');
    if !host_ok {
        return Err(invalid());
    }

    Ok(SourceUrl {
        host: host.to_string(),
        port,
        path,
    })
}

/// Camera id for a source URL: the last non-empty path segment, else the
/// host, else [`UNKNOWN_CAMERA`].
#[must_use]
pub fn camera_id(source_url: &str) -> String {
    let Ok(url) = Url::parse(source_url.trim()) else {
        return UNKNOWN_CAMERA.to_string();
    };

    let last_segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string);

    last_segment
        .or_else(|| url.host_str().filter(|h| !h.is_empty()).map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_CAMERA.to_string())
}
