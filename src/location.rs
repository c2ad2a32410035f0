use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::client::USER_AGENT;

/// Default IP geolocation endpoint used when no fixed position is given.
pub const DEFAULT_IP_LOCATOR_URL: &str = "http://ip-api.com/json";

/// A position reported by the host, in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Policy for a single position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Prefer the most accurate fix the host can give.
    pub high_accuracy: bool,
    /// Give up (as [`LocationError::Timeout`]) if no fix arrives in time.
    pub timeout: Duration,
    /// Oldest acceptable cached fix. Zero means always fresh.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        PositionOptions {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Why the host could not produce a position. None of these are shown to the
/// user; they only mean "could not detect".
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("location permission denied")]
    Denied,
    #[error("location service unavailable")]
    Unavailable,
    #[error("location request timed out")]
    Timeout,
}

/// Host capability that answers "where am I?" once per request.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Coordinates, LocationError>;
}

#[async_trait]
impl<P: LocationProvider + ?Sized> LocationProvider for Box<P> {
    async fn request_current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        (**self).request_current_position(options).await
    }
}

/// Parse a coordinate string in "latitude,longitude" format.
///
/// Returns `None` if the string doesn't match the expected format or if
/// coordinates are out of valid ranges (latitude: -90 to 90, longitude: -180 to 180).
pub fn parse_coordinates(s: &str) -> Option<Coordinates> {
    static COORD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r#"(?x)
            ^
            \s*
            (-?\d+(?:\.\d+)?)   # latitude: decimal number
            \s*,\s*
            (-?\d+(?:\.\d+)?)   # longitude: decimal number
            \s*
            $
        "#,
        )
        .unwrap()
    });

    let caps = COORD_RE.captures(s)?;
    let lat: f64 = caps[1].parse().ok()?;
    let lon: f64 = caps[2].parse().ok()?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    Some(Coordinates { lat, lon })
}

/// A position the user typed in; always answers immediately.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedPosition {
    async fn request_current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

/// The host has no location capability at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn request_current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable)
    }
}

/// Approximate position from an ip-api.com compatible service.
///
/// The service never caches on our side, so `maximum_age` is always honored.
/// `high_accuracy` cannot be honored by an IP lookup and is ignored.
#[derive(Debug, Clone)]
pub struct IpLocator {
    client: reqwest::Client,
    url: String,
}

impl IpLocator {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(IpLocator {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LocationProvider for IpLocator {
    async fn request_current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        #[derive(Debug, Deserialize)]
        struct Response {
            status: String,
            lat: Option<f64>,
            lon: Option<f64>,
            message: Option<String>,
        }

        tracing::debug!(url = %self.url, "requesting IP geolocation");
        let response = self
            .client
            .get(&self.url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LocationError::Timeout
                } else {
                    tracing::debug!("IP geolocation request failed: {}", e);
                    LocationError::Unavailable
                }
            })?;

        if !response.status().is_success() {
            tracing::debug!("IP geolocation returned status {}", response.status());
            return Err(LocationError::Denied);
        }

        let data: Response = response
            .json()
            .await
            .map_err(|_| LocationError::Unavailable)?;

        if data.status != "success" {
            tracing::debug!(message = ?data.message, "IP geolocation refused");
            return Err(LocationError::Denied);
        }

        match (data.lat, data.lon) {
            (Some(lat), Some(lon)) => Ok(Coordinates { lat, lon }),
            _ => Err(LocationError::Unavailable),
        }
    }
}
