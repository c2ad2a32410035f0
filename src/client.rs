use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub(crate) const USER_AGENT: &str = concat!("weather-checker/", env!("CARGO_PKG_VERSION"));

/// Place name resolved from the user's own coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DetectedPlace {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
}

/// Result of looking up a typed city name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeocodedPlace {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country: Option<String>,
}

/// Current conditions at a point. Temperatures in °C, wind in km/h.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentWeatherReading {
    pub code: i64,
    pub temperature: f64,
    pub apparent_temperature: f64,
    pub wind_speed: f64,
    /// Local observation time, when the service reports one.
    pub time: Option<NaiveDateTime>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeoWeatherError {
    #[error("City not found")]
    CityNotFound,
    #[error("Weather fetch failed")]
    WeatherFetchFailed,
    #[error("Reverse geocoding failed: {0}")]
    ReverseGeocodeFailed(StatusCode),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// The three lookups the controller needs from the backend.
#[async_trait]
pub trait GeoWeatherClient: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<DetectedPlace, GeoWeatherError>;

    async fn forward_geocode(&self, name: &str) -> Result<GeocodedPlace, GeoWeatherError>;

    async fn fetch_current_weather(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<CurrentWeatherReading, GeoWeatherError>;
}

#[derive(Serialize)]
struct CoordQuery {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
struct NameQuery<'a> {
    name: &'a str,
}

/// [`GeoWeatherClient`] talking to the `/reverse`, `/geocode` and `/weather`
/// endpoints under a single base address.
#[derive(Debug, Clone)]
pub struct HttpGeoWeatherClient {
    client: reqwest::Client,
    base: String,
}

impl HttpGeoWeatherClient {
    pub fn new(base: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(HttpGeoWeatherClient {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// GET `{base}/{endpoint}` and decode the JSON body. A non-success status
    /// is mapped through `on_status`.
    async fn get_json<T, Q>(
        &self,
        endpoint: &str,
        query: &Q,
        on_status: impl FnOnce(StatusCode) -> GeoWeatherError,
    ) -> Result<T, GeoWeatherError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.base, endpoint);
        let response = self.client.get(&url).query(query).send().await?;
        tracing::debug!(url = %response.url(), status = %response.status(), "response");

        if !response.status().is_success() {
            return Err(on_status(response.status()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Observation time from the weather payload. Accepts local ISO times with or
/// without seconds, RFC 3339 with an offset, and Unix seconds (read as UTC).
/// Anything else is dropped rather than failing the reading.
fn parse_observation_time(value: &serde_json::Value) -> Option<NaiveDateTime> {
    match value {
        serde_json::Value::String(s) => ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|t| t.naive_local())
            }),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|t| t.naive_utc()),
        _ => None,
    }
}

#[async_trait]
impl GeoWeatherClient for HttpGeoWeatherClient {
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<DetectedPlace, GeoWeatherError> {
        self.get_json(
            "reverse",
            &CoordQuery { lat, lon },
            GeoWeatherError::ReverseGeocodeFailed,
        )
        .await
    }

    async fn forward_geocode(&self, name: &str) -> Result<GeocodedPlace, GeoWeatherError> {
        self.get_json("geocode", &NameQuery { name }, |_| {
            GeoWeatherError::CityNotFound
        })
        .await
    }

    async fn fetch_current_weather(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<CurrentWeatherReading, GeoWeatherError> {
        #[derive(Debug, Deserialize)]
        struct Response {
            current: CurrentData,
        }

        #[derive(Debug, Deserialize)]
        struct CurrentData {
            #[serde(default)]
            time: Option<serde_json::Value>,
            weather_code: i64,
            temperature_2m: f64,
            apparent_temperature: f64,
            wind_speed_10m: f64,
        }

        let data: Response = self
            .get_json("weather", &CoordQuery { lat, lon }, |_| {
                GeoWeatherError::WeatherFetchFailed
            })
            .await?;
        let current = data.current;

        Ok(CurrentWeatherReading {
            code: current.weather_code,
            temperature: current.temperature_2m,
            apparent_temperature: current.apparent_temperature,
            wind_speed: current.wind_speed_10m,
            time: current.time.as_ref().and_then(parse_observation_time),
        })
    }
}
