//! The check / detect state machine behind the widget.
//!
//! Two flows share one controller. Detection runs at most once and writes the
//! detected place into a single-assignment cell. Checks can run any number of
//! times; each one clears the previous card and error, then settles into
//! exactly one of joke, report or error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::catalog;
use crate::client::{
    CurrentWeatherReading, DetectedPlace, GeoWeatherClient, GeoWeatherError, GeocodedPlace,
};
use crate::location::{LocationError, LocationProvider, PositionOptions};

/// Weather summary ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub title: String,
    pub desc: &'static str,
    /// °C
    pub temp: i32,
    /// °C
    pub feels: i32,
    /// km/h
    pub wind: i32,
    pub observed_at: Option<NaiveDateTime>,
}

impl Report {
    /// Build the card for `place`, rounding every value to a whole number.
    pub fn new(place: &GeocodedPlace, reading: &CurrentWeatherReading) -> Self {
        let title = match place.country.as_deref() {
            Some(country) if !country.is_empty() => format!("{} ({})", place.name, country),
            _ => place.name.clone(),
        };
        Report {
            title,
            desc: catalog::describe(reading.code),
            temp: reading.temperature.round() as i32,
            feels: reading.apparent_temperature.round() as i32,
            wind: reading.wind_speed.round() as i32,
            observed_at: reading.time,
        }
    }
}

/// What the widget shows below the input after a check.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WeatherCard {
    #[default]
    Absent,
    Joke(String),
    Report(Report),
}

/// Errors that end a check. Their `Display` text is what the user sees.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Please type a city")]
    Validation,
    #[error(transparent)]
    Lookup(#[from] GeoWeatherError),
}

/// Progress of the one-shot location detection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Detection {
    #[default]
    Idle,
    Detecting,
    Detected(DetectedPlace),
    Failed,
}

/// Everything a renderer needs, copied out of the controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub detection: Detection,
    pub error: Option<String>,
    pub card: WeatherCard,
    pub loading: bool,
}

/// How a single `check` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Joked,
    Reported,
    Failed,
    /// A newer check started before this one resolved; its result was dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct CheckState {
    generation: u64,
    error: Option<String>,
    card: WeatherCard,
    loading: bool,
}

/// Owns the widget state and drives the lookups through `C` and `L`.
pub struct LocationWeatherController<C, L> {
    client: C,
    locator: L,
    options: PositionOptions,
    detect_started: AtomicBool,
    // None inside means detection settled without a place.
    detected: OnceLock<Option<DetectedPlace>>,
    state: Mutex<CheckState>,
}

impl<C, L> LocationWeatherController<C, L>
where
    C: GeoWeatherClient,
    L: LocationProvider,
{
    /// Create a controller that asks for a position with the default options.
    pub fn new(client: C, locator: L) -> Self {
        LocationWeatherController {
            client,
            locator,
            options: PositionOptions::default(),
            detect_started: AtomicBool::new(false),
            detected: OnceLock::new(),
            state: Mutex::new(CheckState::default()),
        }
    }

    /// Replace the options passed to the location provider.
    pub fn with_position_options(mut self, options: PositionOptions) -> Self {
        self.options = options;
        self
    }

    /// The place found by detection, if detection has finished and succeeded.
    pub fn detected_place(&self) -> Option<&DetectedPlace> {
        self.detected.get().and_then(Option::as_ref)
    }

    /// Run the background detection flow. Only the first call does any work;
    /// later calls return whatever the first one found (or `None` while it is
    /// still running). Failures are logged and never reach the view's error.
    pub async fn detect(&self) -> Option<&DetectedPlace> {
        if self.detect_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("location detection already started");
            return self.detected_place();
        }

        let place = self.resolve_place().await;
        if self.detected.set(place).is_err() {
            tracing::warn!("detected place was already set");
        }
        self.detected_place()
    }

    async fn resolve_place(&self) -> Option<DetectedPlace> {
        let position = tokio::time::timeout(
            self.options.timeout,
            self.locator.request_current_position(&self.options),
        )
        .await
        .unwrap_or(Err(LocationError::Timeout));

        let coords = match position {
            Ok(coords) => coords,
            Err(e) => {
                tracing::warn!("could not detect location: {}", e);
                return None;
            }
        };
        tracing::debug!(lat = coords.lat, lon = coords.lon, "got position");

        match self.client.reverse_geocode(coords.lat, coords.lon).await {
            Ok(place) if !place.name.trim().is_empty() => {
                tracing::info!(name = %place.name, country = ?place.country, "detected city");
                Some(place)
            }
            Ok(_) => {
                tracing::warn!("reverse geocoder returned an empty place name");
                None
            }
            Err(e) => {
                tracing::warn!("reverse geocoding failed: {}", e);
                None
            }
        }
    }

    /// Name-only comparison against the detected place. Two cities sharing a
    /// name in different countries compare equal.
    fn is_same_city(&self, typed: &str) -> bool {
        self.detected_place().is_some_and(|place| {
            !typed.is_empty() && place.name.trim().to_lowercase() == typed.to_lowercase()
        })
    }

    /// Check the weather for `input`.
    pub async fn check(&self, input: &str) -> CheckOutcome {
        let typed = input.trim();
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.error = None;
            state.card = WeatherCard::Absent;
            state.loading = false;
            state.generation
        };

        if typed.is_empty() {
            return self.settle(generation, Err(CheckError::Validation));
        }

        if self.is_same_city(typed) {
            tracing::info!(city = typed, "typed city is the detected city");
            let joke = format!("You are literally in {typed}. Just go look outside!");
            return self.settle(generation, Ok(WeatherCard::Joke(joke)));
        }

        self.state.lock().loading = true;
        tracing::info!(city = typed, "checking weather");
        let result = self.lookup(typed).await;
        self.settle(generation, result.map(WeatherCard::Report).map_err(CheckError::from))
    }

    async fn lookup(&self, typed: &str) -> Result<Report, GeoWeatherError> {
        let place = self.client.forward_geocode(typed).await?;
        tracing::debug!(name = %place.name, lat = place.lat, lon = place.lon, "geocoded");
        let reading = self
            .client
            .fetch_current_weather(place.lat, place.lon)
            .await?;
        Ok(Report::new(&place, &reading))
    }

    /// Publish the result of check number `generation`, unless a newer check
    /// has started meanwhile.
    fn settle(&self, generation: u64, result: Result<WeatherCard, CheckError>) -> CheckOutcome {
        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::debug!(
                generation,
                latest = state.generation,
                "dropping result of superseded check"
            );
            return CheckOutcome::Superseded;
        }

        state.loading = false;
        match result {
            Ok(card) => {
                let outcome = match &card {
                    WeatherCard::Joke(_) => CheckOutcome::Joked,
                    _ => CheckOutcome::Reported,
                };
                state.card = card;
                outcome
            }
            Err(e) => {
                tracing::info!("check failed: {}", e);
                state.error = Some(e.to_string());
                CheckOutcome::Failed
            }
        }
    }

    /// True while a lookup is in flight.
    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    /// Snapshot of the current state for rendering.
    pub fn view(&self) -> ViewState {
        let detection = match self.detected.get() {
            Some(Some(place)) => Detection::Detected(place.clone()),
            Some(None) => Detection::Failed,
            None if self.detect_started.load(Ordering::SeqCst) => Detection::Detecting,
            None => Detection::Idle,
        };
        let state = self.state.lock();
        ViewState {
            detection,
            error: state.error.clone(),
            card: state.card.clone(),
            loading: state.loading,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use tokio::sync::Notify;

    use super::*;
    use crate::location::{Coordinates, FixedPosition, NoLocation};

    #[derive(Default)]
    struct FakeClient {
        reverse: Option<DetectedPlace>,
        forward: Option<GeocodedPlace>,
        weather: Option<CurrentWeatherReading>,
        // When set, forward_geocode waits for one notification.
        gate: Option<Arc<Notify>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn paris() -> Self {
            FakeClient {
                forward: Some(GeocodedPlace {
                    name: "Paris".into(),
                    lat: 48.85,
                    lon: 2.35,
                    country: Some("France".into()),
                }),
                weather: Some(CurrentWeatherReading {
                    code: 61,
                    temperature: 15.4,
                    apparent_temperature: 14.6,
                    wind_speed: 11.9,
                    time: None,
                }),
                ..Default::default()
            }
        }

        fn detecting(mut self, name: &str, country: Option<&str>) -> Self {
            self.reverse = Some(DetectedPlace {
                name: name.into(),
                country: country.map(Into::into),
            });
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl GeoWeatherClient for FakeClient {
        async fn reverse_geocode(
            &self,
            lat: f64,
            lon: f64,
        ) -> Result<DetectedPlace, GeoWeatherError> {
            self.calls.lock().push(format!("reverse {lat},{lon}"));
            self.reverse
                .clone()
                .ok_or(GeoWeatherError::ReverseGeocodeFailed(StatusCode::NOT_FOUND))
        }

        async fn forward_geocode(&self, name: &str) -> Result<GeocodedPlace, GeoWeatherError> {
            self.calls.lock().push(format!("forward {name}"));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.forward.clone().ok_or(GeoWeatherError::CityNotFound)
        }

        async fn fetch_current_weather(
            &self,
            lat: f64,
            lon: f64,
        ) -> Result<CurrentWeatherReading, GeoWeatherError> {
            self.calls.lock().push(format!("weather {lat},{lon}"));
            self.weather
                .clone()
                .ok_or(GeoWeatherError::WeatherFetchFailed)
        }
    }

    const COLOMBO: Coordinates = Coordinates {
        lat: 6.93,
        lon: 79.85,
    };

    /// Locator that never answers.
    struct Silent;

    #[async_trait]
    impl LocationProvider for Silent {
        async fn request_current_position(
            &self,
            _options: &PositionOptions,
        ) -> Result<Coordinates, LocationError> {
            std::future::pending().await
        }
    }

    fn report_card(view: &ViewState) -> &Report {
        match &view.card {
            WeatherCard::Report(report) => report,
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn report_for_paris() {
        let controller = LocationWeatherController::new(FakeClient::paris(), NoLocation);
        assert_eq!(controller.check("Paris").await, CheckOutcome::Reported);

        let view = controller.view();
        let report = report_card(&view);
        assert_eq!(report.title, "Paris (France)");
        assert_eq!(report.desc, "Light rain");
        assert_eq!(report.temp, 15);
        assert_eq!(report.feels, 15);
        assert_eq!(report.wind, 12);
        assert_eq!(view.error, None);
        assert!(!view.loading);
        assert_eq!(
            controller.client.calls(),
            vec!["forward Paris", "weather 48.85,2.35"]
        );
    }

    #[tokio::test]
    async fn title_omits_missing_country() {
        let mut client = FakeClient::paris();
        if let Some(place) = client.forward.as_mut() {
            place.name = "Atlantis".into();
            place.country = None;
        }
        let controller = LocationWeatherController::new(client, NoLocation);
        controller.check("Atlantis").await;
        assert_eq!(report_card(&controller.view()).title, "Atlantis");
    }

    #[tokio::test]
    async fn title_omits_empty_country() {
        let mut client = FakeClient::paris();
        if let Some(place) = client.forward.as_mut() {
            place.country = Some(String::new());
        }
        let controller = LocationWeatherController::new(client, NoLocation);
        controller.check("Paris").await;
        assert_eq!(report_card(&controller.view()).title, "Paris");
    }

    #[tokio::test]
    async fn unknown_code_is_dash() {
        let mut client = FakeClient::paris();
        if let Some(reading) = client.weather.as_mut() {
            reading.code = 999;
        }
        let controller = LocationWeatherController::new(client, NoLocation);
        assert_eq!(controller.check("Paris").await, CheckOutcome::Reported);
        assert_eq!(report_card(&controller.view()).desc, "—");
    }

    #[tokio::test]
    async fn rounding_is_to_nearest() {
        let mut client = FakeClient::paris();
        if let Some(reading) = client.weather.as_mut() {
            reading.temperature = -0.4;
            reading.apparent_temperature = -2.5;
            reading.wind_speed = 0.5;
        }
        let controller = LocationWeatherController::new(client, NoLocation);
        controller.check("Paris").await;
        let view = controller.view();
        let report = report_card(&view);
        assert_eq!(report.temp, 0);
        assert_eq!(report.feels, -3);
        assert_eq!(report.wind, 1);
    }

    #[tokio::test]
    async fn empty_input_is_validation_error_without_requests() {
        let controller = LocationWeatherController::new(FakeClient::paris(), NoLocation);
        for input in ["", "   ", "\t\n"] {
            assert_eq!(controller.check(input).await, CheckOutcome::Failed);
            let view = controller.view();
            assert_eq!(view.error.as_deref(), Some("Please type a city"));
            assert_eq!(view.card, WeatherCard::Absent);
            assert!(!view.loading);
        }
        assert!(controller.client.calls().is_empty());
    }

    #[tokio::test]
    async fn validation_clears_previous_card() {
        let controller = LocationWeatherController::new(FakeClient::paris(), NoLocation);
        controller.check("Paris").await;
        controller.check(" ").await;
        let view = controller.view();
        assert_eq!(view.card, WeatherCard::Absent);
        assert!(view.error.is_some());
    }

    #[tokio::test]
    async fn city_not_found_sets_error() {
        let controller = LocationWeatherController::new(FakeClient::default(), NoLocation);
        assert_eq!(controller.check("Atlantis").await, CheckOutcome::Failed);

        let view = controller.view();
        assert_eq!(view.error.as_deref(), Some("City not found"));
        assert_eq!(view.card, WeatherCard::Absent);
        assert!(!view.loading);
        assert_eq!(controller.client.calls(), vec!["forward Atlantis"]);
    }

    #[tokio::test]
    async fn weather_failure_sets_error() {
        let mut client = FakeClient::paris();
        client.weather = None;
        let controller = LocationWeatherController::new(client, NoLocation);
        assert_eq!(controller.check("Paris").await, CheckOutcome::Failed);

        let view = controller.view();
        assert_eq!(view.error.as_deref(), Some("Weather fetch failed"));
        assert_eq!(view.card, WeatherCard::Absent);
        assert!(!view.loading);
    }

    #[tokio::test]
    async fn new_check_clears_previous_error() {
        let controller = LocationWeatherController::new(FakeClient::paris(), NoLocation);
        controller.check("").await;
        assert!(controller.view().error.is_some());

        controller.check("Paris").await;
        let view = controller.view();
        assert_eq!(view.error, None);
        assert!(matches!(view.card, WeatherCard::Report(_)));
    }

    #[tokio::test]
    async fn same_city_jokes_without_requests() {
        let client = FakeClient::paris().detecting("Colombo", Some("Sri Lanka"));
        let controller = LocationWeatherController::new(client, FixedPosition(COLOMBO));
        assert!(controller.detect().await.is_some());

        assert_eq!(controller.check("  colombo ").await, CheckOutcome::Joked);
        let view = controller.view();
        match &view.card {
            WeatherCard::Joke(joke) => {
                assert_eq!(joke, "You are literally in colombo. Just go look outside!");
                assert!(!joke.contains("Colombo"));
            }
            other => panic!("expected joke, got {other:?}"),
        }
        assert_eq!(view.error, None);
        assert!(!view.loading);
        // Only the detection lookup went out
        assert_eq!(controller.client.calls(), vec!["reverse 6.93,79.85"]);
    }

    #[tokio::test]
    async fn same_city_ignores_country() {
        let client = FakeClient::paris().detecting("Georgetown", Some("Guyana"));
        let controller = LocationWeatherController::new(client, FixedPosition(COLOMBO));
        controller.detect().await;
        assert_eq!(controller.check("GEORGETOWN").await, CheckOutcome::Joked);
    }

    #[tokio::test]
    async fn other_city_is_looked_up_when_detected() {
        let client = FakeClient::paris().detecting("Colombo", None);
        let controller = LocationWeatherController::new(client, FixedPosition(COLOMBO));
        controller.detect().await;
        assert_eq!(controller.check("Paris").await, CheckOutcome::Reported);
    }

    #[tokio::test]
    async fn no_detection_always_looks_up() {
        let controller = LocationWeatherController::new(FakeClient::paris(), NoLocation);
        controller.detect().await;
        controller.check("Colombo").await;
        assert_eq!(
            controller.client.calls().first().map(String::as_str),
            Some("forward Colombo")
        );
    }

    #[tokio::test]
    async fn check_before_detection_does_not_joke() {
        let client = FakeClient::paris().detecting("Colombo", None);
        let controller = LocationWeatherController::new(client, FixedPosition(COLOMBO));
        assert_eq!(controller.check("Colombo").await, CheckOutcome::Reported);
    }

    #[tokio::test]
    async fn loading_only_while_lookup_in_flight() {
        let gate = Arc::new(Notify::new());
        let client = FakeClient {
            gate: Some(gate.clone()),
            ..FakeClient::paris()
        };
        let controller = LocationWeatherController::new(client, NoLocation);
        assert!(!controller.is_loading());

        let (outcome, ()) = tokio::join!(controller.check("Paris"), async {
            while !controller.is_loading() {
                tokio::task::yield_now().await;
            }
            // In flight: nothing settled yet
            let view = controller.view();
            assert_eq!(view.card, WeatherCard::Absent);
            assert_eq!(view.error, None);
            gate.notify_one();
        });

        assert_eq!(outcome, CheckOutcome::Reported);
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn superseded_check_is_dropped() {
        let gate = Arc::new(Notify::new());
        let client = FakeClient {
            gate: Some(gate.clone()),
            ..FakeClient::paris()
        };
        let controller = LocationWeatherController::new(client, NoLocation);

        let (first, second) = tokio::join!(controller.check("Paris"), async {
            while !controller.is_loading() {
                tokio::task::yield_now().await;
            }
            let outcome = controller.check("").await;
            gate.notify_one();
            outcome
        });

        assert_eq!(first, CheckOutcome::Superseded);
        assert_eq!(second, CheckOutcome::Failed);
        let view = controller.view();
        assert_eq!(view.error.as_deref(), Some("Please type a city"));
        assert_eq!(view.card, WeatherCard::Absent);
        assert!(!view.loading);
    }

    #[tokio::test]
    async fn detection_success() {
        let client = FakeClient::default().detecting("Colombo", Some("Sri Lanka"));
        let controller = LocationWeatherController::new(client, FixedPosition(COLOMBO));
        assert_eq!(controller.view().detection, Detection::Idle);

        let place = controller.detect().await.cloned();
        assert_eq!(place.as_ref().map(|p| p.name.as_str()), Some("Colombo"));
        assert!(matches!(
            controller.view().detection,
            Detection::Detected(ref p) if p.country.as_deref() == Some("Sri Lanka")
        ));
    }

    #[tokio::test]
    async fn detection_runs_once() {
        let client = FakeClient::default().detecting("Colombo", None);
        let controller = LocationWeatherController::new(client, FixedPosition(COLOMBO));
        controller.detect().await;
        controller.detect().await;
        assert_eq!(controller.client.calls().len(), 1);
    }

    #[tokio::test]
    async fn detection_without_location_is_silent() {
        let controller = LocationWeatherController::new(FakeClient::default(), NoLocation);
        assert!(controller.detect().await.is_none());

        let view = controller.view();
        assert_eq!(view.detection, Detection::Failed);
        assert_eq!(view.error, None);
        assert!(controller.client.calls().is_empty());
    }

    #[tokio::test]
    async fn reverse_geocode_failure_is_silent() {
        let controller =
            LocationWeatherController::new(FakeClient::default(), FixedPosition(COLOMBO));
        assert!(controller.detect().await.is_none());

        let view = controller.view();
        assert_eq!(view.detection, Detection::Failed);
        assert_eq!(view.error, None);
    }

    #[tokio::test]
    async fn blank_detected_name_counts_as_failure() {
        let client = FakeClient::default().detecting("  ", None);
        let controller = LocationWeatherController::new(client, FixedPosition(COLOMBO));
        assert!(controller.detect().await.is_none());
        assert_eq!(controller.view().detection, Detection::Failed);
    }

    #[tokio::test]
    async fn detection_times_out() {
        let options = PositionOptions {
            timeout: Duration::from_millis(20),
            ..PositionOptions::default()
        };
        let controller = LocationWeatherController::new(FakeClient::default(), Silent)
            .with_position_options(options);

        let (place, ()) = tokio::join!(controller.detect(), async {
            while controller.view().detection == Detection::Idle {
                tokio::task::yield_now().await;
            }
            assert_eq!(controller.view().detection, Detection::Detecting);
        });
        assert!(place.is_none());
        assert_eq!(controller.view().detection, Detection::Failed);
    }
}
