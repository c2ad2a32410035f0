/// Placeholder shown for weather codes that have no description.
pub const UNKNOWN_DESCRIPTION: &str = "—";

/// WMO weather code as reported in the `current.weather_code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WmoCode(pub i64);

impl WmoCode {
    /// Return the human-readable description for this code.
    ///
    /// Codes outside the table (e.g. the freezing variants or hail
    /// thunderstorms) fall back to [`UNKNOWN_DESCRIPTION`].
    pub fn description(self) -> &'static str {
        match self.0 {
            0 => "Clear sky",
            1 => "Mainly clear",
            2 => "Partly cloudy",
            3 => "Overcast",
            45 => "Fog",
            48 => "Depositing rime fog",
            51 => "Light drizzle",
            53 => "Drizzle",
            55 => "Heavy drizzle",
            61 => "Light rain",
            63 => "Rain",
            65 => "Heavy rain",
            71 => "Light snow",
            73 => "Snow",
            75 => "Heavy snow",
            80 | 81 => "Rain showers",
            82 => "Heavy showers",
            95 => "Thunderstorm",
            _ => UNKNOWN_DESCRIPTION,
        }
    }
}

/// Describe a raw weather code. Never fails.
pub fn describe(code: i64) -> &'static str {
    WmoCode(code).description()
}
