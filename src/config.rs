use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;

use crate::client::HttpGeoWeatherClient;
use crate::controller::LocationWeatherController;
use crate::location::{
    parse_coordinates, Coordinates, FixedPosition, IpLocator, LocationProvider, NoLocation,
    PositionOptions, DEFAULT_IP_LOCATOR_URL,
};

/// Controller wired to the HTTP backend and whichever locator was configured.
pub type Controller = LocationWeatherController<HttpGeoWeatherClient, Box<dyn LocationProvider>>;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Base address of the geocoding and weather backend
    #[arg(long, env = "WEATHER_API_BASE", value_name = "URL")]
    pub api_base: String,

    /// Use this position instead of detecting one
    #[arg(long, value_name = "LAT,LON", conflicts_with = "no_detect")]
    pub at: Option<String>,

    /// Don't try to detect the current city
    #[arg(long)]
    pub no_detect: bool,

    /// IP geolocation service used to detect the current position
    #[arg(long, value_name = "URL", default_value = DEFAULT_IP_LOCATOR_URL)]
    pub ip_locator: String,

    /// Seconds to wait for a position before giving up on detection
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub detect_timeout: u64,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Where the current position comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationSource {
    Fixed(Coordinates),
    Ip(String),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base: String,
    pub location: LocationSource,
    pub position: PositionOptions,
}

impl Settings {
    pub fn from_args(args: &GlobalArgs) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(&args.api_base)
            .with_context(|| format!("invalid API base address {:?}", args.api_base))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("API base address must use http or https: {}", args.api_base);
        }

        let location = match &args.at {
            _ if args.no_detect => LocationSource::Disabled,
            Some(at) => LocationSource::Fixed(
                parse_coordinates(at)
                    .with_context(|| format!("invalid position {at:?}, expected LAT,LON"))?,
            ),
            None => LocationSource::Ip(args.ip_locator.clone()),
        };

        Ok(Settings {
            api_base: args.api_base.clone(),
            location,
            position: PositionOptions {
                timeout: Duration::from_secs(args.detect_timeout),
                ..PositionOptions::default()
            },
        })
    }

    pub fn locator(&self) -> anyhow::Result<Box<dyn LocationProvider>> {
        Ok(match &self.location {
            LocationSource::Fixed(coords) => Box::new(FixedPosition(*coords)),
            LocationSource::Ip(url) => {
                Box::new(IpLocator::new(url.as_str()).context("failed to build HTTP client")?)
            }
            LocationSource::Disabled => Box::new(NoLocation),
        })
    }

    pub fn controller(&self) -> anyhow::Result<Controller> {
        let client =
            HttpGeoWeatherClient::new(&self.api_base).context("failed to build HTTP client")?;
        Ok(LocationWeatherController::new(client, self.locator()?)
            .with_position_options(self.position))
    }
}
