use crate::error::FlightSearchError;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// SerpAPI key for the Google Flights engine
    #[arg(long, env = "SERPAPI_KEY", hide_env_values = true)]
    pub serpapi_key: Option<String>,

    /// Directory holding temporary search results (defaults to <tmp>/flight-searches)
    #[arg(long, env = "TEMP_FLIGHT_SEARCH_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Age in hours after which cached search results are deleted
    #[arg(long, env = "FLIGHT_CACHE_MAX_AGE_HOURS", default_value = "24")]
    pub max_age_hours: u64,

    /// Currency code for prices
    #[arg(long, env = "FLIGHT_CURRENCY", default_value = "USD")]
    pub currency: String,

    /// Provider language
    #[arg(long, env = "FLIGHT_SEARCH_LANGUAGE", default_value = "en")]
    pub language: String,

    /// Provider country
    #[arg(long, env = "FLIGHT_SEARCH_COUNTRY", default_value = "us")]
    pub country: String,

    /// Flight search endpoint
    #[arg(
        long,
        env = "SERPAPI_BASE_URL",
        default_value = "https://serpapi.com/search.json"
    )]
    pub provider_url: String,

    /// Timeout for a single provider request, in seconds
    #[arg(long, env = "FLIGHT_PROVIDER_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Model driving the `ask` command
    #[arg(long, env = "FLIGHT_ASSISTANT_MODEL", default_value = "gpt-4.1")]
    pub model: String,
}

impl Config {
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("flight-searches"))
    }

    pub fn max_age(&self) -> Result<chrono::Duration, FlightSearchError> {
        hours_to_duration(self.max_age_hours, "max_age_hours")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn api_key(&self) -> Result<&str, FlightSearchError> {
        self.serpapi_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(FlightSearchError::MissingApiKey)
    }

    /// Checks everything a search needs before any request is served.
    pub fn validate(&self) -> Result<(), FlightSearchError> {
        self.api_key()?;
        if self.max_age_hours == 0 {
            return Err(FlightSearchError::Validation(
                "max_age_hours must be greater than zero".to_string(),
            ));
        }
        self.max_age()?;
        if self.request_timeout_secs == 0 {
            return Err(FlightSearchError::Validation(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FlightSearchError::Validation(format!(
                "currency '{}' is not a 3-letter code",
                self.currency
            )));
        }
        Ok(())
    }
}

/// Converts an hour count from flags or env into a duration, rejecting values chrono cannot hold.
pub fn hours_to_duration(hours: u64, field: &str) -> Result<chrono::Duration, FlightSearchError> {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| {
            FlightSearchError::Validation(format!("{} value {} is too large", field, hours))
        })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serpapi_key: None,
            storage_dir: None,
            max_age_hours: 24,
            currency: "USD".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
            provider_url: "https://serpapi.com/search.json".to_string(),
            request_timeout_secs: 30,
            model: "gpt-4.1".to_string(),
        }
    }
}
