use crate::config::Config;
use crate::error::FlightSearchError;
use crate::model::{SearchQuery, TripType};
use reqwest::StatusCode;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, error, info, instrument};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of raw itinerary data.
pub trait FlightProvider: Send + Sync {
    /// Runs one search and returns the provider's response body.
    fn search(
        &self,
        query: &SearchQuery,
        currency: &str,
    ) -> impl Future<Output = Result<Value, FlightSearchError>> + Send + Sync;
}

/// Google Flights results through SerpAPI
#[derive(Debug, Clone)]
pub struct SerpApiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    language: String,
    country: String,
}

impl SerpApiProvider {
    pub fn from_config(config: &Config) -> Result<Self, FlightSearchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FlightSearchError::HttpRequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key()?.to_string(),
            base_url: config.provider_url.clone(),
            language: config.language.clone(),
            country: config.country.clone(),
        })
    }

    /// Query parameters for a search, without the API key
    fn query_params(&self, query: &SearchQuery, currency: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("engine", "google_flights".to_string()),
            ("hl", self.language.clone()),
            ("gl", self.country.clone()),
            ("departure_id", query.origin.clone()),
            ("arrival_id", query.destination.clone()),
            ("outbound_date", query.outbound_date.format(DATE_FORMAT).to_string()),
            ("type", query.trip_type.provider_code().to_string()),
            ("adults", query.passengers.to_string()),
            ("currency", currency.to_string()),
        ];
        if let (TripType::RoundTrip, Some(return_date)) = (query.trip_type, query.return_date) {
            params.push(("return_date", return_date.format(DATE_FORMAT).to_string()));
        }
        params
    }
}

impl FlightProvider for SerpApiProvider {
    #[instrument(name = "call_flight_provider", skip(self))]
    async fn search(&self, query: &SearchQuery, currency: &str) -> Result<Value, FlightSearchError> {
        let params = self.query_params(query, currency);
        info!("Calling Google Flights search with: {:?}", params);
        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FlightSearchError::HttpRequestFailed("provider request timed out".to_string())
                } else {
                    FlightSearchError::HttpRequestFailed(e.without_url().to_string())
                }
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FlightSearchError::HttpRequestFailed(e.without_url().to_string()))?;
        if !status.is_success() {
            error!(
                "Flight search call failed with status {}: response: {}",
                status, text
            );
            let detail = if status == StatusCode::TOO_MANY_REQUESTS {
                "rate limit exceeded".to_string()
            } else {
                provider_error_message(&text).unwrap_or(text)
            };
            return Err(FlightSearchError::ApiError(format!(
                "Status: {}, Response: {}",
                status, detail
            )));
        }
        let data = parse_body(&text)?;
        debug!("Parsed flight search response");
        Ok(data)
    }
}

/// Parses a successful response body, surfacing provider-reported errors
fn parse_body(text: &str) -> Result<Value, FlightSearchError> {
    let data: Value = serde_json::from_str(text)
        .map_err(|e| FlightSearchError::InvalidResponse(e.to_string()))?;
    if !data.is_object() {
        return Err(FlightSearchError::InvalidResponse(
            "expected a JSON object".to_string(),
        ));
    }
    if let Some(message) = data.get("error") {
        let message = message
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| message.to_string());
        return Err(FlightSearchError::ApiError(message));
    }
    Ok(data)
}

fn provider_error_message(text: &str) -> Option<String> {
    serde_json::from_str::<Value>(text)
        .ok()?
        .get("error")?
        .as_str()
        .map(str::to_string)
}
