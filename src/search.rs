use crate::error::FlightSearchError;
use crate::metrics::{inc_cache_entries_removed, inc_flight_search_error, inc_flight_search_success};
use crate::model::{
    AirportStop, CarbonEmissions, FlightResult, FlightSegment, SearchQuery, TripType,
    format_duration,
};
use crate::provider::FlightProvider;
use crate::storage::FlightSearchStorage;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";
const MAX_PASSENGERS: u8 = 9;

/// Unvalidated search parameters as supplied by the model
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub origin: String,
    pub destination: String,
    pub date: String,
    pub return_date: Option<String>,
    pub trip_type: Option<String>,
    pub passengers: Option<u8>,
}

/// What a successful search hands back
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub search_id: String,
    pub flights_count: usize,
    pub currency: String,
    pub summary: String,
    pub path: PathBuf,
}

/// Runs provider searches and caches the normalized results.
pub struct SearchClient<P> {
    provider: P,
    storage: Arc<FlightSearchStorage>,
    currency: String,
    max_age: chrono::Duration,
}

impl<P: FlightProvider> SearchClient<P> {
    pub fn new(
        provider: P,
        storage: Arc<FlightSearchStorage>,
        currency: impl Into<String>,
        max_age: chrono::Duration,
    ) -> Self {
        Self {
            provider,
            storage,
            currency: currency.into(),
            max_age,
        }
    }

    /// Validates `request`, queries the provider and stores the results under a new search id.
    ///
    /// Nothing is written unless the provider call and normalization both succeed.
    #[instrument(name = "search_flights", skip(self))]
    pub async fn search(&self, request: SearchRequest) -> Result<SearchOutcome, FlightSearchError> {
        let result = self.run(request).await;
        match &result {
            Ok(outcome) => {
                inc_flight_search_success();
                info!(
                    "Search {} stored {} flight(s)",
                    outcome.search_id, outcome.flights_count
                );
            }
            Err(e) => {
                inc_flight_search_error(e);
                warn!("Flight search failed: {}", e);
            }
        }
        result
    }

    async fn run(&self, request: SearchRequest) -> Result<SearchOutcome, FlightSearchError> {
        let query = validate_request(&request)?;
        info!(
            "Searching flights from {} to {} on {}",
            query.origin, query.destination, query.outbound_date
        );
        let response = self.provider.search(&query, &self.currency).await?;
        let flights = normalize_response(&response, &self.currency)?;

        // Expired entries go before a new one is added
        match self.storage.cleanup(self.max_age) {
            Ok(removed) => inc_cache_entries_removed(removed),
            Err(e) => warn!("Cache cleanup failed: {}", e),
        }

        let search_id = self.storage.save(&query, &self.currency, &flights)?;
        Ok(SearchOutcome {
            path: self.storage.path_for(&search_id),
            summary: summarize(&query, &flights),
            flights_count: flights.len(),
            currency: self.currency.clone(),
            search_id,
        })
    }
}

/// Checks a raw request and turns it into a [`SearchQuery`].
pub fn validate_request(request: &SearchRequest) -> Result<SearchQuery, FlightSearchError> {
    let origin = airport_code(&request.origin, "origin")?;
    let destination = airport_code(&request.destination, "destination")?;
    if origin == destination {
        return Err(FlightSearchError::Validation(format!(
            "origin and destination are both {}",
            origin
        )));
    }
    let outbound_date = parse_date(&request.date, "date")?;
    let return_date = match request.return_date.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Some(parse_date(value, "return_date")?),
        _ => None,
    };
    let trip_type = match request.trip_type.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => value
            .parse::<TripType>()
            .map_err(FlightSearchError::Validation)?,
        _ if return_date.is_some() => TripType::RoundTrip,
        _ => TripType::OneWay,
    };
    match (trip_type, return_date) {
        (TripType::RoundTrip, None) => {
            return Err(FlightSearchError::Validation(
                "a round-trip search needs a return_date".to_string(),
            ));
        }
        (TripType::OneWay, Some(_)) => {
            return Err(FlightSearchError::Validation(
                "a one-way search cannot have a return_date".to_string(),
            ));
        }
        (TripType::RoundTrip, Some(back)) if back < outbound_date => {
            return Err(FlightSearchError::Validation(format!(
                "return_date {} is before departure date {}",
                back, outbound_date
            )));
        }
        _ => {}
    }
    let passengers = request.passengers.unwrap_or(1);
    if !(1..=MAX_PASSENGERS).contains(&passengers) {
        return Err(FlightSearchError::Validation(format!(
            "passengers must be between 1 and {}",
            MAX_PASSENGERS
        )));
    }
    Ok(SearchQuery {
        origin,
        destination,
        outbound_date,
        return_date,
        trip_type,
        passengers,
    })
}

fn airport_code(value: &str, field: &str) -> Result<String, FlightSearchError> {
    let code = value.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(FlightSearchError::Validation(format!(
            "{} '{}' is not a 3-letter IATA airport code",
            field,
            value.trim()
        )));
    }
    Ok(code)
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, FlightSearchError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        FlightSearchError::Validation(format!(
            "{} '{}' is not a YYYY-MM-DD date",
            field,
            value.trim()
        ))
    })
}

/// Maps a provider response to flight results, best flights first, in provider order.
pub fn normalize_response(
    response: &Value,
    currency: &str,
) -> Result<Vec<FlightResult>, FlightSearchError> {
    let itineraries = ["best_flights", "other_flights"]
        .iter()
        .filter_map(|key| response.get(*key).and_then(|v| v.as_array()))
        .flatten();
    let mut flights = Vec::new();
    for itinerary in itineraries {
        let segments = match itinerary.get("flights").and_then(|f| f.as_array()) {
            Some(segments) if !segments.is_empty() => segments
                .iter()
                .map(normalize_segment)
                .collect::<Result<Vec<_>, _>>()?,
            _ => continue,
        };
        let Some(price) = itinerary.get("price").and_then(|p| p.as_f64()) else {
            debug!("Skipping itinerary without a price");
            continue;
        };
        let first = &segments[0];
        let last = &segments[segments.len() - 1];
        let total_duration = itinerary
            .get("total_duration")
            .and_then(|d| d.as_u64())
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or_else(|| {
                segments
                    .iter()
                    .fold(0u32, |total, s| total.saturating_add(s.duration))
            });
        let emissions = itinerary.get("carbon_emissions");
        flights.push(FlightResult {
            price,
            currency: currency.to_string(),
            total_duration,
            stops: (segments.len() - 1) as u32,
            airline: first.airline.clone(),
            legroom: first.legroom.clone(),
            carbon_emissions: CarbonEmissions {
                this_flight: emissions
                    .and_then(|e| e.get("this_flight"))
                    .and_then(|v| v.as_u64()),
                typical_for_this_route: emissions
                    .and_then(|e| e.get("typical_for_this_route"))
                    .and_then(|v| v.as_u64()),
                difference_percent: emissions
                    .and_then(|e| e.get("difference_percent"))
                    .and_then(|v| v.as_i64()),
            },
            itinerary_type: str_field(itinerary, "type"),
            airline_logo: str_field(itinerary, "airline_logo"),
            departure: first.departure_airport.clone(),
            arrival: last.arrival_airport.clone(),
            segments,
        });
    }
    Ok(flights)
}

fn normalize_segment(segment: &Value) -> Result<FlightSegment, FlightSearchError> {
    Ok(FlightSegment {
        airline: str_field(segment, "airline"),
        flight_number: str_field(segment, "flight_number"),
        airplane: str_field(segment, "airplane"),
        travel_class: str_field(segment, "travel_class"),
        departure_airport: airport(segment, "departure_airport")?,
        arrival_airport: airport(segment, "arrival_airport")?,
        duration: segment
            .get("duration")
            .and_then(|d| d.as_u64())
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(0),
        legroom: str_field(segment, "legroom"),
        overnight: bool_field(segment, "overnight"),
        often_delayed_by_over_30_min: bool_field(segment, "often_delayed_by_over_30_min"),
    })
}

fn airport(segment: &Value, key: &str) -> Result<AirportStop, FlightSearchError> {
    let stop = segment
        .get(key)
        .ok_or_else(|| FlightSearchError::InvalidResponse(format!("segment without {}", key)))?;
    let id = stop.get("id").and_then(|v| v.as_str()).ok_or_else(|| {
        FlightSearchError::InvalidResponse(format!("{} without an airport id", key))
    })?;
    let time = stop.get("time").and_then(|v| v.as_str()).ok_or_else(|| {
        FlightSearchError::InvalidResponse(format!("{} without a time", key))
    })?;
    Ok(AirportStop {
        name: str_field(stop, "name"),
        id: id.to_string(),
        time: time.to_string(),
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// One-line overview of a result set for the assistant
pub fn summarize(query: &SearchQuery, flights: &[FlightResult]) -> String {
    if flights.is_empty() {
        return "No flights found for the given criteria.".to_string();
    }
    let mut summary = format!(
        "Found {} {} flight(s) from {} to {} on {}",
        flights.len(),
        query.trip_type,
        query.origin,
        query.destination,
        query.outbound_date
    );
    if let Some(back) = query.return_date {
        summary.push_str(&format!(" returning {}", back));
    }
    summary.push('.');
    if let Some(cheapest) = flights.iter().min_by(|a, b| a.price.total_cmp(&b.price)) {
        summary.push_str(&format!(
            " Cheapest: {:.2} {} ({}).",
            cheapest.price, cheapest.currency, cheapest.airline
        ));
    }
    if let Some(fastest) = flights.iter().min_by_key(|f| f.total_duration) {
        summary.push_str(&format!(
            " Fastest: {} ({}).",
            format_duration(fastest.total_duration),
            fastest.airline
        ));
    }
    let non_stop = flights.iter().filter(|f| f.stops == 0).count();
    summary.push_str(&format!(" Non-stop options: {}.", non_stop));
    summary
}
