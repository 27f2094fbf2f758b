use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

impl TripType {
    /// Provider code for the trip type (1 round trip, 2 one way).
    pub fn provider_code(self) -> u8 {
        match self {
            TripType::RoundTrip => 1,
            TripType::OneWay => 2,
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripType::OneWay => write!(f, "one-way"),
            TripType::RoundTrip => write!(f, "round-trip"),
        }
    }
}

impl FromStr for TripType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "oneway" | "single" => Ok(TripType::OneWay),
            "roundtrip" | "return" => Ok(TripType::RoundTrip),
            _ => Err(format!("unrecognized trip type '{}'", s.trim())),
        }
    }
}

/// A validated flight search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub outbound_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub trip_type: TripType,
    pub passengers: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportStop {
    pub name: String,
    pub id: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSegment {
    pub airline: String,
    pub flight_number: String,
    pub airplane: String,
    pub travel_class: String,
    pub departure_airport: AirportStop,
    pub arrival_airport: AirportStop,
    pub duration: u32,
    pub legroom: String,
    pub overnight: bool,
    pub often_delayed_by_over_30_min: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarbonEmissions {
    pub this_flight: Option<u64>,
    pub typical_for_this_route: Option<u64>,
    pub difference_percent: Option<i64>,
}

/// One offered itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightResult {
    pub price: f64,
    pub currency: String,
    /// Total journey duration in minutes, layovers included.
    pub total_duration: u32,
    pub stops: u32,
    pub airline: String,
    pub legroom: String,
    pub carbon_emissions: CarbonEmissions,
    #[serde(rename = "type")]
    pub itinerary_type: String,
    pub airline_logo: String,
    pub segments: Vec<FlightSegment>,
    pub departure: AirportStop,
    pub arrival: AirportStop,
}

impl FlightResult {
    /// Distinct airlines across all segments, in segment order.
    pub fn airlines(&self) -> Vec<&str> {
        let mut airlines: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if !airlines.contains(&segment.airline.as_str()) {
                airlines.push(segment.airline.as_str());
            }
        }
        airlines
    }

    /// Local clock time of the first departure.
    pub fn departure_clock(&self) -> Option<NaiveTime> {
        parse_clock(&self.departure.time)
    }
}

/// Parses the clock part of a provider time such as "2025-03-14 07:45".
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    let clock = value.rsplit(' ').next().unwrap_or(value);
    NaiveTime::parse_from_str(clock, "%H:%M").ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultSet {
    pub search_id: String,
    pub created_at: DateTime<Utc>,
    pub query: SearchQuery,
    pub currency: String,
    pub flights: Vec<FlightResult>,
}

/// Compact view of a flight handed back to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSummary {
    pub airline: String,
    pub flight_numbers: Vec<String>,
    pub departure: String,
    pub arrival: String,
    pub price: f64,
    pub currency: String,
    pub duration: String,
    pub stops: u32,
    pub legroom: String,
    pub carbon_emissions_grams: Option<u64>,
}

impl From<&FlightResult> for FlightSummary {
    fn from(flight: &FlightResult) -> Self {
        FlightSummary {
            airline: flight.airlines().join(" / "),
            flight_numbers: flight
                .segments
                .iter()
                .map(|s| s.flight_number.clone())
                .filter(|n| !n.is_empty())
                .collect(),
            departure: format!("{} {}", flight.departure.id, flight.departure.time),
            arrival: format!("{} {}", flight.arrival.id, flight.arrival.time),
            price: flight.price,
            currency: flight.currency.clone(),
            duration: format_duration(flight.total_duration),
            stops: flight.stops,
            legroom: flight.legroom.clone(),
            carbon_emissions_grams: flight.carbon_emissions.this_flight,
        }
    }
}

pub fn format_duration(minutes: u32) -> String {
    format!("{} hours {} minutes", minutes / 60, minutes % 60)
}
