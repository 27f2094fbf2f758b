use crate::error::FlightSearchError;
use crate::filter::{FilterCriteria, FlightFilter, SortKey, SortOrder, TimeRange};
use crate::model::FlightSummary;
use crate::provider::FlightProvider;
use crate::search::{SearchClient, SearchRequest};
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// Reply envelope handed back to the model.
///
/// Failures are replies too, so no error ever crosses the tool boundary.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolReply<T> {
    Success(T),
    Error { error: String },
}

impl<T> ToolReply<T> {
    fn from_result(result: Result<T, FlightSearchError>) -> Self {
        match result {
            Ok(value) => ToolReply::Success(value),
            Err(e) => {
                match &e {
                    FlightSearchError::CorruptData { .. } | FlightSearchError::Storage(_) => {
                        error!("Tool call failed: {}", e)
                    }
                    _ => warn!("Tool call failed: {}", e),
                }
                ToolReply::Error {
                    error: e.user_message(),
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchReply {
    pub search_id: String,
    pub flights_count: usize,
    pub currency: String,
    pub summary: String,
    pub path: PathBuf,
}

pub struct SearchFlightsTool<P> {
    client: Arc<SearchClient<P>>,
}

impl<P> SearchFlightsTool<P> {
    pub fn new(client: Arc<SearchClient<P>>) -> Self {
        Self { client }
    }
}

impl<P: FlightProvider + 'static> Tool for SearchFlightsTool<P> {
    const NAME: &'static str = "search_flights";
    type Error = FlightSearchError;
    type Args = SearchRequest;
    type Output = ToolReply<SearchReply>;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search for flights between two airports and cache the results under a search_id"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "origin": { "type": "string", "description": "Departure airport IATA code (e.g., 'AUS')" },
                    "destination": { "type": "string", "description": "Arrival airport IATA code (e.g., 'BCN')" },
                    "date": { "type": "string", "description": "Departure date in 'YYYY-MM-DD' format" },
                    "return_date": { "type": "string", "description": "Return date in 'YYYY-MM-DD' format, round trips only" },
                    "trip_type": { "type": "string", "description": "Trip type; inferred from return_date when omitted", "enum": ["one-way", "round-trip"] },
                    "passengers": { "type": "integer", "description": "Number of adult passengers (default 1)", "minimum": 1, "maximum": 9 }
                },
                "required": ["origin", "destination", "date"]
            }),
        }
    }

    #[instrument(name = "call_search_flights_tool", skip(self))]
    async fn call(&self, args: SearchRequest) -> Result<Self::Output, FlightSearchError> {
        let result = self.client.search(args).await.map(|outcome| SearchReply {
            search_id: outcome.search_id,
            flights_count: outcome.flights_count,
            currency: outcome.currency,
            summary: outcome.summary,
            path: outcome.path,
        });
        Ok(ToolReply::from_result(result))
    }
}

/// Filter parameters provided by model
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterFlightsArgs {
    pub search_id: String,
    pub max_price: Option<f64>,
    pub max_stops: Option<u32>,
    pub airlines: Option<Vec<String>>,
    pub max_duration: Option<u32>,
    pub departure_time_range: Option<(String, String)>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl FilterFlightsArgs {
    pub fn criteria(&self) -> Result<FilterCriteria, FlightSearchError> {
        if self.max_price.is_some_and(|p| p.is_nan()) {
            return Err(FlightSearchError::Validation(
                "max_price must be a number".to_string(),
            ));
        }
        Ok(FilterCriteria {
            max_price: self.max_price,
            max_stops: self.max_stops,
            airlines: self.airlines.clone(),
            max_duration: self.max_duration,
            departure_time_range: self
                .departure_time_range
                .as_ref()
                .map(|(start, end)| TimeRange::parse(start, end))
                .transpose()?,
            sort_by: self
                .sort_by
                .as_deref()
                .map(str::parse::<SortKey>)
                .transpose()?,
            sort_order: self
                .sort_order
                .as_deref()
                .map(str::parse::<SortOrder>)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct FilterReply {
    pub search_id: String,
    pub filtered_count: usize,
    pub total_count: usize,
    pub flights: Vec<FlightSummary>,
}

pub struct FilterFlightsTool {
    filter: Arc<FlightFilter>,
}

impl FilterFlightsTool {
    pub fn new(filter: Arc<FlightFilter>) -> Self {
        Self { filter }
    }

    fn run(&self, args: &FilterFlightsArgs) -> Result<FilterReply, FlightSearchError> {
        let criteria = args.criteria()?;
        let filtered = self.filter.filter(&args.search_id, &criteria)?;
        Ok(FilterReply {
            search_id: args.search_id.clone(),
            filtered_count: filtered.flights.len(),
            total_count: filtered.total_count,
            flights: filtered.flights.iter().map(FlightSummary::from).collect(),
        })
    }
}

impl Tool for FilterFlightsTool {
    const NAME: &'static str = "filter_flights";
    type Error = FlightSearchError;
    type Args = FilterFlightsArgs;
    type Output = ToolReply<FilterReply>;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Filter and sort the cached results of a previous flight search".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "search_id": { "type": "string", "description": "search_id returned by search_flights" },
                    "max_price": { "type": "number", "description": "Maximum price, inclusive" },
                    "max_stops": { "type": "integer", "description": "Maximum number of stops (0 for non-stop)", "minimum": 0 },
                    "airlines": { "type": "array", "items": { "type": "string" }, "description": "Accept flights operated by any of these airlines" },
                    "max_duration": { "type": "integer", "description": "Maximum total duration in minutes", "minimum": 0 },
                    "departure_time_range": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 2,
                        "maxItems": 2,
                        "description": "Earliest and latest departure time as ['HH:MM', 'HH:MM']"
                    },
                    "sort_by": { "type": "string", "description": "Sort key", "enum": ["price", "duration", "stops", "departure_time"] },
                    "sort_order": { "type": "string", "description": "Sort direction (default asc)", "enum": ["asc", "desc"] }
                },
                "required": ["search_id"]
            }),
        }
    }

    #[instrument(name = "call_filter_flights_tool", skip(self))]
    async fn call(&self, args: FilterFlightsArgs) -> Result<Self::Output, FlightSearchError> {
        Ok(ToolReply::from_result(self.run(&args)))
    }
}
