use crate::error::FlightSearchError;
use crate::metrics::inc_flight_filter;
use crate::model::{FlightResult, parse_clock};
use crate::storage::FlightSearchStorage;
use chrono::NaiveTime;
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Price,
    Duration,
    Stops,
    DepartureTime,
}

impl FromStr for SortKey {
    type Err = FlightSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price" => Ok(SortKey::Price),
            "duration" => Ok(SortKey::Duration),
            "stops" => Ok(SortKey::Stops),
            "departure_time" | "departure" => Ok(SortKey::DepartureTime),
            other => Err(FlightSearchError::Validation(format!(
                "cannot sort by '{}', use price, duration, stops or departure_time",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = FlightSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            other => Err(FlightSearchError::Validation(format!(
                "unknown sort order '{}', use asc or desc",
                other
            ))),
        }
    }
}

/// Inclusive window on the local time of the first departure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn parse(start: &str, end: &str) -> Result<Self, FlightSearchError> {
        let parse = |value: &str| {
            parse_clock(value).ok_or_else(|| {
                FlightSearchError::Validation(format!("'{}' is not an HH:MM time", value))
            })
        };
        let range = TimeRange {
            start: parse(start)?,
            end: parse(end)?,
        };
        if range.start > range.end {
            return Err(FlightSearchError::Validation(format!(
                "departure window starts after it ends ({} > {})",
                range.start.format("%H:%M"),
                range.end.format("%H:%M")
            )));
        }
        Ok(range)
    }

    fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Conjunction of optional criteria plus an optional sort.
///
/// An unset criterion accepts everything. Without a sort key results stay in provider order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub max_price: Option<f64>,
    pub max_stops: Option<u32>,
    pub airlines: Option<Vec<String>>,
    pub max_duration: Option<u32>,
    pub departure_time_range: Option<TimeRange>,
    pub sort_by: Option<SortKey>,
    pub sort_order: SortOrder,
}

impl FilterCriteria {
    pub fn matches(&self, flight: &FlightResult) -> bool {
        if self.max_price.is_some_and(|max| flight.price > max) {
            return false;
        }
        if self.max_stops.is_some_and(|max| flight.stops > max) {
            return false;
        }
        if self.max_duration.is_some_and(|max| flight.total_duration > max) {
            return false;
        }
        if let Some(allowed) = self.allowed_airlines() {
            let any_allowed = flight
                .airlines()
                .iter()
                .any(|airline| allowed.contains(&airline.trim().to_lowercase()));
            if !any_allowed {
                return false;
            }
        }
        if let Some(range) = &self.departure_time_range {
            match flight.departure_clock() {
                Some(time) if range.contains(time) => {}
                _ => return false,
            }
        }
        true
    }

    fn allowed_airlines(&self) -> Option<Vec<String>> {
        let allowed: Vec<String> = self
            .airlines
            .as_ref()?
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        if allowed.is_empty() { None } else { Some(allowed) }
    }

    fn compare(&self, key: SortKey, a: &FlightResult, b: &FlightResult) -> Ordering {
        let ordering = match key {
            SortKey::Price => a.price.total_cmp(&b.price),
            SortKey::Duration => a.total_duration.cmp(&b.total_duration),
            SortKey::Stops => a.stops.cmp(&b.stops),
            // Unparseable times sort last in either direction
            SortKey::DepartureTime => match (a.departure_clock(), b.departure_clock()) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        match self.sort_order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// Keeps the flights matching every criterion, then sorts them.
///
/// The sort is stable, so equal keys keep their provider order in either direction.
pub fn apply_filters(flights: &[FlightResult], criteria: &FilterCriteria) -> Vec<FlightResult> {
    let mut selected: Vec<FlightResult> = flights
        .iter()
        .filter(|flight| criteria.matches(flight))
        .cloned()
        .collect();
    if let Some(key) = criteria.sort_by {
        selected.sort_by(|a, b| criteria.compare(key, a, b));
    }
    selected
}

#[derive(Debug, Clone)]
pub struct FilteredFlights {
    pub total_count: usize,
    pub flights: Vec<FlightResult>,
}

/// Filters cached result sets.
pub struct FlightFilter {
    storage: Arc<FlightSearchStorage>,
}

impl FlightFilter {
    pub fn new(storage: Arc<FlightSearchStorage>) -> Self {
        Self { storage }
    }

    /// Loads `search_id` and applies `criteria`; load failures propagate unchanged.
    #[instrument(name = "filter_flights", skip(self))]
    pub fn filter(
        &self,
        search_id: &str,
        criteria: &FilterCriteria,
    ) -> Result<FilteredFlights, FlightSearchError> {
        let results = match self.storage.load(search_id) {
            Ok(results) => results,
            Err(e) => {
                warn!("Cannot filter search {}: {}", search_id, e);
                inc_flight_filter(Some(&e));
                return Err(e);
            }
        };
        let flights = apply_filters(&results.flights, criteria);
        info!(
            "Search {}: {} of {} flight(s) match",
            search_id,
            flights.len(),
            results.flights.len()
        );
        inc_flight_filter(None);
        Ok(FilteredFlights {
            total_count: results.flights.len(),
            flights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{flight, query};
    use tempfile::TempDir;

    fn prices(flights: &[FlightResult]) -> Vec<f64> {
        flights.iter().map(|f| f.price).collect()
    }

    fn sample() -> Vec<FlightResult> {
        vec![
            flight(100.0, 0, "Iberia", 600),
            flight(80.0, 1, "American", 720),
            flight(120.0, 0, "Delta", 590),
        ]
    }

    #[test]
    fn test_no_criteria_keeps_provider_order() {
        let flights = sample();
        assert_eq!(apply_filters(&flights, &FilterCriteria::default()), flights);
    }

    #[test]
    fn test_non_stop_sorted_by_price() {
        let criteria = FilterCriteria {
            max_stops: Some(0),
            sort_by: Some(SortKey::Price),
            ..Default::default()
        };
        assert_eq!(prices(&apply_filters(&sample(), &criteria)), vec![100.0, 120.0]);
    }

    #[test]
    fn test_max_price_is_inclusive() {
        for max in [0.0, 79.99, 80.0, 100.0, 119.0, 500.0] {
            let criteria = FilterCriteria {
                max_price: Some(max),
                ..Default::default()
            };
            let selected = apply_filters(&sample(), &criteria);
            assert!(selected.iter().all(|f| f.price <= max));
            let expected = sample().iter().filter(|f| f.price <= max).count();
            assert_eq!(selected.len(), expected);
        }
    }

    #[test]
    fn test_price_sort_is_stable() {
        let flights = vec![
            flight(90.0, 0, "Iberia", 600),
            flight(50.0, 1, "American", 700),
            flight(90.0, 1, "Delta", 610),
            flight(90.0, 0, "Vueling", 620),
        ];
        let airlines = |criteria: &FilterCriteria| -> Vec<String> {
            apply_filters(&flights, criteria)
                .into_iter()
                .map(|f| f.airline)
                .collect()
        };
        let ascending = FilterCriteria {
            sort_by: Some(SortKey::Price),
            ..Default::default()
        };
        assert_eq!(airlines(&ascending), vec!["American", "Iberia", "Delta", "Vueling"]);

        let descending = FilterCriteria {
            sort_order: SortOrder::Descending,
            ..ascending
        };
        assert_eq!(airlines(&descending), vec!["Iberia", "Delta", "Vueling", "American"]);
    }

    #[test]
    fn test_sort_by_duration_and_stops() {
        let by_duration = FilterCriteria {
            sort_by: Some(SortKey::Duration),
            ..Default::default()
        };
        assert_eq!(
            prices(&apply_filters(&sample(), &by_duration)),
            vec![120.0, 100.0, 80.0]
        );
        let by_stops = FilterCriteria {
            sort_by: Some(SortKey::Stops),
            sort_order: SortOrder::Descending,
            ..Default::default()
        };
        assert_eq!(
            prices(&apply_filters(&sample(), &by_stops)),
            vec![80.0, 100.0, 120.0]
        );
    }

    #[test]
    fn test_airline_and_duration_criteria() {
        let criteria = FilterCriteria {
            airlines: Some(vec![" iberia ".to_string(), "DELTA".to_string()]),
            max_duration: Some(595),
            ..Default::default()
        };
        assert_eq!(prices(&apply_filters(&sample(), &criteria)), vec![120.0]);

        let empty = FilterCriteria {
            airlines: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(apply_filters(&sample(), &empty).len(), 3);
    }

    #[test]
    fn test_airline_matches_any_segment() {
        let mut connecting = flight(80.0, 1, "American", 720);
        connecting.segments[1].airline = "Iberia".to_string();
        let criteria = FilterCriteria {
            airlines: Some(vec!["Iberia".to_string()]),
            ..Default::default()
        };
        assert!(criteria.matches(&connecting));
    }

    #[test]
    fn test_departure_time_range() {
        let mut late = flight(90.0, 0, "Delta", 600);
        late.departure.time = "2025-03-14 21:15".to_string();
        let flights = vec![flight(100.0, 0, "Iberia", 600), late];

        let morning = FilterCriteria {
            departure_time_range: Some(TimeRange::parse("06:00", "07:45").unwrap()),
            ..Default::default()
        };
        assert_eq!(prices(&apply_filters(&flights, &morning)), vec![100.0]);

        let latest_first = FilterCriteria {
            sort_by: Some(SortKey::DepartureTime),
            sort_order: SortOrder::Descending,
            ..Default::default()
        };
        assert_eq!(prices(&apply_filters(&flights, &latest_first)), vec![90.0, 100.0]);

        let mut unknown = flight(70.0, 0, "Vueling", 600);
        unknown.departure.time = String::new();
        let mut with_unknown = vec![unknown];
        with_unknown.extend(flights);
        assert_eq!(
            prices(&apply_filters(&with_unknown, &latest_first)),
            vec![90.0, 100.0, 70.0]
        );

        assert!(TimeRange::parse("18:00", "06:00").is_err());
        assert!(TimeRange::parse("noon", "13:00").is_err());
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let criteria = FilterCriteria {
            max_price: Some(1.0),
            ..Default::default()
        };
        assert!(apply_filters(&sample(), &criteria).is_empty());
    }

    #[test]
    fn test_parse_sort_options() {
        assert_eq!("Price".parse::<SortKey>().unwrap(), SortKey::Price);
        assert_eq!("departure_time".parse::<SortKey>().unwrap(), SortKey::DepartureTime);
        assert!(matches!(
            "emissions".parse::<SortKey>(),
            Err(FlightSearchError::Validation(_))
        ));
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_filter_loads_from_storage() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FlightSearchStorage::new(dir.path()).unwrap());
        let search_id = storage.save(&query(), "USD", &sample()).unwrap();
        let filter = FlightFilter::new(storage);

        let criteria = FilterCriteria {
            max_stops: Some(0),
            sort_by: Some(SortKey::Price),
            ..Default::default()
        };
        let filtered = filter.filter(&search_id, &criteria).unwrap();
        assert_eq!(filtered.total_count, 3);
        assert_eq!(prices(&filtered.flights), vec![100.0, 120.0]);

        assert!(matches!(
            filter.filter("nonexistent-id", &criteria),
            Err(FlightSearchError::NotFound(_))
        ));
    }

    #[test]
    fn test_filter_propagates_corrupt_data() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FlightSearchStorage::new(dir.path()).unwrap());
        let search_id = uuid::Uuid::new_v4().to_string();
        std::fs::write(storage.path_for(&search_id), b"{").unwrap();
        let filter = FlightFilter::new(storage);
        assert!(matches!(
            filter.filter(&search_id, &FilterCriteria::default()),
            Err(FlightSearchError::CorruptData { .. })
        ));
    }
}
