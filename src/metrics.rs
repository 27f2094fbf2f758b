use crate::error::FlightSearchError;
use crate::otel;
use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use std::sync::OnceLock;

pub fn inc_flight_search_success() {
    flight_search_success().add(1, &[])
}

pub fn inc_flight_search_error(error: &FlightSearchError) {
    let attributes = vec![KeyValue::new("kind", error.kind())];
    flight_search_error().add(1, &attributes)
}

/// Counts a filter request; `error` is `None` when it succeeded.
pub fn inc_flight_filter(error: Option<&FlightSearchError>) {
    let outcome = error.map(|e| e.kind()).unwrap_or("Success");
    flight_filter_requests().add(1, &[KeyValue::new("outcome", outcome)])
}

pub fn inc_cache_entries_removed(count: usize) {
    if count > 0 {
        cache_entries_removed().add(count as u64, &[])
    }
}

fn flight_search_success() -> &'static Counter<u64> {
    static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let meter = otel::get_meter();
        meter
            .u64_counter("flight_search_success")
            .with_description("Number of successful flight searches")
            .build()
    })
}

fn flight_search_error() -> &'static Counter<u64> {
    static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let meter = otel::get_meter();
        meter
            .u64_counter("flight_search_error")
            .with_description("Number of failed flight searches")
            .build()
    })
}

fn flight_filter_requests() -> &'static Counter<u64> {
    static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let meter = otel::get_meter();
        meter
            .u64_counter("flight_filter_requests")
            .with_description("Number of filter requests against cached searches")
            .build()
    })
}

fn cache_entries_removed() -> &'static Counter<u64> {
    static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let meter = otel::get_meter();
        meter
            .u64_counter("flight_cache_entries_removed")
            .with_description("Number of expired search results deleted")
            .build()
    })
}
