use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlightSearchError {
    #[error("Invalid search: {0}")]
    Validation(String),
    #[error("HTTP request failed: {0}")]
    HttpRequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("No search results found for search id {0}")]
    NotFound(String),
    #[error("Corrupt search results for search id {search_id}: {reason}")]
    CorruptData { search_id: String, reason: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Missing API key")]
    MissingApiKey,
}

impl FlightSearchError {
    /// Upstream failures, retryable by whoever asked for the search.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            FlightSearchError::HttpRequestFailed(_)
                | FlightSearchError::InvalidResponse(_)
                | FlightSearchError::ApiError(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FlightSearchError::Validation(_) => "Validation",
            FlightSearchError::HttpRequestFailed(_) => "HttpRequestFailed",
            FlightSearchError::InvalidResponse(_) => "InvalidResponse",
            FlightSearchError::ApiError(_) => "ApiError",
            FlightSearchError::NotFound(_) => "NotFound",
            FlightSearchError::CorruptData { .. } => "CorruptData",
            FlightSearchError::Storage(_) => "Storage",
            FlightSearchError::MissingApiKey => "MissingApiKey",
        }
    }

    /// Text handed back to the assistant in place of the error itself.
    pub fn user_message(&self) -> String {
        match self {
            FlightSearchError::Validation(msg) => {
                format!("The request is invalid: {}. Please correct it and try again.", msg)
            }
            e if e.is_provider_error() => {
                format!("The flight search provider failed ({}). Please try again.", e)
            }
            FlightSearchError::NotFound(id) | FlightSearchError::CorruptData { search_id: id, .. } => {
                format!(
                    "No search results found for search id {}. They may have expired; run a new search.",
                    id
                )
            }
            FlightSearchError::Storage(_) => {
                "The search results could not be saved, so no search id was issued.".to_string()
            }
            FlightSearchError::MissingApiKey => {
                "Flight search is not configured: the provider API key is missing.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
