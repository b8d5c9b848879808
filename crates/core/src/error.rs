use chrono::NaiveDate;
use thiserror::Error;

/// Client-facing failures. Everything upstream of the pipeline that can go
/// wrong at runtime degrades instead of surfacing here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConciergeError {
    #[error("location required (in booking or via booking_id)")]
    MissingLocation,

    #[error("end_date {end} is before start_date {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid booking payload: {0}")]
    InvalidBooking(String),

    #[error("invalid prefs payload: {0}")]
    InvalidPreferences(String),

    #[error("booking {0} not found")]
    BookingNotFound(i64),
}

impl ConciergeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingLocation => "missing_location",
            Self::InvalidDateRange { .. } => "invalid_date_range",
            Self::InvalidBooking(_) => "invalid_booking",
            Self::InvalidPreferences(_) => "invalid_preferences",
            Self::BookingNotFound(_) => "booking_not_found",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BookingNotFound(_))
    }
}
