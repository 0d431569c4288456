use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid billing period: {start} is after {end}")]
    InvalidPeriod { start: String, end: String },

    #[error("Data integrity error for device {device_id}: field '{field}' has invalid value '{value}'")]
    DataIntegrity {
        device_id: String,
        field: String,
        value: String,
    },

    #[error("Device not found: {device_id}")]
    MissingDevice { device_id: String },

    #[error("Meter reading {reading_id} is already billed")]
    ReadingAlreadyBilled { reading_id: i64 },

    #[error("Rental for device {device_id} is already billed for {period}")]
    RentalAlreadyBilled { device_id: String, period: String },

    #[error("Nothing to bill for location {location_id}")]
    NothingToBill { location_id: String },

    #[error("Invoice not found: {id}")]
    InvoiceNotFound { id: String },

    #[error("Exchange rate source error: {message}")]
    RateSource { message: String },

    #[error("Invalid exchange rate set: {message}")]
    InvalidRateSet { message: String },

    #[error("Invalid rate {rate} for currency {currency}")]
    InvalidRate { currency: String, rate: Decimal },

    #[error("Database error during {operation}: {source}")]
    DatabaseError {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Validation error on {field}: {message}")]
    ValidationError { field: String, message: String },
}

impl BillingError {
    pub fn database(operation: &str, source: sqlx::Error) -> Self {
        BillingError::DatabaseError {
            operation: operation.to_string(),
            source: Box::new(source),
        }
    }

    /// Errors that abort a run because input data is wrong, as opposed to
    /// infrastructure failures that may succeed on retry.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            BillingError::DataIntegrity { .. }
                | BillingError::MissingDevice { .. }
                | BillingError::InvalidPeriod { .. }
                | BillingError::ValidationError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
