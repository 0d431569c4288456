pub mod aggregator;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod rates;
pub mod storage;

pub use aggregator::{BillingRequest, BillingRunProcessor, BillingRunReport};
pub use config::BillingConfig;
pub use error::{BillingError, Result};
