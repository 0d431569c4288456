pub mod billing;
pub mod processor;

pub use billing::{Aggregation, BillingAggregator};
pub use processor::{BillingRequest, BillingRunProcessor, BillingRunReport};
