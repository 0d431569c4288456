pub mod currency;
pub mod deltas;
pub mod devices;
pub mod invoice;
pub mod proration;
pub mod readings;
pub mod types;

pub use currency::{normalize_currency, resolve_currency, Currency, CurrencyResolution};
pub use deltas::{compute_deltas, CounterAnomaly, DeltaReport, ReadingDelta};
pub use devices::{CurrencyDefault, DevicePricing, DeviceRecord, Price};
pub use invoice::{
    BillingLineItem, Invoice, InvoiceDraft, InvoiceProjection, LineItemKind, ProjectionLine,
};
pub use proration::{prorate, Proration};
pub use readings::{CounterKind, MeterReading, NewMeterReading};
pub use types::{BillingPeriod, DeviceId, InvoiceId, LocationId, ReadingId};
