pub mod connection;
pub mod devices;
pub mod invoices;
pub mod readings;

pub use connection::{connect, run_migrations};

pub use devices::{DeviceRepository, SqlDeviceRepository};

pub use invoices::{
    create_invoice, mark_readings_billed, record_rentals, InvoiceRepository, NewInvoice,
    SqlInvoiceRepository,
};

pub use readings::{ReadingRepository, SqlReadingRepository};
