pub mod json_files;
pub mod paper_exchange;
pub mod postgres;

pub use json_files::{JsonFundingRates, JsonReferenceData};
pub use paper_exchange::{PaperExchange, PaperNetwork};
pub use postgres::PostgresStateStore;
