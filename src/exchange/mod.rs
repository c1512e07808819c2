pub mod factory;
mod registry;
mod traits;

pub use factory::build_registry;
pub use registry::ExchangeRegistry;
pub use traits::{ExchangeAdapter, FundingRateProvider, ReferenceDataProvider};

#[cfg(test)]
pub use traits::MockExchangeAdapter;
