// =============================================================================
// Exchange layer — signed REST client, filter arithmetic, mode-aware adapter
// =============================================================================

pub mod adapter;
pub mod client;
pub mod filters;
pub mod rate_limit;

pub use adapter::{ExchangeAdapter, ExchangeApi, OcoIds, OcoOrder, OrderInfo, SafetyBlocked};
pub use filters::SymbolFilters;
