pub mod cache;
pub mod driver;

pub use cache::SharedMarketDataCache;
pub use driver::{MarketDataDriver, MarketMessage};
