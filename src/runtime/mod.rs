pub mod assertions;
pub mod keyed_map;
pub mod logger;
pub mod pool;
pub mod pricing;

pub use assertions::{assertion_failure_count, record_assertion_failure};
pub use keyed_map::KeyedMap;
pub use logger::{GatewayLogger, TracingLogger};
pub use pool::ObjectPool;
pub use pricing::{PricingCalculator, StaticPricing};
