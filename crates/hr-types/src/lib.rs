pub mod bundle;
pub mod errors;
pub mod metrics;
pub mod objective;
pub mod parameters;
pub mod problem;

pub use bundle::*;
pub use errors::*;
pub use metrics::*;
pub use objective::*;
pub use parameters::*;
pub use problem::*;
