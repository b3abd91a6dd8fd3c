pub mod config;
pub mod core_membership;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::Config;
pub use core_membership::{CoreError, CoreResult, MembershipService};
pub use logging::{init_logging, LogLevel};
