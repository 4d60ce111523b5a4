pub mod scheduler;
pub mod services;

pub use scheduler::{BuildTick, SignalScheduler};
pub use services::SignalServices;
